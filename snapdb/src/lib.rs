// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The snapshot database (snapdb).
//!
//! This is the ribsnap snapshot store. Every table coordinate
//! `(device, kind, vrf, afi)` has one mutable "latest" artifact plus an
//! append-only series of gzip archives keyed by timestamp, and every
//! `(device, vrf, afi)` has an append-only series of diff archives. The
//! diff engine that produces those archives lives here too, next to the
//! store, since the two share the payload types.

pub mod diff;
pub mod error;
pub mod store;

pub use diff::{
    bgp_diff, rib_diff, Changed, Delta, DiffPayload, DiffSummary, TableDiff,
};
pub use error::Error;
pub use store::{Coordinates, DiffMeta, Store};
