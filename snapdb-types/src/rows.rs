// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The canonical row model. Every device table, whatever shape it arrived
//! in, is reduced to a list of these rows before anything downstream
//! (store, diff engine, API) sees it.

use crate::normalize::community_hash;
use crate::{AddressFamily, Prefix};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single next-hop. Two next-hops with the same address but different
/// egress interfaces are distinct ECMP members.
#[derive(
    Debug,
    Clone,
    Serialize,
    Deserialize,
    JsonSchema,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
)]
pub struct NextHop {
    pub nh: String,
    pub iface: Option<String>,
}

impl NextHop {
    pub fn new(nh: impl Into<String>, iface: Option<String>) -> Self {
        Self {
            nh: nh.into(),
            iface,
        }
    }
}

/// Equality key for RIB rows within a snapshot.
pub type RibKey = (String, AddressFamily, Prefix, String);

/// Equality key for BGP rows within a snapshot.
pub type BgpKey = (String, AddressFamily, Prefix);

/// One RIB entry. The next-hop set is a `BTreeSet` so device ordering
/// never leaks into equality or serialization.
#[derive(
    Debug, Clone, Serialize, Deserialize, JsonSchema, Eq, PartialEq,
)]
pub struct RibRow {
    pub device: String,
    pub vrf: String,
    pub afi: AddressFamily,
    pub prefix: Prefix,
    pub protocol: String,
    pub distance: Option<u32>,
    pub metric: Option<u32>,
    pub best: bool,
    pub nexthops: BTreeSet<NextHop>,
}

impl RibRow {
    pub fn key(&self) -> RibKey {
        (
            self.vrf.clone(),
            self.afi,
            self.prefix,
            self.protocol.clone(),
        )
    }

    /// Merge another adjacency row with the same key into this one:
    /// next-hop set union, first non-null scalar wins, best is OR-ed.
    pub fn merge(&mut self, other: RibRow) {
        self.nexthops.extend(other.nexthops);
        if self.distance.is_none() {
            self.distance = other.distance;
        }
        if self.metric.is_none() {
            self.metric = other.metric;
        }
        self.best = self.best || other.best;
        if self.protocol.is_empty() {
            self.protocol = other.protocol;
        }
    }
}

/// One BGP path entry at the granularity the diff engine compares:
/// a prefix plus the attributes of its representative path.
#[derive(
    Debug, Clone, Serialize, Deserialize, JsonSchema, Eq, PartialEq,
)]
pub struct BgpRow {
    pub device: String,
    pub vrf: String,
    pub afi: AddressFamily,
    pub prefix: Prefix,
    pub best: bool,
    pub nh: Option<String>,
    pub as_path: String,
    pub local_pref: Option<u64>,
    pub med: Option<u64>,
    pub origin: Option<String>,
    pub communities: Vec<String>,
    pub communities_hash: String,
    pub weight: Option<u64>,
    pub peer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_list: Option<Vec<String>>,
}

impl BgpRow {
    /// Snapshots keep at most this many community strings per row. The
    /// hash always covers the full normalized set, and equality is
    /// decided by the hash, so truncation never affects diffing.
    pub const COMMUNITY_CAP: usize = 256;

    pub fn key(&self) -> BgpKey {
        (self.vrf.clone(), self.afi, self.prefix)
    }

    /// Install a normalized community list: hash the full set, store the
    /// capped list.
    pub fn set_communities(&mut self, mut communities: Vec<String>) {
        self.communities_hash = community_hash(&communities);
        communities.truncate(Self::COMMUNITY_CAP);
        self.communities = communities;
    }
}
