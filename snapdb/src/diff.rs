// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Table diffing with ECMP set comparison and per-attribute deltas.
//!
//! Both diff functions key rows by their equality key, collapse duplicate
//! keys the same way the shape reconciler does, and emit adds, removes,
//! and changes in key order so two runs over the same data produce
//! byte-identical output. Cold-start policy (no prior snapshot means no
//! diff at all) is the scheduler's responsibility; these functions are
//! total over whatever row lists they are given.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use snapdb_types::normalize::head_as;
use snapdb_types::{AddressFamily, BgpRow, RibRow};
use std::collections::BTreeMap;

/// Changed-attribute map: attribute name to `[old, new]`.
pub type Delta = BTreeMap<String, (Value, Value)>;

/// A change row: the current serialized row plus the delta that got it
/// here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Changed<R> {
    #[serde(flatten)]
    pub row: R,
    pub delta: Delta,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TableDiff<R> {
    pub adds: Vec<R>,
    pub rems: Vec<R>,
    pub chgs: Vec<Changed<R>>,
}

impl<R> Default for TableDiff<R> {
    fn default() -> Self {
        Self {
            adds: Vec::new(),
            rems: Vec::new(),
            chgs: Vec::new(),
        }
    }
}

impl<R> TableDiff<R> {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.rems.is_empty() && self.chgs.is_empty()
    }
}

/// The archived diff artifact: one per `(device, vrf, afi, timestamp)`,
/// covering both tables so a coordinate has a single diff series.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DiffPayload {
    pub device: String,
    pub vrf: String,
    pub afi: AddressFamily,
    pub rib: TableDiff<RibRow>,
    pub bgp: TableDiff<BgpRow>,
}

impl DiffPayload {
    pub fn is_empty(&self) -> bool {
        self.rib.is_empty() && self.bgp.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.rib.adds.len() + self.bgp.adds.len(),
            removed: self.rib.rems.len() + self.bgp.rems.len(),
            changed: self.rib.chgs.len() + self.bgp.chgs.len(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq,
)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

/// Index rows by equality key, collapsing duplicate RIB keys by next-hop
/// set union. Device output sometimes reports one adjacency per row; the
/// canonical model has one row per key.
fn index_rib(rows: Vec<RibRow>) -> BTreeMap<snapdb_types::rows::RibKey, RibRow>
{
    let mut index = BTreeMap::new();
    for row in rows {
        match index.entry(row.key()) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(row);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                e.get_mut().merge(row);
            }
        }
    }
    index
}

/// Index BGP rows by equality key, collapsing multiple paths for a prefix
/// to a representative: the first path marked best, else the first seen.
fn index_bgp(rows: Vec<BgpRow>) -> BTreeMap<snapdb_types::rows::BgpKey, BgpRow>
{
    let mut index: BTreeMap<snapdb_types::rows::BgpKey, BgpRow> =
        BTreeMap::new();
    for row in rows {
        match index.entry(row.key()) {
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(row);
            }
            std::collections::btree_map::Entry::Occupied(mut e) => {
                if !e.get().best && row.best {
                    e.insert(row);
                }
            }
        }
    }
    index
}

fn opt_json<T: Serialize>(v: &Option<T>) -> Value {
    match v {
        Some(v) => json!(v),
        None => Value::Null,
    }
}

/// Compare two RIB row lists per key. Watched attributes: the next-hop
/// set, distance, metric, and the best flag.
pub fn rib_diff(prev: Vec<RibRow>, curr: Vec<RibRow>) -> TableDiff<RibRow> {
    let prev = index_rib(prev);
    let curr = index_rib(curr);

    let mut out = TableDiff::default();

    for (key, row) in &curr {
        if !prev.contains_key(key) {
            out.adds.push(row.clone());
        }
    }
    for (key, row) in &prev {
        if !curr.contains_key(key) {
            out.rems.push(row.clone());
        }
    }

    for (key, a) in &prev {
        let Some(b) = curr.get(key) else {
            continue;
        };
        let mut delta = Delta::new();
        if a.nexthops != b.nexthops {
            delta.insert(
                "nexthops".to_string(),
                (json!(a.nexthops), json!(b.nexthops)),
            );
        }
        if a.distance != b.distance {
            delta.insert(
                "distance".to_string(),
                (opt_json(&a.distance), opt_json(&b.distance)),
            );
        }
        if a.metric != b.metric {
            delta.insert(
                "metric".to_string(),
                (opt_json(&a.metric), opt_json(&b.metric)),
            );
        }
        if a.best != b.best {
            delta.insert("best".to_string(), (json!(a.best), json!(b.best)));
        }
        if !delta.is_empty() {
            out.chgs.push(Changed {
                row: b.clone(),
                delta,
            });
        }
    }

    out
}

/// BGP attributes compared at the representative path.
const BGP_WATCHED: &[&str] = &[
    "best",
    "nh",
    "as_path",
    "local_pref",
    "med",
    "origin",
    "communities_hash",
    "peer",
];

fn bgp_attr(row: &BgpRow, attr: &str) -> Value {
    match attr {
        "best" => json!(row.best),
        "nh" => opt_json(&row.nh),
        "as_path" => json!(row.as_path),
        "local_pref" => opt_json(&row.local_pref),
        "med" => opt_json(&row.med),
        "origin" => opt_json(&row.origin),
        "communities_hash" => json!(row.communities_hash),
        "peer" => opt_json(&row.peer),
        _ => Value::Null,
    }
}

/// Compare two BGP row lists per prefix key at the representative path.
/// A change in the leftmost AS of the path additionally yields a
/// synthetic `upstream_as` delta entry.
pub fn bgp_diff(prev: Vec<BgpRow>, curr: Vec<BgpRow>) -> TableDiff<BgpRow> {
    let prev = index_bgp(prev);
    let curr = index_bgp(curr);

    let mut out = TableDiff::default();

    for (key, row) in &curr {
        if !prev.contains_key(key) {
            out.adds.push(row.clone());
        }
    }
    for (key, row) in &prev {
        if !curr.contains_key(key) {
            out.rems.push(row.clone());
        }
    }

    for (key, a) in &prev {
        let Some(b) = curr.get(key) else {
            continue;
        };
        let mut delta = Delta::new();
        for attr in BGP_WATCHED {
            let av = bgp_attr(a, attr);
            let bv = bgp_attr(b, attr);
            if av != bv {
                delta.insert(attr.to_string(), (av, bv));
            }
        }

        let a_head = head_as(&a.as_path);
        let b_head = head_as(&b.as_path);
        if a_head != b_head {
            delta.insert(
                "upstream_as".to_string(),
                (json!(a_head), json!(b_head)),
            );
        }

        if !delta.is_empty() {
            out.chgs.push(Changed {
                row: b.clone(),
                delta,
            });
        }
    }

    out
}
