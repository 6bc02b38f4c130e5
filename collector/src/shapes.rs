// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shape reconciliation: two known JSON dialects into canonical rows.
//!
//! Shape A is structured-parser output, keyed by vrf and address family
//! with routes as a prefix-keyed mapping. Shape B is the vendor tabular
//! form, `TABLE_x` containing `ROW_x` where the row value is a single
//! object or a list depending on cardinality; every `ROW_x` is flattened
//! to a list before traversal so downstream code sees one shape.
//!
//! The reconciler never fails on unknown fields. It emits what it
//! recognizes and drops the rest; a table that matches neither shape
//! yields no rows.

use serde_json::Value;
use snapdb_types::normalize::{normalize_as_path, normalize_communities};
use snapdb_types::rows::RibKey;
use snapdb_types::{AddressFamily, BgpRow, NextHop, Prefix, RibRow};
use std::collections::{BTreeMap, BTreeSet};

/// Dict-or-list polymorphism, resolved: null is empty, a list is
/// itself, anything else is a singleton.
fn as_list(v: &Value) -> Vec<&Value> {
    match v {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

/// Rows under the first `TABLE_x`/`ROW_x` pair present in `container`.
fn table_rows<'a>(
    container: &'a Value,
    names: &[(&str, &str)],
) -> Vec<&'a Value> {
    for (table, row) in names {
        if let Some(rows) = container.get(table).and_then(|t| t.get(row)) {
            return as_list(rows);
        }
    }
    Vec::new()
}

/// `true`, `"true"`, `1`, and `"1"` are all truthy in device output.
fn truthy(v: Option<&Value>) -> bool {
    match v {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Integers frequently arrive as JSON strings.
fn u64_of(v: Option<&Value>) -> Option<u64> {
    match v {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn u32_of(v: Option<&Value>) -> Option<u32> {
    u64_of(v).and_then(|n| u32::try_from(n).ok())
}

fn str_of(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn str_list_of(v: Option<&Value>) -> Option<Vec<String>> {
    let items = v?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|i| str_of(Some(i)))
            .collect(),
    )
}

fn insert_rib(index: &mut BTreeMap<RibKey, RibRow>, row: RibRow) {
    match index.entry(row.key()) {
        std::collections::btree_map::Entry::Vacant(e) => {
            e.insert(row);
        }
        std::collections::btree_map::Entry::Occupied(mut e) => {
            e.get_mut().merge(row);
        }
    }
}

/// Normalize a RIB table into canonical rows. Adjacency rows sharing an
/// equality key merge into one row with the union of next-hops.
pub fn parse_rib(
    device: &str,
    vrf: &str,
    afi: AddressFamily,
    parsed: &Value,
) -> Vec<RibRow> {
    let mut index: BTreeMap<RibKey, RibRow> = BTreeMap::new();

    parse_rib_shape_a(device, vrf, afi, parsed, &mut index);
    if index.is_empty() && parsed.get("TABLE_vrf").is_some() {
        parse_rib_shape_b(device, vrf, afi, parsed, &mut index);
    }

    index.into_values().collect()
}

fn parse_rib_shape_a(
    device: &str,
    vrf: &str,
    afi: AddressFamily,
    parsed: &Value,
    index: &mut BTreeMap<RibKey, RibRow>,
) {
    let af_label = afi.to_string();
    let Some(routes) = parsed
        .get("vrf")
        .and_then(|v| v.get(vrf))
        .and_then(|v| v.get("address_family"))
        .and_then(|v| v.get(af_label.as_str()))
        .and_then(|v| v.get("routes"))
        .and_then(Value::as_object)
    else {
        return;
    };

    for (pfx, pdata) in routes {
        let Ok(prefix) = Prefix::parse_lenient(pfx, afi) else {
            continue;
        };
        let route_pref = pdata.get("route_preference");
        let protocol = str_of(route_pref.and_then(|v| v.get("protocol")))
            .or_else(|| str_of(pdata.get("source_protocol")))
            .unwrap_or_default();
        let distance = u32_of(route_pref.and_then(|v| v.get("preference")))
            .or_else(|| u32_of(pdata.get("distance")));
        let metric = u32_of(pdata.get("metric"));
        let best = truthy(pdata.get("active"));

        let mut nexthops = BTreeSet::new();
        if let Some(nh_map) = pdata.get("next_hop") {
            if let Some(list) = nh_map.get("next_hop_list") {
                let entries: Vec<&Value> = match list {
                    Value::Object(m) => m.values().collect(),
                    other => as_list(other),
                };
                for entry in entries {
                    if let Some(nh) = str_of(entry.get("next_hop")) {
                        nexthops.insert(NextHop::new(
                            nh,
                            str_of(entry.get("outgoing_interface")),
                        ));
                    }
                }
            }
            // fallback shape: a flat list of next-hop strings
            if let Some(flat) =
                nh_map.get("next_hop").and_then(Value::as_array)
            {
                for nh in flat {
                    if let Value::String(s) = nh {
                        nexthops.insert(NextHop::new(s.clone(), None));
                    }
                }
            }
        }

        insert_rib(
            index,
            RibRow {
                device: device.to_string(),
                vrf: vrf.to_string(),
                afi,
                prefix,
                protocol,
                distance,
                metric,
                best,
                nexthops,
            },
        );
    }
}

fn parse_rib_shape_b(
    device: &str,
    vrf: &str,
    afi: AddressFamily,
    parsed: &Value,
    index: &mut BTreeMap<RibKey, RibRow>,
) {
    let af_label = afi.to_string();
    for vrf_row in table_rows(parsed, &[("TABLE_vrf", "ROW_vrf")]) {
        if str_of(vrf_row.get("vrf-name-out")).as_deref() != Some(vrf) {
            continue;
        }
        for af_row in table_rows(vrf_row, &[("TABLE_addrf", "ROW_addrf")]) {
            let label = str_of(af_row.get("addrf"))
                .unwrap_or_default()
                .to_lowercase();
            if !label.contains(&af_label) {
                continue;
            }
            for prefix_row in
                table_rows(af_row, &[("TABLE_prefix", "ROW_prefix")])
            {
                let Some(pfx) = str_of(prefix_row.get("ipprefix"))
                    .or_else(|| str_of(prefix_row.get("ip_prefix")))
                else {
                    continue;
                };
                let Ok(prefix) = Prefix::parse_lenient(&pfx, afi) else {
                    continue;
                };

                let mut protocol = String::new();
                let mut distance = None;
                let mut metric = None;
                let mut best = false;
                let mut nexthops = BTreeSet::new();
                // some releases pluralize the path table name
                for path in table_rows(
                    prefix_row,
                    &[
                        ("TABLE_path", "ROW_path"),
                        ("TABLE_paths", "ROW_paths"),
                    ],
                ) {
                    if protocol.is_empty() {
                        if let Some(p) = str_of(path.get("clientname")) {
                            protocol = p;
                        }
                    }
                    if let Some(d) = u32_of(path.get("pref")) {
                        distance = Some(d);
                    }
                    if let Some(m) = u32_of(path.get("metric")) {
                        metric = Some(m);
                    }
                    if truthy(path.get("ubest")) {
                        best = true;
                    }
                    let nh = str_of(path.get("ipnexthop"))
                        .or_else(|| str_of(path.get("nexthop")));
                    if let Some(nh) = nh {
                        nexthops.insert(NextHop::new(
                            nh,
                            str_of(path.get("ifname")).or_else(|| {
                                str_of(path.get("outgoing_interface"))
                            }),
                        ));
                    }
                }

                insert_rib(
                    index,
                    RibRow {
                        device: device.to_string(),
                        vrf: vrf.to_string(),
                        afi,
                        prefix,
                        protocol,
                        distance,
                        metric,
                        best,
                        nexthops,
                    },
                );
            }
        }
    }
}

/// Normalize a BGP table into canonical rows, one per path. Best-path
/// collapse happens in the diff engine, not here.
pub fn parse_bgp(
    device: &str,
    vrf: &str,
    afi: AddressFamily,
    parsed: &Value,
) -> Vec<BgpRow> {
    let mut out = Vec::new();

    parse_bgp_shape_a(device, vrf, afi, parsed, &mut out);
    if out.is_empty() && parsed.get("TABLE_vrf").is_some() {
        parse_bgp_shape_b(device, vrf, afi, parsed, &mut out);
    }

    out
}

fn parse_bgp_shape_a(
    device: &str,
    vrf: &str,
    afi: AddressFamily,
    parsed: &Value,
    out: &mut Vec<BgpRow>,
) {
    let af_key = match afi {
        AddressFamily::Ipv4 => "ipv4 unicast",
        AddressFamily::Ipv6 => "ipv6 unicast",
    };
    let Some(routes) = parsed
        .get("vrf")
        .and_then(|v| v.get(vrf))
        .and_then(|v| v.get("address_family"))
        .and_then(|v| v.get(af_key))
        .and_then(|v| v.get("routes"))
        .and_then(Value::as_object)
    else {
        return;
    };

    for (pfx, pdata) in routes {
        let Ok(prefix) = Prefix::parse_lenient(pfx, afi) else {
            continue;
        };
        let Some(paths) = pdata.get("index").and_then(Value::as_object)
        else {
            continue;
        };
        for path in paths.values() {
            let communities = normalize_communities(
                path.get("community").unwrap_or(&Value::Null),
            );
            let mut row = BgpRow {
                device: device.to_string(),
                vrf: vrf.to_string(),
                afi,
                prefix,
                best: truthy(path.get("bestpath")),
                nh: str_of(path.get("next_hop")),
                as_path: normalize_as_path(
                    path.get("as_path").unwrap_or(&Value::Null),
                ),
                local_pref: u64_of(path.get("localpref")),
                med: u64_of(path.get("med")),
                origin: normalize_origin(
                    str_of(path.get("origin_code"))
                        .or_else(|| str_of(path.get("origin"))),
                ),
                communities: vec![],
                communities_hash: String::new(),
                weight: u64_of(path.get("weight")),
                peer: str_of(path.get("neighbor")),
                originator_id: str_of(path.get("originator_id")),
                cluster_list: str_list_of(path.get("cluster_list")),
            };
            row.set_communities(communities);
            out.push(row);
        }
    }
}

/// Origin comes back as the single-letter code or spelled out,
/// depending on path and release. Canonical form is `i`/`e`/`?`.
fn normalize_origin(raw: Option<String>) -> Option<String> {
    let raw = raw?;
    Some(match raw.to_lowercase().as_str() {
        "igp" => "i".to_string(),
        "egp" => "e".to_string(),
        "incomplete" => "?".to_string(),
        _ => raw,
    })
}

/// The vendor AFI label may be the numeric AFI code or descriptive text.
fn afi_label_matches(label: Option<&Value>, afi: AddressFamily) -> bool {
    let Some(label) = str_of(label) else {
        return false;
    };
    let lower = label.to_lowercase();
    match afi {
        AddressFamily::Ipv4 => lower == "1" || lower.contains("ipv4"),
        AddressFamily::Ipv6 => lower == "2" || lower.contains("ipv6"),
    }
}

fn bgp_best(path: &Value) -> bool {
    let flagged = match path.get("best") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "bestpath" || s == "true",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    };
    flagged || str_of(path.get("bestcode")).as_deref() == Some(">")
}

fn parse_bgp_shape_b(
    device: &str,
    vrf: &str,
    afi: AddressFamily,
    parsed: &Value,
    out: &mut Vec<BgpRow>,
) {
    for vrf_row in table_rows(parsed, &[("TABLE_vrf", "ROW_vrf")]) {
        if str_of(vrf_row.get("vrf-name-out")).as_deref() != Some(vrf) {
            continue;
        }
        for af_row in table_rows(
            vrf_row,
            &[("TABLE_afi", "ROW_afi"), ("TABLE_af", "ROW_af")],
        ) {
            let label = af_row.get("afi").or_else(|| af_row.get("af"));
            if !afi_label_matches(label, afi) {
                continue;
            }

            // Some releases interpose safi and rd tables between the
            // address family and the prefixes.
            let safi_row =
                table_rows(af_row, &[("TABLE_safi", "ROW_safi")])
                    .into_iter()
                    .next();
            let rd_row = safi_row
                .map(|s| table_rows(s, &[("TABLE_rd", "ROW_rd")]))
                .and_then(|rows| rows.into_iter().next());

            let prefix_rows = match rd_row {
                Some(rd) if rd.get("TABLE_prefix").is_some() => {
                    table_rows(rd, &[("TABLE_prefix", "ROW_prefix")])
                }
                _ => table_rows(af_row, &[("TABLE_prefix", "ROW_prefix")]),
            };

            for prefix_row in prefix_rows {
                let Some(pfx) = str_of(prefix_row.get("ipprefix"))
                    .or_else(|| str_of(prefix_row.get("ipv6prefix")))
                    .or_else(|| str_of(prefix_row.get("prefix")))
                else {
                    continue;
                };
                let Ok(prefix) = Prefix::parse_lenient(&pfx, afi) else {
                    continue;
                };
                for path in
                    table_rows(prefix_row, &[("TABLE_path", "ROW_path")])
                {
                    let communities = normalize_communities(
                        path.get("community").unwrap_or(&Value::Null),
                    );
                    let mut row = BgpRow {
                        device: device.to_string(),
                        vrf: vrf.to_string(),
                        afi,
                        prefix,
                        best: bgp_best(path),
                        nh: str_of(path.get("ipnexthop"))
                            .or_else(|| str_of(path.get("nexthop")))
                            .or_else(|| str_of(path.get("nh"))),
                        as_path: normalize_as_path(
                            path.get("aspath").unwrap_or(&Value::Null),
                        ),
                        local_pref: u64_of(path.get("localpref")),
                        med: u64_of(path.get("metric"))
                            .or_else(|| u64_of(path.get("med"))),
                        origin: normalize_origin(str_of(path.get("origin"))),
                        communities: vec![],
                        communities_hash: String::new(),
                        weight: u64_of(path.get("weight")),
                        peer: str_of(path.get("neighbor_id"))
                            .or_else(|| str_of(path.get("peer"))),
                        originator_id: str_of(path.get("originator_id")),
                        cluster_list: str_list_of(path.get("clusterlist")),
                    };
                    row.set_communities(communities);
                    out.push(row);
                }
            }
        }
    }
}
