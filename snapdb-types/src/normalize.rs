// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Normalization of raw attribute values into canonical forms. Device
//! output is wildly polymorphic: a community set may arrive as one
//! space-separated string, a list of strings, a list of numbers, or
//! nothing at all. Everything funnels through here so equality anywhere
//! downstream means equality of canonical values.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Normalize BGP communities to a sorted, deduplicated list of strings.
/// Accepts a string, a list of strings/numbers, a bare number, or null.
pub fn normalize_communities(raw: &Value) -> Vec<String> {
    let mut set = BTreeSet::new();
    match raw {
        Value::Null => {}
        Value::String(s) => {
            set.extend(s.split_whitespace().map(str::to_string));
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Null => {}
                    Value::String(s) => {
                        set.extend(s.split_whitespace().map(str::to_string));
                    }
                    other => {
                        set.insert(other.to_string());
                    }
                }
            }
        }
        Value::Number(n) => {
            set.insert(n.to_string());
        }
        other => {
            set.insert(other.to_string());
        }
    }
    set.into_iter().collect()
}

/// Stable digest over a normalized token list: SHA-256 of each token
/// followed by a NUL separator, hex encoded. The separator keeps
/// `["a", "bc"]` and `["ab", "c"]` distinct.
pub fn community_hash(values: &[String]) -> String {
    let mut hasher = Sha256::new();
    for v in values {
        hasher.update(v.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Normalize an AS path to a single-space-separated string. Lists are
/// joined; whitespace runs collapse. `{...}` aggregate and `(...)`
/// confederation tokens pass through untouched.
pub fn normalize_as_path(raw: &Value) -> String {
    let joined = match raw {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.clone()),
                    other => parts.push(other.to_string()),
                }
            }
            parts.join(" ")
        }
        other => other.to_string(),
    };
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The leftmost purely numeric token of an AS path, or "" when there is
/// none. This is the immediate upstream AS; a change here is a strong
/// signal that traffic moved to a different neighbor.
pub fn head_as(as_path: &str) -> String {
    as_path
        .split_whitespace()
        .find(|tok| !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn communities_from_string() {
        let c = normalize_communities(&json!("65001:200 65001:100"));
        assert_eq!(c, vec!["65001:100", "65001:200"]);
    }

    #[test]
    fn communities_from_mixed_list() {
        let c = normalize_communities(&json!([
            "65001:100 65001:200",
            null,
            "65001:100",
            4200000000u64
        ]));
        assert_eq!(
            c,
            vec!["4200000000", "65001:100", "65001:200"]
        );
    }

    #[test]
    fn communities_from_null() {
        assert!(normalize_communities(&Value::Null).is_empty());
    }

    #[test]
    fn hash_depends_on_token_boundaries() {
        let a = community_hash(&["a".into(), "bc".into()]);
        let b = community_hash(&["ab".into(), "c".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_matches_for_equal_sets() {
        let a = normalize_communities(&json!("65001:1 65001:2"));
        let b = normalize_communities(&json!(["65001:2", "65001:1"]));
        assert_eq!(community_hash(&a), community_hash(&b));
    }

    #[test]
    fn as_path_from_list() {
        assert_eq!(
            normalize_as_path(&json!(["65001", "3356", "{64512,64513}"])),
            "65001 3356 {64512,64513}"
        );
    }

    #[test]
    fn as_path_collapses_whitespace() {
        assert_eq!(
            normalize_as_path(&json!("  65001   3356 ")),
            "65001 3356"
        );
    }

    #[test]
    fn head_as_skips_non_numeric() {
        assert_eq!(head_as("{64512} 65001 3356"), "65001");
        assert_eq!(head_as(""), "");
        assert_eq!(head_as("{64512}"), "");
    }
}
