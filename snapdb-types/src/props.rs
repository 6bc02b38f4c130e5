// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the canonical row model: prefix
//! canonicalization, community normalization, and the stable community
//! hash.

use crate::normalize::{community_hash, normalize_communities};
use crate::{Prefix4, Prefix6};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::net::{Ipv4Addr, Ipv6Addr};

fn ipv4_prefix_strategy() -> impl Strategy<Value = Prefix4> {
    (any::<u32>(), 0u8..=32u8).prop_map(|(addr_bits, length)| {
        Prefix4::new(Ipv4Addr::from(addr_bits), length)
    })
}

fn ipv6_prefix_strategy() -> impl Strategy<Value = Prefix6> {
    (any::<u128>(), 0u8..=128u8).prop_map(|(addr_bits, length)| {
        Prefix6::new(Ipv6Addr::from(addr_bits), length)
    })
}

// Communities as devices actually send them: strings of tokens, lists of
// strings, lists of numbers, or null.
fn community_value_strategy() -> impl Strategy<Value = Value> {
    let token = "[0-9]{1,5}:[0-9]{1,5}";
    prop_oneof![
        Just(Value::Null),
        proptest::collection::vec(token, 0..8)
            .prop_map(|toks| json!(toks.join(" "))),
        proptest::collection::vec(token, 0..8).prop_map(|toks| json!(toks)),
        proptest::collection::vec(any::<u32>(), 0..8)
            .prop_map(|nums| json!(nums)),
    ]
}

proptest! {
    /// Property: IPv4 host bits are always unset after construction
    #[test]
    fn prop_ipv4_host_bits_always_unset(prefix in ipv4_prefix_strategy()) {
        prop_assert!(
            prefix.host_bits_are_unset(),
            "IPv4 prefix {prefix} should have host bits unset"
        );
    }

    /// Property: IPv6 host bits are always unset after construction
    #[test]
    fn prop_ipv6_host_bits_always_unset(prefix in ipv6_prefix_strategy()) {
        prop_assert!(
            prefix.host_bits_are_unset(),
            "IPv6 prefix {prefix} should have host bits unset"
        );
    }

    /// Property: prefixes round-trip through their CIDR text form
    #[test]
    fn prop_ipv4_prefix_text_round_trip(prefix in ipv4_prefix_strategy()) {
        let text = prefix.to_string();
        let back: Prefix4 = text.parse().unwrap();
        prop_assert_eq!(back, prefix);
    }

    /// Property: normalization is idempotent
    #[test]
    fn prop_community_normalization_idempotent(
        raw in community_value_strategy()
    ) {
        let once = normalize_communities(&raw);
        let twice = normalize_communities(&json!(once.clone()));
        prop_assert_eq!(once, twice);
    }

    /// Property: normalized output is sorted and unique
    #[test]
    fn prop_communities_sorted_unique(raw in community_value_strategy()) {
        let out = normalize_communities(&raw);
        for pair in out.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
    }

    /// Property: equal normalized sets hash identically, and the hash
    /// ignores input ordering
    #[test]
    fn prop_community_hash_order_insensitive(
        mut toks in proptest::collection::vec("[0-9]{1,5}:[0-9]{1,5}", 1..8)
    ) {
        let forward = normalize_communities(&json!(toks.clone()));
        toks.reverse();
        let reversed = normalize_communities(&json!(toks));
        prop_assert_eq!(
            community_hash(&forward),
            community_hash(&reversed)
        );
    }

    /// Property: distinct normalized sets produce distinct hashes
    #[test]
    fn prop_community_hash_distinguishes(
        a in proptest::collection::vec("[0-9]{1,5}:[0-9]{1,5}", 0..8),
        b in proptest::collection::vec("[0-9]{1,5}:[0-9]{1,5}", 0..8),
    ) {
        let na = normalize_communities(&json!(a));
        let nb = normalize_communities(&json!(b));
        if na != nb {
            prop_assert_ne!(community_hash(&na), community_hash(&nb));
        } else {
            prop_assert_eq!(community_hash(&na), community_hash(&nb));
        }
    }
}
