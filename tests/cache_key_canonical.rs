//! Cache key canonicalization invariants
//!
//! Keys must not depend on parameter order, string casing or array order,
//! and null parameters must never contribute to a key.

use proptest::prelude::*;
use serde_json::{Map, Value, json};
use tripguard::cache::{CacheParams, canonicalize_params, hash_input_for_cache};

fn flip_case(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_uppercase() {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            }
        })
        .collect()
}

fn params_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,12}", 1..6)
        .prop_map(|m| m.into_iter().collect())
}

fn to_map(pairs: &[(String, String)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

proptest! {
    #[test]
    fn key_ignores_insertion_order(pairs in params_strategy()) {
        let forward = to_map(&pairs);
        let mut reversed_pairs = pairs.clone();
        reversed_pairs.reverse();
        let reversed = to_map(&reversed_pairs);

        prop_assert_eq!(
            canonicalize_params(&forward, Some("p")),
            canonicalize_params(&reversed, Some("p"))
        );
    }

    #[test]
    fn key_ignores_string_case(pairs in params_strategy()) {
        let flipped: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.clone(), flip_case(v)))
            .collect();

        prop_assert_eq!(
            canonicalize_params(&to_map(&pairs), None),
            canonicalize_params(&to_map(&flipped), None)
        );
    }

    #[test]
    fn key_ignores_array_order(mut items in prop::collection::vec("[a-zA-Z]{1,6}", 0..6)) {
        let original = CacheParams::new().with("tags", items.clone()).key(None);
        items.reverse();
        let reversed = CacheParams::new().with("tags", items).key(None);
        prop_assert_eq!(original, reversed);
    }

    #[test]
    fn null_params_never_change_the_key(pairs in params_strategy(), extra in "[A-Z]{1,8}") {
        let base = to_map(&pairs);
        let mut with_null = base.clone();
        // Uppercase names cannot collide with the generated lowercase ones
        with_null.insert(extra, Value::Null);

        prop_assert_eq!(
            canonicalize_params(&base, Some("x")),
            canonicalize_params(&with_null, Some("x"))
        );
    }

    #[test]
    fn input_hash_is_sixteen_hex_chars(text in ".{0,64}") {
        let hash = hash_input_for_cache(&text).unwrap();
        prop_assert_eq!(hash.len(), 16);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

#[test]
fn mixed_scalar_types_render_as_text() {
    let params = json!({
        "adults": 2,
        "nonstop": true,
        "destination": "Lisbon",
        "budget": null,
    });
    assert_eq!(
        canonicalize_params(params.as_object().unwrap(), Some("flights")),
        "flights:adults:2|destination:lisbon|nonstop:true"
    );
}

#[test]
fn empty_prefix_is_ignored() {
    let params = json!({"q": "Rome"});
    assert_eq!(
        canonicalize_params(params.as_object().unwrap(), Some("")),
        "q:rome"
    );
}

#[test]
fn input_hash_ignores_object_key_order() {
    let a = json!({"lat": 41.9, "lng": 12.5, "meta": {"b": 1, "a": 2}});
    let b = json!({"meta": {"a": 2, "b": 1}, "lng": 12.5, "lat": 41.9});
    assert_eq!(
        hash_input_for_cache(&a).unwrap(),
        hash_input_for_cache(&b).unwrap()
    );
    assert_ne!(
        hash_input_for_cache(&a).unwrap(),
        hash_input_for_cache(&json!({"lat": 41.9})).unwrap()
    );
}
