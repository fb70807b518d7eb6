//! Property-Based Tests for Cache Keys and Tiers
//!
//! # Test Properties
//!
//! 1. **Order Independence**: reordering map keys or sortable lists does
//!    not change the key
//! 2. **Whitespace/Case Insensitivity**: query keys ignore padding,
//!    repeated spaces and letter case
//! 3. **Distinctness**: different queries produce different keys
//! 4. **Bounded Length**: key length does not depend on input size
//! 5. **Round Trip**: a stored value reads back unchanged from L1

#![cfg(test)]

use proptest::prelude::*;
use serde_json::{Map, Value};

use super::backend::CacheBackend;
use super::key::{KeyNormalizer, KEY_DIGEST_LEN};
use crate::config::CacheConfig;

// =============================================================================
// Property Strategies
// =============================================================================

/// Lowercase words without surrounding whitespace
fn word_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,12}"
}

/// A query made of 1-8 words
fn query_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(word_strategy(), 1..8)
}

/// Flat parameter maps with string, number, bool and list values
fn params_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    let value = prop_oneof![
        word_strategy().prop_map(Value::String),
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::Bool),
        prop::collection::vec(any::<u16>(), 1..6)
            .prop_map(|v| Value::Array(v.into_iter().map(Value::from).collect())),
    ];
    prop::collection::btree_map("[a-z_]{1,10}", value, 0..8)
        .prop_map(|m| m.into_iter().collect())
}

fn to_object(pairs: &[(String, Value)]) -> Value {
    let map: Map<String, Value> = pairs.iter().cloned().collect();
    Value::Object(map)
}

// =============================================================================
// Key Normalization Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Insertion order of parameters does not affect the key.
    #[test]
    fn prop_param_order_independent(pairs in params_strategy()) {
        let forward = to_object(&pairs);
        let mut reversed_pairs = pairs.clone();
        reversed_pairs.reverse();
        let reversed = to_object(&reversed_pairs);

        prop_assert_eq!(
            KeyNormalizer::normalize("search", &forward),
            KeyNormalizer::normalize("search", &reversed)
        );
    }

    /// Property: Numeric lists normalize independent of element order.
    #[test]
    fn prop_list_order_independent(mut ids in prop::collection::vec(any::<u32>(), 1..20)) {
        let original = serde_json::json!({ "ids": ids.clone() });
        ids.reverse();
        let reversed = serde_json::json!({ "ids": ids });

        prop_assert_eq!(
            KeyNormalizer::normalize("p", &original),
            KeyNormalizer::normalize("p", &reversed)
        );
    }

    /// Property: Padding, repeated spaces and case do not affect query keys.
    #[test]
    fn prop_query_whitespace_and_case(words in query_strategy(), pad in 1usize..4) {
        let plain = words.join(" ");
        let spacer = " ".repeat(pad);
        let noisy = format!("{}{}{}", spacer, words.join(&spacer), spacer).to_uppercase();

        let params = Value::Null;
        prop_assert_eq!(
            CacheBackend::normalize_query_key(&plain, None, &params),
            CacheBackend::normalize_query_key(&noisy, None, &params)
        );
    }

    /// Property: Different queries produce different keys.
    #[test]
    fn prop_distinct_queries(a in query_strategy(), b in query_strategy()) {
        let a = a.join(" ");
        let b = b.join(" ");
        prop_assume!(a != b);

        let params = serde_json::json!({"page_size": 25});
        prop_assert_ne!(
            CacheBackend::normalize_query_key(&a, None, &params),
            CacheBackend::normalize_query_key(&b, None, &params)
        );
    }

    /// Property: Key length is fixed by the prefix.
    #[test]
    fn prop_key_length_bounded(words in prop::collection::vec(word_strategy(), 1..500)) {
        let key = KeyNormalizer::normalize("search", &serde_json::json!({"query": words.join(" ")}));
        prop_assert_eq!(key.len(), "search:".len() + KEY_DIGEST_LEN);
    }

    /// Property: Normalizing an already-normalized value changes nothing.
    #[test]
    fn prop_normalize_value_idempotent(pairs in params_strategy()) {
        let value = to_object(&pairs);
        if let Some(once) = KeyNormalizer::normalize_value(&value) {
            let twice = KeyNormalizer::normalize_value(&once);
            prop_assert_eq!(Some(once), twice);
        }
    }
}

// =============================================================================
// Backend Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: set then get returns the stored bytes.
    #[test]
    fn prop_round_trip(
        key in "[a-z:]{1,40}",
        value in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let backend = CacheBackend::in_memory(CacheConfig::default());
        prop_assert!(backend.set(&key, value.clone(), None, None));
        let stored = backend.get(&key);
        prop_assert_eq!(stored.as_deref(), Some(value.as_slice()));
    }
}
