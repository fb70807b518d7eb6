//! Cache Key Normalization
//!
//! Derives short, deterministic cache keys from a namespace prefix and an
//! arbitrary parameter set. Semantically identical requests map to the
//! same key regardless of whitespace, parameter order, list order or
//! `null` versus omitted values.
//!
//! # Rules
//!
//! - Strings are NFKC-normalized, trimmed and internal whitespace is
//!   collapsed; empty strings count as absent
//! - `null` values and empty lists/maps are dropped
//! - Booleans render as `"true"` / `"false"`
//! - Lists are sorted when all elements are strings or all are numbers,
//!   otherwise insertion order is kept
//! - Maps are normalized recursively and serialized with sorted keys
//!
//! The canonical form is hashed with SHA-256, so key length does not
//! depend on input size.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::Value;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Number of hex characters of the digest kept in a key (128 bits)
pub const KEY_DIGEST_LEN: usize = 32;

/// Deterministic cache-key derivation
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyNormalizer;

impl KeyNormalizer {
    /// Build a key `"{prefix}:{digest}"` from a parameter set
    ///
    /// Non-object `params` are treated as `{"value": params}`.
    pub fn normalize(prefix: &str, params: &Value) -> String {
        let canonical = Self::canonical_form(params);
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        let digest = &digest[..KEY_DIGEST_LEN];

        if prefix.is_empty() {
            digest.to_string()
        } else {
            format!("{}:{}", prefix, digest)
        }
    }

    /// Canonical serialized form of a parameter set (before hashing)
    pub fn canonical_form(params: &Value) -> String {
        let normalized = match params {
            Value::Object(_) => Self::normalize_value(params),
            other => Self::normalize_value(other).map(|v| {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), v);
                Value::Object(map)
            }),
        };

        let mut out = String::new();
        match normalized {
            Some(value) => write_canonical(&value, &mut out),
            None => out.push_str("{}"),
        }
        out
    }

    /// Normalize free text: NFKC, trimmed, whitespace collapsed
    ///
    /// Returns `None` for empty or whitespace-only input.
    pub fn normalize_text(text: &str) -> Option<String> {
        let nfkc: String = text.nfkc().collect();
        let collapsed = nfkc.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }

    /// Normalize a search query: text normalization plus case folding
    pub fn normalize_query(query: &str) -> Option<String> {
        Self::normalize_text(query).map(|q| q.to_lowercase())
    }

    /// Normalize a single value; `None` means "absent"
    pub fn normalize_value(value: &Value) -> Option<Value> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Value::String(b.to_string())),
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => Self::normalize_text(s).map(Value::String),
            Value::Array(items) => {
                let mut normalized: Vec<Value> =
                    items.iter().filter_map(Self::normalize_value).collect();
                if normalized.is_empty() {
                    return None;
                }
                sort_if_orderable(&mut normalized);
                Some(Value::Array(normalized))
            }
            Value::Object(map) => {
                let normalized: serde_json::Map<String, Value> = map
                    .iter()
                    .filter_map(|(k, v)| Self::normalize_value(v).map(|v| (k.clone(), v)))
                    .collect();
                if normalized.is_empty() {
                    None
                } else {
                    Some(Value::Object(normalized))
                }
            }
        }
    }
}

/// Sort a list when its elements are mutually orderable
fn sort_if_orderable(items: &mut [Value]) {
    if items.iter().all(Value::is_string) {
        items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    } else if items.iter().all(Value::is_number) {
        items.sort_by(|a, b| {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        });
    }
}

/// Serialize with object keys sorted, independent of serde_json's map order
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (k, v)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_json_string(s, out),
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    // Value's Display is valid, escaped JSON
    let _ = write!(out, "{}", Value::String(s.to_string()));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_format() {
        let key = KeyNormalizer::normalize("search", &json!({"query": "cancer"}));
        assert!(key.starts_with("search:"));
        assert_eq!(key.len(), "search:".len() + KEY_DIGEST_LEN);

        let bare = KeyNormalizer::normalize("", &json!({"query": "cancer"}));
        assert_eq!(bare.len(), KEY_DIGEST_LEN);
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        let a = KeyNormalizer::normalize("search", &json!({"query": "  malaria   vaccine "}));
        let b = KeyNormalizer::normalize("search", &json!({"query": "malaria vaccine"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_none_and_empty_are_absent() {
        let empty = KeyNormalizer::normalize("p", &json!({}));
        assert_eq!(KeyNormalizer::normalize("p", &json!({"x": null})), empty);
        assert_eq!(KeyNormalizer::normalize("p", &json!({"x": "   "})), empty);
        assert_eq!(KeyNormalizer::normalize("p", &json!({"x": []})), empty);
        assert_eq!(KeyNormalizer::normalize("p", &json!({"x": {}})), empty);
        assert_eq!(KeyNormalizer::normalize("p", &json!({"x": {"y": null}})), empty);
    }

    #[test]
    fn test_booleans_render_lowercase() {
        assert_eq!(
            KeyNormalizer::canonical_form(&json!({"synonym": true})),
            r#"{"synonym":"true"}"#
        );
    }

    #[test]
    fn test_lists_are_sorted() {
        let a = KeyNormalizer::normalize("p", &json!({"ids": [3, 1, 2]}));
        let b = KeyNormalizer::normalize("p", &json!({"ids": [1, 2, 3]}));
        assert_eq!(a, b);

        let c = KeyNormalizer::normalize("p", &json!({"src": ["PMC", "MED"]}));
        let d = KeyNormalizer::normalize("p", &json!({"src": ["MED", "PMC"]}));
        assert_eq!(c, d);
    }

    #[test]
    fn test_mixed_lists_keep_insertion_order() {
        assert_eq!(
            KeyNormalizer::canonical_form(&json!({"mixed": ["b", 1, "a"]})),
            r#"{"mixed":["b",1,"a"]}"#
        );
    }

    #[test]
    fn test_nested_maps_normalized() {
        let a = KeyNormalizer::normalize(
            "p",
            &json!({"filter": {"b": " two ", "a": [2, 1], "c": null}}),
        );
        let b = KeyNormalizer::normalize("p", &json!({"filter": {"a": [1, 2], "b": "two"}}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_unicode_normalization() {
        // Full-width letters fold to ASCII under NFKC
        let a = KeyNormalizer::normalize("p", &json!({"q": "ＤＮＡ"}));
        let b = KeyNormalizer::normalize("p", &json!({"q": "DNA"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_requests_differ() {
        let a = KeyNormalizer::normalize("search", &json!({"query": "cancer", "page_size": 25}));
        let b = KeyNormalizer::normalize("search", &json!({"query": "cancer", "page_size": 100}));
        let c = KeyNormalizer::normalize("search", &json!({"query": "malaria", "page_size": 25}));
        let d = KeyNormalizer::normalize("record", &json!({"query": "cancer", "page_size": 25}));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_length_is_bounded() {
        let long_query = vec!["word"; 1000].join(" ");
        let key = KeyNormalizer::normalize("search", &json!({"query": long_query}));
        assert!(key.len() < 50, "key too long: {}", key.len());
    }

    #[test]
    fn test_non_object_params_wrapped() {
        assert_eq!(
            KeyNormalizer::canonical_form(&json!("PMC123")),
            r#"{"value":"PMC123"}"#
        );
    }

    #[test]
    fn test_normalize_query_folds_case() {
        assert_eq!(
            KeyNormalizer::normalize_query("  CRISPR   Cas9 "),
            Some("crispr cas9".to_string())
        );
        assert_eq!(KeyNormalizer::normalize_query("   "), None);
    }
}
