//! Content hash and unique-identifier hash (spec.md §4.2).

use sha2::{Digest, Sha256};

/// A stable digest of `(search_space_id, canonical_text)`. The dedup key
/// across the whole system — two different source items with byte-identical
/// canonical text in the same search space collapse to one Document.
///
/// `canonical_text` must already have ephemerally-changing metadata
/// stripped (request ids, `indexed_at`, absolute crawl timestamps) by the
/// caller's `format_markdown`/`fetch_content` step.
pub fn content_hash(search_space_id: i64, canonical_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(search_space_id.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_text.as_bytes());
    hex(hasher.finalize().as_slice())
}

/// A stable digest of `(connector_type, source_identifier, search_space_id)`.
/// The update key for "the same source item again" across re-syncs.
pub fn unique_identifier_hash(
    connector_type: &str,
    source_identifier: &str,
    search_space_id: i64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(connector_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(source_identifier.as_bytes());
    hasher.update(b"\0");
    hasher.update(search_space_id.to_le_bytes());
    hex(hasher.finalize().as_slice())
}

/// A stable digest of user-visible connector selection options. A change
/// invalidates delta sync and forces a full scan (spec.md §4.4 step 2).
pub fn settings_hash(settings_json: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    // serde_json's Value Display/to_string is not guaranteed key-ordered for
    // maps built from arbitrary sources, so sort object keys before hashing.
    let canonical = canonicalize(settings_json);
    hasher.update(canonical.as_bytes());
    hex(hasher.finalize().as_slice())
}

fn canonicalize(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("{:?}:{}", k, canonicalize(&map[*k])));
            }
            out.push('}');
            out
        }
        serde_json::Value::Array(arr) => {
            let mut out = String::from("[");
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        }
        other => other.to_string(),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_stable_for_same_input() {
        let a = content_hash(1, "hello world");
        let b = content_hash(1, "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_differs_across_search_spaces() {
        let a = content_hash(1, "hello world");
        let b = content_hash(2, "hello world");
        assert_ne!(a, b);
    }

    #[test]
    fn content_hash_differs_on_content_change() {
        let a = content_hash(1, "hello world");
        let b = content_hash(1, "hello there");
        assert_ne!(a, b);
    }

    #[test]
    fn unique_identifier_hash_stable_across_calls() {
        let a = unique_identifier_hash("slack", "C123:169999.1", 1);
        let b = unique_identifier_hash("slack", "C123:169999.1", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn unique_identifier_hash_distinguishes_connector_types() {
        let a = unique_identifier_hash("slack", "abc", 1);
        let b = unique_identifier_hash("discord", "abc", 1);
        assert_ne!(a, b);
    }

    #[test]
    fn settings_hash_ignores_key_order() {
        let a = serde_json::json!({"folders": ["a", "b"], "include_subfolders": true});
        let b = serde_json::json!({"include_subfolders": true, "folders": ["a", "b"]});
        assert_eq!(settings_hash(&a), settings_hash(&b));
    }

    #[test]
    fn settings_hash_changes_with_value() {
        let a = serde_json::json!({"folders": ["a"]});
        let b = serde_json::json!({"folders": ["a", "b"]});
        assert_ne!(settings_hash(&a), settings_hash(&b));
    }
}
