//! Fingerprinting & dedup primitives.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// `sha256_hex(bytes)`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}


/// Marshal a JSON value with stable key ordering and no whitespace, so two
/// semantically-equal documents hash identically regardless of how their
/// fields were constructed.
pub fn canonicalize_json(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&sort_keys(value)).expect("canonical JSON is always serializable")
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// `sha256("<pv>|schema=<sv>|chunks=<sortedDeduped,,>")`.
pub fn hash_sources(prompt_version: &str, schema_version: &str, chunk_ids: &[String]) -> String {
    let mut sorted: Vec<String> = chunk_ids.to_vec();
    sorted.sort();
    sorted.dedup();
    let joined = sorted.join(",");
    let input = format!("{prompt_version}|schema={schema_version}|chunks={joined}");
    hash_bytes(input.as_bytes())
}

/// `sha256_hex` of the canonical bytes of a generated artifact.
pub fn content_hash(value: &Value) -> String {
    hash_bytes(&canonicalize_json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_is_order_independent() {
        let a = json!({"b": 1, "a": 2, "nested": {"z": 1, "y": 2}});
        let b = json!({"a": 2, "nested": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(canonicalize_json(&a), canonicalize_json(&b));
    }

    #[test]
    fn content_hash_stable_across_key_order() {
        let a = json!({"title": "x", "blocks": []});
        let b = json!({"blocks": [], "title": "x"});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_sources_dedupes_and_sorts_chunk_ids() {
        let a = hash_sources("v1", "s1", &["c2".into(), "c1".into(), "c2".into()]);
        let b = hash_sources("v1", "s1", &["c1".into(), "c2".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_sources_differs_on_prompt_version() {
        let a = hash_sources("v1", "s1", &["c1".into()]);
        let b = hash_sources("v2", "s1", &["c1".into()]);
        assert_ne!(a, b);
    }
}
