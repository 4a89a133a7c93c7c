//! Scrub + structural validation shared by `node_doc_build` and
//! `node_doc_patch`.
//!
//! Canonical doc shape (a "block-list doc"):
//! ```json
//! {
//!   "title": "...",
//!   "order": ["b0", "b1", ...],
//!   "blocks": {
//!     "b0": {"id": "b0", "type": "heading", "level": 2, "content": "...", "citations": []},
//!     "b1": {"id": "b1", "type": "paragraph", "content": "...", "citations": [{"chunk_id": "...", "quote": "...", "page": 3}]}
//!   }
//! }
//! ```

use std::collections::HashSet;

use serde_json::Value;
use uuid::Uuid;

/// Meta/onboarding phrases a generator sometimes leaks into output
/// ("As an AI language model...", "I hope this helps", disclaimers) —
/// removed deterministically rather than re-prompted for.
const BANNED_PHRASES: &[&str] = &[
    "as an ai language model",
    "i hope this helps",
    "i cannot provide",
    "as a large language model",
    "let me know if you have any questions",
];

/// Strip banned phrases (case-insensitive) from every block's `content`,
/// collapsing the resulting double spaces.
pub fn scrub(doc: &mut Value) {
    let Some(blocks) = doc.get_mut("blocks").and_then(Value::as_object_mut) else { return };
    for block in blocks.values_mut() {
        let Some(content) = block.get("content").and_then(Value::as_str) else { continue };
        let scrubbed = strip_banned_phrases(content);
        block["content"] = Value::String(scrubbed);
    }
}

fn strip_banned_phrases(content: &str) -> String {
    let mut lower = content.to_ascii_lowercase();
    let mut result = content.to_string();
    for phrase in BANNED_PHRASES {
        while let Some(pos) = lower.find(phrase) {
            result.replace_range(pos..pos + phrase.len(), "");
            lower.replace_range(pos..pos + phrase.len(), "");
        }
    }
    while result.contains("  ") {
        result = result.replace("  ", " ");
    }
    result.trim().to_string()
}

/// Assigns a stable `b<index>` id to any block object missing one, and backs
/// that id into `order` at the same position.
pub fn backfill_block_ids(doc: &mut Value) {
    let Some(order) = doc.get("order").and_then(Value::as_array).cloned() else { return };
    let Some(blocks) = doc.get_mut("blocks").and_then(Value::as_object_mut) else { return };

    let mut new_order = Vec::with_capacity(order.len());
    for (index, entry) in order.into_iter().enumerate() {
        match entry.as_str() {
            Some(id) if blocks.contains_key(id) => new_order.push(Value::String(id.to_string())),
            _ => {
                // The entry itself is unusable as a key; synthesize one and,
                // if the positional block object exists without an id, wire
                // it in under the new key.
                let fresh_id = format!("b{index}");
                if let Some(mut block) = blocks.remove(&fresh_id).or_else(|| {
                    entry.as_str().and_then(|old| blocks.remove(old))
                }) {
                    block["id"] = Value::String(fresh_id.clone());
                    blocks.insert(fresh_id.clone(), block);
                }
                new_order.push(Value::String(fresh_id));
            }
        }
    }
    doc["order"] = Value::Array(new_order);
}

/// Structural validation. Returns every violation found; an empty vec means
/// the doc is valid.
pub fn validate_structure(doc: &Value, allowed_chunk_ids: &HashSet<Uuid>, must_cite: &[Uuid]) -> Vec<String> {
    let mut violations = Vec::new();

    let order: Vec<String> = doc
        .get("order")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let blocks = doc.get("blocks").and_then(Value::as_object);

    if order.is_empty() {
        violations.push("doc has an empty `order`".to_string());
    }

    let mut seen_ids = HashSet::new();
    let mut cited: HashSet<Uuid> = HashSet::new();

    for id in &order {
        if !seen_ids.insert(id.clone()) {
            violations.push(format!("duplicate block id `{id}` in order"));
        }
        let Some(blocks) = blocks else {
            violations.push(format!("block `{id}` referenced in order but doc has no `blocks` map"));
            continue;
        };
        let Some(block) = blocks.get(id) else {
            violations.push(format!("block `{id}` referenced in order but missing from blocks"));
            continue;
        };

        if block.get("type").and_then(Value::as_str) == Some("heading") {
            match block.get("level").and_then(Value::as_i64) {
                Some(level) if (2..=4).contains(&level) => {}
                Some(level) => violations.push(format!("block `{id}` has heading level {level}, must be 2, 3, or 4")),
                None => violations.push(format!("block `{id}` is a heading but has no `level`")),
            }
        }

        if let Some(citations) = block.get("citations").and_then(Value::as_array) {
            for citation in citations {
                let Some(chunk_id) = citation.get("chunk_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok()) else {
                    violations.push(format!("block `{id}` has a citation with no valid chunk_id"));
                    continue;
                };
                if !allowed_chunk_ids.contains(&chunk_id) {
                    violations.push(format!("block `{id}` cites chunk `{chunk_id}` outside the allowed set"));
                }
                cited.insert(chunk_id);
            }
        }
    }

    for required in must_cite {
        if !cited.contains(required) {
            violations.push(format!("must-cite chunk `{required}` appears in no block's citations"));
        }
    }

    violations
}

/// Attempts to repair a missing-must-cite violation by appending a citation
/// record to the first block that already carries at least one citation.
/// Returns `true` if every chunk in `missing` could be injected (i.e. at
/// least one cite-bearing block exists).
pub fn inject_missing_must_cite(doc: &mut Value, missing: &[Uuid], quote_for: impl Fn(Uuid) -> Option<(String, Option<i64>)>) -> bool {
    let Some(blocks) = doc.get_mut("blocks").and_then(Value::as_object_mut) else { return false };

    let target_id = blocks
        .iter()
        .find(|(_, block)| block.get("citations").and_then(Value::as_array).map(|a| !a.is_empty()).unwrap_or(false))
        .map(|(id, _)| id.clone());

    let Some(target_id) = target_id else { return false };
    let Some(target) = blocks.get_mut(&target_id) else { return false };
    let Some(citations) = target.get_mut("citations").and_then(Value::as_array_mut) else { return false };

    for &chunk_id in missing {
        let (quote, page) = quote_for(chunk_id).unwrap_or((String::new(), None));
        citations.push(serde_json::json!({
            "chunk_id": chunk_id,
            "quote": quote,
            "page": page,
        }));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scrub_removes_banned_phrases_case_insensitively() {
        let mut doc = json!({
            "blocks": {"b0": {"content": "As an AI language model, photosynthesis converts light to energy."}}
        });
        scrub(&mut doc);
        let content = doc["blocks"]["b0"]["content"].as_str().unwrap();
        assert!(!content.to_ascii_lowercase().contains("as an ai language model"));
        assert!(content.contains("photosynthesis"));
    }

    #[test]
    fn backfill_assigns_positional_ids_to_unnamed_blocks() {
        let mut doc = json!({
            "order": ["", "b1"],
            "blocks": {"b1": {"id": "b1", "content": "x"}}
        });
        backfill_block_ids(&mut doc);
        let order: Vec<String> = doc["order"].as_array().unwrap().iter().map(|v| v.as_str().unwrap().to_string()).collect();
        assert_eq!(order, vec!["b0".to_string(), "b1".to_string()]);
    }

    #[test]
    fn validate_structure_flags_out_of_scope_citation() {
        let allowed: HashSet<Uuid> = [Uuid::new_v4()].into_iter().collect();
        let rogue = Uuid::new_v4();
        let doc = json!({
            "order": ["b0"],
            "blocks": {"b0": {"citations": [{"chunk_id": rogue.to_string()}]}}
        });
        let violations = validate_structure(&doc, &allowed, &[]);
        assert!(violations.iter().any(|v| v.contains("outside the allowed set")));
    }

    #[test]
    fn validate_structure_flags_missing_must_cite() {
        let chunk = Uuid::new_v4();
        let allowed: HashSet<Uuid> = [chunk].into_iter().collect();
        let doc = json!({"order": ["b0"], "blocks": {"b0": {"citations": []}}});
        let violations = validate_structure(&doc, &allowed, &[chunk]);
        assert!(violations.iter().any(|v| v.contains("appears in no block")));
    }

    #[test]
    fn validate_structure_rejects_invalid_heading_level() {
        let doc = json!({"order": ["b0"], "blocks": {"b0": {"type": "heading", "level": 1, "citations": []}}});
        let violations = validate_structure(&doc, &HashSet::new(), &[]);
        assert!(violations.iter().any(|v| v.contains("heading level")));
    }

    #[test]
    fn validate_structure_rejects_heading_with_no_level() {
        let doc = json!({"order": ["b0"], "blocks": {"b0": {"type": "heading", "citations": []}}});
        let violations = validate_structure(&doc, &HashSet::new(), &[]);
        assert!(violations.iter().any(|v| v.contains("no `level`")));
    }

    #[test]
    fn validate_structure_ignores_level_on_non_heading_blocks() {
        let doc = json!({"order": ["b0"], "blocks": {"b0": {"type": "paragraph", "citations": []}}});
        let violations = validate_structure(&doc, &HashSet::new(), &[]);
        assert!(violations.is_empty());
    }

    #[test]
    fn inject_missing_must_cite_appends_to_first_cite_bearing_block() {
        let chunk = Uuid::new_v4();
        let mut doc = json!({
            "blocks": {
                "b0": {"citations": []},
                "b1": {"citations": [{"chunk_id": Uuid::new_v4().to_string()}]},
            }
        });
        let injected = inject_missing_must_cite(&mut doc, &[chunk], |_| Some(("a quote".to_string(), Some(2))));
        assert!(injected);
        let b1_citations = doc["blocks"]["b1"]["citations"].as_array().unwrap();
        assert_eq!(b1_citations.len(), 2);
        assert!(doc["blocks"]["b0"]["citations"].as_array().unwrap().is_empty());
    }
}
