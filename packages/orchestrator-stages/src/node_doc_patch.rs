//! `node_doc_patch`: block-level patch of one existing node doc. Unlike
//! `node_doc_build`'s full-node generate-validate-retry loop, this stage
//! touches exactly one block, enforces a citation policy, and writes an
//! append-only [`orchestrator_db::node_repo::NodeRepo::insert_revision`]
//! before/after pair.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use orchestrator_ai::{generate_json, AiClient, AiError, CompiledSchema};
use orchestrator_core::fingerprint::{canonicalize_json, hash_bytes};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::node_repo::NodeRepo;
use orchestrator_evidence::{chunk_namespace, EvidenceRetriever, RetrievalParams};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, StageError};
use crate::validate::{backfill_block_ids, scrub, validate_structure};

const SCHEMA_NAME: &str = "node_doc_block.v1";

static SCHEMA: Lazy<CompiledSchema> = Lazy::new(|| {
    CompiledSchema::compile(
        SCHEMA_NAME,
        &json!({
            "type": "object",
            "required": ["type", "content"],
            "properties": {
                "type": {"type": "string", "enum": ["heading", "paragraph", "list", "figure", "video", "quiz"]},
                "level": {"type": ["integer", "null"]},
                "content": {"type": "string"},
                "citations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["chunk_id", "quote"],
                        "properties": {"chunk_id": {"type": "string"}, "quote": {"type": "string"}, "page": {"type": ["integer", "null"]}}
                    }
                },
                "assets": {"type": "array", "items": {"type": "string"}}
            }
        }),
    )
    .expect("node_doc_block.v1 schema is a fixed literal")
});

pub struct NodeDocPatchStage {
    nodes: Arc<NodeRepo>,
    materials: Arc<MaterialRepo>,
    evidence: Arc<EvidenceRetriever>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
}

impl NodeDocPatchStage {
    pub fn new(nodes: Arc<NodeRepo>, materials: Arc<MaterialRepo>, evidence: Arc<EvidenceRetriever>, ai: Arc<dyn AiClient>, max_attempts: i32) -> Self {
        Self { nodes, materials, evidence, ai, max_attempts }
    }
}

#[async_trait::async_trait]
impl Pipeline for NodeDocPatchStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::NODE_DOC_PATCH
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let node_id = jc.payload_uuid(payload::NODE_ID)?;
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        let allow_new = jc.payload_str(payload::CITATION_POLICY) == Some("allow_new");
        let instruction = jc.payload_str(payload::INSTRUCTION).unwrap_or("Revise this block.").to_string();
        let requested_block_id = jc.payload_str(payload::BLOCK_ID).unwrap_or("0").to_string();

        let Some(existing) = self.nodes.active_doc(node_id).await? else {
            return Err(StageError::ValidationExhausted(format!("node {node_id} has no active doc to patch")));
        };

        let mut doc = existing.body.clone();
        let block_id = resolve_block_id(&doc, &requested_block_id)
            .ok_or_else(|| StageError::ValidationExhausted(format!("block `{requested_block_id}` not found in doc for node {node_id}")))?;
        let before = doc["blocks"][&block_id].clone();

        let existing_cited: HashSet<Uuid> = crate::coverage::cited_chunk_ids(&doc);

        let allowed_chunk_ids: HashSet<Uuid> = if allow_new {
            let namespace = chunk_namespace(&material_set_id);
            let file_ids: Vec<Uuid> = self.materials.files_for_set(material_set_id).await?.into_iter().map(|f| f.id).collect();
            let retrieved = self
                .evidence
                .retrieve(&namespace, &instruction, &file_ids, &RetrievalParams::default(), &[], &[])
                .await
                .map_err(StageError::Evidence)?;
            existing_cited.union(&retrieved.into_iter().collect()).copied().collect()
        } else {
            existing_cited.clone()
        };

        let system = "You revise a single block of a structured learning document. Respond only with JSON \
            matching the given schema for a single block.";
        let mut user = format!(
            "Instruction: {instruction}\n\nCurrent block:\n{before}\n\nAllowed citation chunk IDs: {}",
            allowed_chunk_ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
        );

        let mut patched: Option<Value> = None;
        let mut errors_log: Vec<String> = Vec::new();
        for attempt in 1..=self.max_attempts.max(1) {
            jc.progress(self.r#type(), 10 + attempt * 10, format!("patching block (attempt {attempt})")).await?;
            let mut candidate = match generate_json(self.ai.as_ref(), system, &user, &SCHEMA).await {
                Ok(v) => v,
                Err(AiError::SchemaRejected(msg)) => {
                    errors_log = vec![msg];
                    user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", errors_log.join("; "));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            candidate["id"] = Value::String(block_id.clone());

            let mut candidate_doc = doc.clone();
            candidate_doc["blocks"][&block_id] = candidate.clone();
            scrub(&mut candidate_doc);
            backfill_block_ids(&mut candidate_doc);

            let errors = validate_structure(&candidate_doc, &allowed_chunk_ids, &[]);
            if errors.is_empty() {
                patched = Some(candidate_doc);
                break;
            }
            errors_log = errors;
            user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", errors_log.join("; "));
        }

        let patched = patched.ok_or_else(|| StageError::ValidationExhausted(errors_log.join("; ")))?;
        let after = patched["blocks"][&block_id].clone();

        if canonicalize_json(&before) == canonicalize_json(&after) {
            jc.succeed(json!({"patched": false})).await?;
            return Ok(());
        }

        doc = patched;
        let canonical = canonicalize_json(&doc);
        let content_hash = hash_bytes(canonical.as_bytes());
        self.nodes.upsert_doc(node_id, doc, &content_hash, &existing.sources_hash, existing.quality_metrics.clone()).await?;
        self.nodes.insert_revision(existing.id, &block_id, Some(before), after).await?;

        jc.succeed(json!({"patched": true, "block_id": block_id})).await?;
        Ok(())
    }
}

/// Locates a block by stable ID, falling back to an integer position in
/// `order` when the requested identifier isn't a known block ID.
fn resolve_block_id(doc: &Value, requested: &str) -> Option<String> {
    let blocks = doc.get("blocks")?.as_object()?;
    if blocks.contains_key(requested) {
        return Some(requested.to_string());
    }
    let index: usize = requested.parse().ok()?;
    let order = doc.get("order")?.as_array()?;
    order.get(index)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_block_id_prefers_exact_id_match() {
        let doc = json!({"order": ["b0", "b1"], "blocks": {"b0": {}, "b1": {}}});
        assert_eq!(resolve_block_id(&doc, "b1"), Some("b1".to_string()));
    }

    #[test]
    fn resolve_block_id_falls_back_to_positional_index() {
        let doc = json!({"order": ["b0", "b1"], "blocks": {"b0": {}, "b1": {}}});
        assert_eq!(resolve_block_id(&doc, "1"), Some("b1".to_string()));
    }

    #[test]
    fn resolve_block_id_returns_none_when_unresolvable() {
        let doc = json!({"order": ["b0"], "blocks": {"b0": {}}});
        assert_eq!(resolve_block_id(&doc, "nope"), None);
    }
}
