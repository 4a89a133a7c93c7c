//! `concept_graph_build`: the first AI-authored canonical write in the DAG.
//! Proposes a concept hierarchy grounded in the material corpus, validates
//! it structurally, and persists it under the per-path advisory lock.
//! Re-running when concepts already exist returns immediately with no
//! writes; two workers racing to claim this stage for the same path settle
//! so that one commits and the other observes existing concepts and
//! returns `ConceptsMade=0`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use orchestrator_ai::{generate_json, AiClient, AiError, CompiledSchema};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::concept_repo::ConceptRepo;
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::path_repo::PathRepo;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, StageError};

const SCHEMA_NAME: &str = "concept_graph.v1";

static SCHEMA: Lazy<CompiledSchema> = Lazy::new(|| {
    CompiledSchema::compile(
        SCHEMA_NAME,
        &json!({
            "type": "object",
            "required": ["concepts", "edges", "evidence"],
            "properties": {
                "concepts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["key", "title"],
                        "properties": {
                            "key": {"type": "string", "minLength": 1},
                            "title": {"type": "string", "minLength": 1},
                            "parent_key": {"type": ["string", "null"]}
                        }
                    }
                },
                "edges": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["from_key", "to_key", "relation"],
                        "properties": {
                            "from_key": {"type": "string"},
                            "to_key": {"type": "string"},
                            "relation": {"type": "string"}
                        }
                    }
                },
                "evidence": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["concept_key", "chunk_id"],
                        "properties": {
                            "concept_key": {"type": "string"},
                            "chunk_id": {"type": "string"}
                        }
                    }
                }
            }
        }),
    )
    .expect("concept_graph.v1 schema is a fixed literal")
});

pub struct ConceptGraphBuildStage {
    paths: Arc<PathRepo>,
    materials: Arc<MaterialRepo>,
    concepts: Arc<ConceptRepo>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
    max_chunks: usize,
}

impl ConceptGraphBuildStage {
    pub fn new(paths: Arc<PathRepo>, materials: Arc<MaterialRepo>, concepts: Arc<ConceptRepo>, ai: Arc<dyn AiClient>, max_attempts: i32, max_chunks: usize) -> Self {
        Self { paths, materials, concepts, ai, max_attempts, max_chunks }
    }
}

#[async_trait]
impl Pipeline for ConceptGraphBuildStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::CONCEPT_GRAPH_BUILD
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        let path_id = jc.payload_uuid(payload::PATH_ID)?;

        if self.concepts.exists_for_path(path_id).await? {
            jc.succeed(json!({"concepts_made": 0, "skipped": true})).await?;
            return Ok(());
        }

        let path = self.paths.find(path_id).await?;
        let goal = path.metadata.get("intake").and_then(|i| i.get("goal")).and_then(Value::as_str).unwrap_or("general overview");

        let mut chunks = self.materials.all_chunks_for_set(material_set_id).await?;
        chunks.truncate(self.max_chunks);
        let allowed_chunk_ids: HashSet<Uuid> = chunks.iter().map(|c| c.id).collect();

        let system = "You design a concept hierarchy for a learning path from source excerpts. \
            Respond only with JSON matching the given schema.";
        let mut user = build_prompt(goal, &chunks);

        let mut proposal: Option<Value> = None;
        let mut last_errors: Vec<String> = Vec::new();
        for attempt in 1..=self.max_attempts.max(1) {
            jc.progress(self.r#type(), 10 + attempt * 10, format!("generating concept graph (attempt {attempt})")).await?;
            let candidate = match generate_json(self.ai.as_ref(), system, &user, &SCHEMA).await {
                Ok(v) => v,
                Err(AiError::SchemaRejected(msg)) => {
                    last_errors = vec![msg];
                    user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
                    continue;
                }
                Err(e) => return Err(StageError::from(e)),
            };

            let errors = validate_proposal(&candidate, &allowed_chunk_ids);
            if errors.is_empty() {
                proposal = Some(candidate);
                break;
            }
            last_errors = errors;
            user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
        }

        let proposal = proposal.ok_or_else(|| StageError::ValidationExhausted(last_errors.join("; ")))?;

        jc.progress(self.r#type(), 80, "persisting concept graph".to_string()).await?;
        let mut tx = crate::canonical::begin_locked(self.concepts.pool(), "concept_graph", path_id).await?;

        if self.concepts.exists_for_path(path_id).await? {
            tx.rollback().await.map_err(orchestrator_db::DbError::from)?;
            jc.succeed(json!({"concepts_made": 0, "skipped": true})).await?;
            return Ok(());
        }

        let mut key_to_id: HashMap<String, Uuid> = HashMap::new();
        let concepts_arr = proposal["concepts"].as_array().cloned().unwrap_or_default();

        // First pass: top-level concepts (no parent_key), so parent ids are
        // always known by the time a child references them.
        for concept in concepts_arr.iter().filter(|c| c.get("parent_key").and_then(Value::as_str).is_none()) {
            let key = concept["key"].as_str().unwrap_or_default();
            let title = concept["title"].as_str().unwrap_or(key);
            let id = self.concepts.insert_concept_tx(&mut tx, path_id, key, None, title, json!({})).await?;
            key_to_id.insert(key.to_string(), id);
        }
        for concept in concepts_arr.iter().filter(|c| c.get("parent_key").and_then(Value::as_str).is_some()) {
            let key = concept["key"].as_str().unwrap_or_default();
            let title = concept["title"].as_str().unwrap_or(key);
            let parent_key = concept["parent_key"].as_str().unwrap_or_default();
            let parent_id = key_to_id.get(parent_key).copied();
            let id = self.concepts.insert_concept_tx(&mut tx, path_id, key, parent_id, title, json!({})).await?;
            key_to_id.insert(key.to_string(), id);
        }

        for edge in proposal["edges"].as_array().cloned().unwrap_or_default() {
            let (Some(from), Some(to), Some(relation)) = (
                edge["from_key"].as_str().and_then(|k| key_to_id.get(k)),
                edge["to_key"].as_str().and_then(|k| key_to_id.get(k)),
                edge["relation"].as_str(),
            ) else {
                continue;
            };
            self.concepts.insert_edge_tx(&mut tx, path_id, *from, *to, relation).await?;
        }

        for evidence in proposal["evidence"].as_array().cloned().unwrap_or_default() {
            let Some(concept_id) = evidence["concept_key"].as_str().and_then(|k| key_to_id.get(k)) else { continue };
            let Some(chunk_id) = evidence["chunk_id"].as_str().and_then(|s| Uuid::parse_str(s).ok()) else { continue };
            if !allowed_chunk_ids.contains(&chunk_id) {
                continue;
            }
            self.concepts.insert_evidence_tx(&mut tx, *concept_id, chunk_id).await?;
        }

        tx.commit().await.map_err(orchestrator_db::DbError::from)?;

        jc.succeed(json!({"concepts_made": key_to_id.len(), "skipped": false})).await?;
        Ok(())
    }
}

fn build_prompt(goal: &str, chunks: &[orchestrator_db::material_repo::ChunkRow]) -> String {
    let mut out = format!("Learning goal: {goal}\n\nSource excerpts (id | text):\n");
    for chunk in chunks {
        out.push_str(&format!("{} | {}\n", chunk.id, truncate(&chunk.text, 400)));
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn validate_proposal(candidate: &Value, allowed_chunk_ids: &HashSet<Uuid>) -> Vec<String> {
    let mut errors = Vec::new();
    let concepts = candidate["concepts"].as_array().cloned().unwrap_or_default();
    if concepts.is_empty() {
        errors.push("concepts must be non-empty".to_string());
    }

    let mut keys = HashSet::new();
    for concept in &concepts {
        let Some(key) = concept["key"].as_str() else {
            errors.push("every concept needs a key".to_string());
            continue;
        };
        if !keys.insert(key.to_string()) {
            errors.push(format!("duplicate concept key: {key}"));
        }
    }
    for concept in &concepts {
        if let Some(parent_key) = concept.get("parent_key").and_then(Value::as_str) {
            if !keys.contains(parent_key) {
                errors.push(format!("parent_key {parent_key} does not reference a concept in this proposal"));
            }
        }
    }

    for edge in candidate["edges"].as_array().cloned().unwrap_or_default() {
        let from = edge["from_key"].as_str().unwrap_or_default();
        let to = edge["to_key"].as_str().unwrap_or_default();
        if !keys.contains(from) || !keys.contains(to) {
            errors.push(format!("edge {from}->{to} references an unknown concept key"));
        }
    }

    for evidence in candidate["evidence"].as_array().cloned().unwrap_or_default() {
        let concept_key = evidence["concept_key"].as_str().unwrap_or_default();
        if !keys.contains(concept_key) {
            errors.push(format!("evidence references unknown concept key: {concept_key}"));
        }
        match evidence["chunk_id"].as_str().and_then(|s| Uuid::parse_str(s).ok()) {
            Some(chunk_id) if allowed_chunk_ids.contains(&chunk_id) => {}
            _ => errors.push("evidence chunk_id is missing or out of scope".to_string()),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_proposal_rejects_unknown_parent_key() {
        let candidate = json!({
            "concepts": [{"key": "a", "title": "A", "parent_key": "missing"}],
            "edges": [],
            "evidence": [],
        });
        let errors = validate_proposal(&candidate, &HashSet::new());
        assert!(errors.iter().any(|e| e.contains("parent_key")));
    }

    #[test]
    fn validate_proposal_accepts_well_formed_graph() {
        let chunk_id = Uuid::new_v4();
        let candidate = json!({
            "concepts": [{"key": "a", "title": "A", "parent_key": null}],
            "edges": [],
            "evidence": [{"concept_key": "a", "chunk_id": chunk_id.to_string()}],
        });
        let mut allowed = HashSet::new();
        allowed.insert(chunk_id);
        assert!(validate_proposal(&candidate, &allowed).is_empty());
    }

    #[test]
    fn validate_proposal_rejects_duplicate_keys() {
        let candidate = json!({
            "concepts": [{"key": "a", "title": "A"}, {"key": "a", "title": "A2"}],
            "edges": [],
            "evidence": [],
        });
        assert!(validate_proposal(&candidate, &HashSet::new()).iter().any(|e| e.contains("duplicate")));
    }

    #[test]
    fn validate_proposal_rejects_evidence_outside_allowed_chunks() {
        let candidate = json!({
            "concepts": [{"key": "a", "title": "A"}],
            "edges": [],
            "evidence": [{"concept_key": "a", "chunk_id": Uuid::new_v4().to_string()}],
        });
        assert!(validate_proposal(&candidate, &HashSet::new()).iter().any(|e| e.contains("out of scope")));
    }
}
