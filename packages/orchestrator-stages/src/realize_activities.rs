//! `realize_activities`: proposes a handful of retrieval-grounded practice
//! activities (short exercises/quiz prompts) per `PathNode` and writes them
//! into `path_node.metadata.activities`, using the same evidence retrieval
//! path as `node_doc_build` and figure/video planning.

use std::sync::Arc;

use once_cell::sync::Lazy;
use orchestrator_ai::{generate_json, AiClient, AiError, CompiledSchema};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::node_repo::NodeRepo;
use orchestrator_evidence::{chunk_namespace, EvidenceRetriever, RetrievalParams};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, StageError};

const SCHEMA_NAME: &str = "activities.v1";

static SCHEMA: Lazy<CompiledSchema> = Lazy::new(|| {
    CompiledSchema::compile(
        SCHEMA_NAME,
        &json!({
            "type": "object",
            "required": ["activities"],
            "properties": {
                "activities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["kind", "prompt"],
                        "properties": {
                            "kind": {"type": "string", "enum": ["quiz", "exercise", "reflection"]},
                            "prompt": {"type": "string", "minLength": 1},
                            "answer_hint": {"type": "string"}
                        }
                    }
                }
            }
        }),
    )
    .expect("activities.v1 schema is a fixed literal")
});

pub struct RealizeActivitiesStage {
    nodes: Arc<NodeRepo>,
    materials: Arc<MaterialRepo>,
    evidence: Arc<EvidenceRetriever>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
}

impl RealizeActivitiesStage {
    pub fn new(nodes: Arc<NodeRepo>, materials: Arc<MaterialRepo>, evidence: Arc<EvidenceRetriever>, ai: Arc<dyn AiClient>, max_attempts: i32) -> Self {
        Self { nodes, materials, evidence, ai, max_attempts }
    }
}

#[async_trait::async_trait]
impl Pipeline for RealizeActivitiesStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::REALIZE_ACTIVITIES
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;

        let file_ids: Vec<Uuid> = self.materials.files_for_set(material_set_id).await?.into_iter().map(|f| f.id).collect();
        let namespace = chunk_namespace(&material_set_id);
        let nodes = self.nodes.list_for_path(path_id).await?;

        let mut realized = 0i64;
        for (i, node) in nodes.iter().enumerate() {
            if jc.is_canceled().await? {
                jc.fail(self.r#type(), "canceled").await?;
                return Ok(());
            }
            jc.progress(self.r#type(), (i as i32 * 100 / nodes.len().max(1)).min(95), node.title.clone()).await?;

            if node.metadata.get("activities").and_then(Value::as_array).map(|a| !a.is_empty()).unwrap_or(false) {
                continue;
            }

            let goal = node.metadata.get("goal").and_then(Value::as_str).unwrap_or(&node.title);
            let chunk_ids = self
                .evidence
                .retrieve(&namespace, goal, &file_ids, &RetrievalParams::default(), &[], &[])
                .await
                .map_err(StageError::Evidence)?;
            let chunks = self.materials.chunks_by_ids(&chunk_ids).await?;
            let excerpts = chunks.iter().map(|c| format!("{} | {}", c.id, truncate(&c.text, 300))).collect::<Vec<_>>().join("\n");

            let system = "You propose a short list of practice activities (quiz questions, exercises, or \
                reflection prompts) for a learning unit, grounded only in the given excerpts. Respond only \
                with JSON matching the given schema.";
            let mut user = format!("Unit goal: {goal}\n\nExcerpts:\n{excerpts}");

            let mut activities: Option<Vec<Value>> = None;
            let mut last_errors = Vec::new();
            for _attempt in 1..=self.max_attempts.max(1) {
                let candidate = match generate_json(self.ai.as_ref(), system, &user, &SCHEMA).await {
                    Ok(v) => v,
                    Err(AiError::SchemaRejected(msg)) => {
                        last_errors = vec![msg];
                        user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
                        continue;
                    }
                    Err(e) => return Err(StageError::from(e)),
                };
                let items = candidate["activities"].as_array().cloned().unwrap_or_default();
                let errors = validate_activities(&items);
                if errors.is_empty() {
                    activities = Some(items);
                    break;
                }
                last_errors = errors;
                user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
            }
            let activities = activities.ok_or_else(|| StageError::ValidationExhausted(last_errors.join("; ")))?;

            self.nodes.merge_metadata(node.id, json!({"activities": activities})).await?;
            realized += 1;
        }

        jc.succeed(json!({"nodes_realized": realized})).await?;
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn validate_activities(activities: &[Value]) -> Vec<String> {
    let mut errors = Vec::new();
    if activities.is_empty() {
        errors.push("activities must be non-empty".to_string());
    }
    for (i, activity) in activities.iter().enumerate() {
        if activity["prompt"].as_str().map(str::trim).unwrap_or_default().is_empty() {
            errors.push(format!("activity {i} has an empty prompt"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_activities_rejects_empty_list() {
        assert!(!validate_activities(&[]).is_empty());
    }

    #[test]
    fn validate_activities_rejects_blank_prompt() {
        let activities = vec![json!({"kind": "quiz", "prompt": "   "})];
        assert!(!validate_activities(&activities).is_empty());
    }

    #[test]
    fn validate_activities_accepts_well_formed_list() {
        let activities = vec![json!({"kind": "quiz", "prompt": "What is photosynthesis?"})];
        assert!(validate_activities(&activities).is_empty());
    }
}
