//! `path_plan_build`: turns the concept graph into an ordered curriculum —
//! one `PathNode` per unit under the path, each carrying its learning goal,
//! the concept keys it covers, and its activity slots in `metadata`.
//! Downstream figure/video/doc/activity stages all fan out over
//! `NodeRepo::list_for_path`.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use orchestrator_ai::{generate_json, AiClient, AiError, CompiledSchema};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::concept_repo::ConceptRepo;
use orchestrator_db::node_repo::NodeRepo;
use orchestrator_db::path_repo::PathRepo;
use serde_json::{json, Value};

use crate::error::{Result, StageError};

const SCHEMA_NAME: &str = "path_plan.v1";

static SCHEMA: Lazy<CompiledSchema> = Lazy::new(|| {
    CompiledSchema::compile(
        SCHEMA_NAME,
        &json!({
            "type": "object",
            "required": ["nodes"],
            "properties": {
                "nodes": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["title", "goal", "concept_keys"],
                        "properties": {
                            "title": {"type": "string", "minLength": 1},
                            "goal": {"type": "string", "minLength": 1},
                            "concept_keys": {"type": "array", "items": {"type": "string"}}
                        }
                    }
                }
            }
        }),
    )
    .expect("path_plan.v1 schema is a fixed literal")
});

pub struct PathPlanBuildStage {
    paths: Arc<PathRepo>,
    concepts: Arc<ConceptRepo>,
    nodes: Arc<NodeRepo>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
}

impl PathPlanBuildStage {
    pub fn new(paths: Arc<PathRepo>, concepts: Arc<ConceptRepo>, nodes: Arc<NodeRepo>, ai: Arc<dyn AiClient>, max_attempts: i32) -> Self {
        Self { paths, concepts, nodes, ai, max_attempts }
    }
}

#[async_trait]
impl Pipeline for PathPlanBuildStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::PATH_PLAN_BUILD
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;

        if !self.nodes.list_for_path(path_id).await?.is_empty() {
            jc.succeed(json!({"nodes_made": 0, "skipped": true})).await?;
            return Ok(());
        }

        let path = self.paths.find(path_id).await?;
        let goal = path.metadata.get("intake").and_then(|i| i.get("goal")).and_then(Value::as_str).unwrap_or("general overview");
        let concepts = self.concepts.list_for_path(path_id).await?;
        let known_keys: HashSet<String> = concepts.iter().map(|c| c.key.clone()).collect();

        let system = "You design an ordered curriculum of learning units from a concept graph. \
            Respond only with JSON matching the given schema.";
        let concept_listing = concepts.iter().map(|c| format!("{} ({})", c.key, c.title)).collect::<Vec<_>>().join("\n");
        let mut user = format!("Learning goal: {goal}\n\nConcepts available:\n{concept_listing}");

        let mut plan: Option<Vec<Value>> = None;
        let mut last_errors: Vec<String> = Vec::new();
        for attempt in 1..=self.max_attempts.max(1) {
            jc.progress(self.r#type(), 10 + attempt * 10, format!("planning curriculum (attempt {attempt})")).await?;
            let candidate = match generate_json(self.ai.as_ref(), system, &user, &SCHEMA).await {
                Ok(v) => v,
                Err(AiError::SchemaRejected(msg)) => {
                    last_errors = vec![msg];
                    user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
                    continue;
                }
                Err(e) => return Err(StageError::from(e)),
            };

            let nodes = candidate["nodes"].as_array().cloned().unwrap_or_default();
            let errors = validate_plan(&nodes, &known_keys);
            if errors.is_empty() {
                plan = Some(nodes);
                break;
            }
            last_errors = errors;
            user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
        }

        let plan = plan.ok_or_else(|| StageError::ValidationExhausted(last_errors.join("; ")))?;

        jc.progress(self.r#type(), 80, "persisting curriculum".to_string()).await?;
        let mut tx = crate::canonical::begin_locked(self.nodes.pool(), "path_plan", path_id).await?;

        if !self.nodes.list_for_path(path_id).await?.is_empty() {
            tx.rollback().await.map_err(orchestrator_db::DbError::from)?;
            jc.succeed(json!({"nodes_made": 0, "skipped": true})).await?;
            return Ok(());
        }

        let mut made = 0i64;
        for (position, node) in plan.iter().enumerate() {
            let title = node["title"].as_str().unwrap_or("Untitled");
            let node_goal = node["goal"].as_str().unwrap_or(goal);
            let concept_keys: Vec<String> = node["concept_keys"].as_array().cloned().unwrap_or_default().iter().filter_map(|v| v.as_str().map(String::from)).collect();
            self.nodes
                .insert_node_tx(&mut tx, path_id, position as i32, title, json!({"goal": node_goal, "concept_keys": concept_keys, "activities": []}))
                .await?;
            made += 1;
        }

        tx.commit().await.map_err(orchestrator_db::DbError::from)?;

        jc.succeed(json!({"nodes_made": made, "skipped": false})).await?;
        Ok(())
    }
}

fn validate_plan(nodes: &[Value], known_keys: &HashSet<String>) -> Vec<String> {
    let mut errors = Vec::new();
    if nodes.is_empty() {
        errors.push("nodes must be non-empty".to_string());
    }
    for node in nodes {
        let Some(title) = node["title"].as_str() else {
            errors.push("every node needs a title".to_string());
            continue;
        };
        let concept_keys = node["concept_keys"].as_array().cloned().unwrap_or_default();
        for key in &concept_keys {
            let Some(key) = key.as_str() else { continue };
            if !known_keys.contains(key) {
                errors.push(format!("node {title} references unknown concept key: {key}"));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_plan_rejects_empty_node_list() {
        assert!(!validate_plan(&[], &HashSet::new()).is_empty());
    }

    #[test]
    fn validate_plan_rejects_unknown_concept_key() {
        let nodes = vec![json!({"title": "Intro", "goal": "g", "concept_keys": ["missing"]})];
        assert!(validate_plan(&nodes, &HashSet::new()).iter().any(|e| e.contains("unknown concept key")));
    }

    #[test]
    fn validate_plan_accepts_known_concept_keys() {
        let mut known = HashSet::new();
        known.insert("a".to_string());
        let nodes = vec![json!({"title": "Intro", "goal": "g", "concept_keys": ["a"]})];
        assert!(validate_plan(&nodes, &known).is_empty());
    }
}
