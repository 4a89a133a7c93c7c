//! Shared figure/video plan + render machinery. Figures and
//! videos differ only in their AI call (`generate_image` vs `generate_video`)
//! and the object-storage asset-kind segment, so both are thin wrappers
//! (`node_figures_plan`, `node_figures_render`, `node_videos_plan`,
//! `node_videos_render`) over the generic stages here.

use std::sync::Arc;

use once_cell::sync::Lazy;
use orchestrator_ai::{generate_json, AiClient, AiError, CompiledSchema};
use orchestrator_core::collaborators::ObjectStore;
use orchestrator_core::fingerprint::hash_bytes;
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::node_repo::{AssetKind, NodeRepo};
use orchestrator_evidence::{chunk_namespace, EvidenceRetriever, RetrievalParams};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{Result, StageError};

const PLAN_SCHEMA_NAME: &str = "media_plan.v1";

static PLAN_SCHEMA: Lazy<CompiledSchema> = Lazy::new(|| {
    CompiledSchema::compile(
        PLAN_SCHEMA_NAME,
        &json!({
            "type": "object",
            "required": ["items"],
            "properties": {
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["semantic_type", "prompt", "caption"],
                        "properties": {
                            "semantic_type": {"type": "string", "minLength": 1},
                            "prompt": {"type": "string"},
                            "caption": {"type": "string"},
                            "alt_text": {"type": "string"},
                            "placement_hint": {"type": "string"},
                            "duration_sec": {"type": ["integer", "null"]}
                        }
                    }
                }
            }
        }),
    )
    .expect("media_plan.v1 schema is a fixed literal")
});

/// Plans 0–N figure or video items for every `PathNode` under a path,
/// subject-grounded against retrieved excerpts: the prompt or caption must
/// contain at least one noun phrase extracted from the retrieved excerpts.
pub struct MediaPlanStage {
    kind: AssetKind,
    stage_type: &'static str,
    nodes: Arc<NodeRepo>,
    materials: Arc<MaterialRepo>,
    evidence: Arc<EvidenceRetriever>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
}

impl MediaPlanStage {
    pub fn new_figures(nodes: Arc<NodeRepo>, materials: Arc<MaterialRepo>, evidence: Arc<EvidenceRetriever>, ai: Arc<dyn AiClient>, max_attempts: i32) -> Self {
        Self { kind: AssetKind::Figure, stage_type: orchestrator_dag::stage_names::NODE_FIGURES_PLAN, nodes, materials, evidence, ai, max_attempts }
    }

    pub fn new_videos(nodes: Arc<NodeRepo>, materials: Arc<MaterialRepo>, evidence: Arc<EvidenceRetriever>, ai: Arc<dyn AiClient>, max_attempts: i32) -> Self {
        Self { kind: AssetKind::Video, stage_type: orchestrator_dag::stage_names::NODE_VIDEOS_PLAN, nodes, materials, evidence, ai, max_attempts }
    }
}

#[async_trait::async_trait]
impl Pipeline for MediaPlanStage {
    fn r#type(&self) -> &'static str {
        self.stage_type
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        let file_ids: Vec<Uuid> = self.materials.files_for_set(material_set_id).await?.into_iter().map(|f| f.id).collect();
        let namespace = chunk_namespace(&material_set_id);

        let nodes = self.nodes.list_for_path(path_id).await?;
        let mut planned_total = 0i64;
        for (i, node) in nodes.iter().enumerate() {
            if jc.is_canceled().await? {
                jc.fail(self.r#type(), "canceled").await?;
                return Ok(());
            }
            jc.progress(self.r#type(), (i as i32 * 100 / nodes.len().max(1)).min(95), node.title.clone()).await?;

            if !self.nodes.assets_for_node(self.kind, node.id).await?.is_empty() {
                continue;
            }

            let node_goal = node.metadata.get("goal").and_then(Value::as_str).unwrap_or(&node.title);
            let chunk_ids = self
                .evidence
                .retrieve(&namespace, node_goal, &file_ids, &RetrievalParams::default(), &[], &[])
                .await
                .map_err(StageError::Evidence)?;
            let chunks = self.materials.chunks_by_ids(&chunk_ids).await?;
            let noun_phrases = extract_noun_phrases(&chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>());

            let system = "You propose supplementary figures or videos for a learning unit, grounded only in the \
                given excerpts. Respond only with JSON matching the given schema. Propose zero items if none are warranted.";
            let excerpts = chunks.iter().map(|c| format!("{} | {}", c.id, truncate(&c.text, 300))).collect::<Vec<_>>().join("\n");
            let mut user = format!("Unit: {node_goal}\n\nExcerpts:\n{excerpts}");

            let mut items: Option<Vec<Value>> = None;
            let mut last_errors = Vec::new();
            for _attempt in 1..=self.max_attempts.max(1) {
                let candidate = match generate_json(self.ai.as_ref(), system, &user, &PLAN_SCHEMA).await {
                    Ok(v) => v,
                    Err(AiError::SchemaRejected(msg)) => {
                        last_errors = vec![msg];
                        user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
                        continue;
                    }
                    Err(e) => return Err(StageError::from(e)),
                };
                let candidate_items = candidate["items"].as_array().cloned().unwrap_or_default();
                let errors = validate_subject_grounding(&candidate_items, &noun_phrases);
                if errors.is_empty() {
                    items = Some(candidate_items);
                    break;
                }
                last_errors = errors;
                user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", last_errors.join("; "));
            }
            let items = items.ok_or_else(|| StageError::ValidationExhausted(last_errors.join("; ")))?;

            if items.is_empty() {
                self.nodes.plan_zero_item_sentinel(self.kind, node.id).await?;
                continue;
            }

            for (slot, item) in items.iter().enumerate() {
                let prompt = item["prompt"].as_str().unwrap_or_default();
                let semantic_type = item["semantic_type"].as_str().unwrap_or("illustration");
                let caption = item["caption"].as_str();
                let alt_text = item["alt_text"].as_str();
                let placement_hint = item["placement_hint"].as_str();
                let duration_sec = item["duration_sec"].as_i64().map(|v| v as i32);
                let citations: Vec<String> = chunk_ids.iter().map(Uuid::to_string).collect();
                self.nodes
                    .insert_planned_asset(
                        self.kind,
                        node.id,
                        (slot + 1) as i32,
                        semantic_type,
                        prompt,
                        caption,
                        alt_text,
                        placement_hint,
                        json!(citations),
                        duration_sec,
                    )
                    .await?;
                planned_total += 1;
            }
        }

        jc.succeed(json!({"items_planned": planned_total})).await?;
        Ok(())
    }
}

/// Renders every `status=planned` figure/video row with a non-empty prompt.
/// A per-item failure is recorded on that row and does not abort the batch.
pub struct MediaRenderStage {
    kind: AssetKind,
    stage_type: &'static str,
    nodes: Arc<NodeRepo>,
    ai: Arc<dyn AiClient>,
    objects: Arc<dyn ObjectStore>,
}

impl MediaRenderStage {
    pub fn new_figures(nodes: Arc<NodeRepo>, ai: Arc<dyn AiClient>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { kind: AssetKind::Figure, stage_type: orchestrator_dag::stage_names::NODE_FIGURES_RENDER, nodes, ai, objects }
    }

    pub fn new_videos(nodes: Arc<NodeRepo>, ai: Arc<dyn AiClient>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { kind: AssetKind::Video, stage_type: orchestrator_dag::stage_names::NODE_VIDEOS_RENDER, nodes, ai, objects }
    }

    fn extension(&self) -> &'static str {
        match self.kind {
            AssetKind::Figure => "png",
            AssetKind::Video => "mp4",
        }
    }
}

#[async_trait::async_trait]
impl Pipeline for MediaRenderStage {
    fn r#type(&self) -> &'static str {
        self.stage_type
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let nodes = self.nodes.list_for_path(path_id).await?;

        let mut rendered = 0i64;
        let mut failed = 0i64;
        for node in &nodes {
            if jc.is_canceled().await? {
                jc.fail(self.r#type(), "canceled").await?;
                return Ok(());
            }
            for asset in self.nodes.assets_for_node(self.kind, node.id).await? {
                if asset.status != "planned" || asset.prompt.trim().is_empty() {
                    continue;
                }

                let result = match self.kind {
                    AssetKind::Figure => self.ai.generate_image(&asset.prompt).await,
                    AssetKind::Video => self.ai.generate_video(&asset.prompt, Default::default()).await,
                };

                match result {
                    Ok(asset_bytes) => {
                        let prompt_hash = hash_bytes(asset.prompt.as_bytes());
                        let key = format!(
                            "generated/{}/{}/{}/slot_{}_{}.{}",
                            if self.kind == AssetKind::Figure { "figure" } else { "video" },
                            path_id,
                            node.id,
                            asset.slot,
                            &prompt_hash[..16],
                            self.extension()
                        );
                        self.objects.put(&key, asset_bytes.bytes, &asset_bytes.mime_type).await.map_err(StageError::Core)?;
                        let url = self.objects.public_url(&key);
                        self.nodes.mark_rendered(self.kind, asset.id, &url).await?;
                        rendered += 1;
                    }
                    Err(e) => {
                        self.nodes.mark_failed(self.kind, asset.id, &e.to_string()).await?;
                        tracing::warn!(asset_id = %asset.id, error = %e, "media render failed, continuing batch");
                        failed += 1;
                    }
                }
            }
        }

        jc.succeed(json!({"rendered": rendered, "failed": failed})).await?;
        Ok(())
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A deliberately crude noun-phrase heuristic: capitalized or long lowercase
/// words are kept as candidate "subjects" the plan must reference for
/// subject-grounding. A dedicated NLP library is out of scope.
fn extract_noun_phrases(texts: &[&str]) -> Vec<String> {
    let mut phrases = std::collections::HashSet::new();
    for text in texts {
        for word in text.split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.len() > 5 {
                phrases.insert(cleaned.to_ascii_lowercase());
            }
        }
    }
    phrases.into_iter().collect()
}

fn validate_subject_grounding(items: &[Value], noun_phrases: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let prompt = item["prompt"].as_str().unwrap_or_default().to_ascii_lowercase();
        let caption = item["caption"].as_str().unwrap_or_default().to_ascii_lowercase();
        if noun_phrases.is_empty() {
            continue;
        }
        let grounded = noun_phrases.iter().any(|p| prompt.contains(p.as_str()) || caption.contains(p.as_str()));
        if !grounded {
            errors.push(format!("item {i} is not grounded in any retrieved excerpt"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_grounding_accepts_item_referencing_an_excerpt_term() {
        let items = vec![json!({"prompt": "Diagram of photosynthesis", "caption": "c"})];
        let phrases = vec!["photosynthesis".to_string()];
        assert!(validate_subject_grounding(&items, &phrases).is_empty());
    }

    #[test]
    fn subject_grounding_rejects_ungrounded_item() {
        let items = vec![json!({"prompt": "A generic stock photo", "caption": "c"})];
        let phrases = vec!["photosynthesis".to_string()];
        assert!(!validate_subject_grounding(&items, &phrases).is_empty());
    }

    #[test]
    fn subject_grounding_skips_check_when_no_excerpts_available() {
        let items = vec![json!({"prompt": "anything", "caption": "c"})];
        assert!(validate_subject_grounding(&items, &[]).is_empty());
    }
}
