//! `node_doc_build`: the representative generate-validate-retry loop.
//! Builds every `PathNode`'s `LearningNodeDoc` in one job, first computing
//! must-cite coverage assignments across all nodes so every extractable
//! chunk is eventually cited, then fanning out per node under a bounded
//! concurrency cap.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use orchestrator_ai::{generate_json, AiClient, AiError, CompiledSchema};
use orchestrator_core::fingerprint::{canonicalize_json, hash_bytes, hash_sources};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_core::run_bounded;
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::node_repo::{AssetKind, NodeRepo, PathNodeRow};
use orchestrator_evidence::{chunk_namespace, EvidenceRetriever, RetrievalParams};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coverage::{cited_chunk_ids, distribute_coverage};
use crate::error::{Result, StageError};
use crate::validate::{backfill_block_ids, inject_missing_must_cite, scrub, validate_structure};

const SCHEMA_NAME: &str = "node_doc.v1";
const PROMPT_VERSION: &str = "node_doc.v1.prompt";

static SCHEMA: Lazy<CompiledSchema> = Lazy::new(|| {
    CompiledSchema::compile(
        SCHEMA_NAME,
        &json!({
            "type": "object",
            "required": ["title", "order", "blocks"],
            "properties": {
                "title": {"type": "string", "minLength": 1},
                "order": {"type": "array", "items": {"type": "string"}},
                "blocks": {
                    "type": "object",
                    "additionalProperties": {
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
                    }
                }
            }
        }),
    )
    .expect("node_doc.v1 schema is a fixed literal")
});

pub struct NodeDocBuildStage {
    nodes: Arc<NodeRepo>,
    materials: Arc<MaterialRepo>,
    evidence: Arc<EvidenceRetriever>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
    must_cite_per_node: usize,
    concurrency: usize,
}

impl NodeDocBuildStage {
    pub fn new(
        nodes: Arc<NodeRepo>,
        materials: Arc<MaterialRepo>,
        evidence: Arc<EvidenceRetriever>,
        ai: Arc<dyn AiClient>,
        max_attempts: i32,
        must_cite_per_node: usize,
        concurrency: usize,
    ) -> Self {
        Self { nodes, materials, evidence, ai, max_attempts, must_cite_per_node, concurrency }
    }
}

#[async_trait::async_trait]
impl Pipeline for NodeDocBuildStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::NODE_DOC_BUILD
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;

        let nodes = self.nodes.list_for_path(path_id).await?;
        if nodes.is_empty() {
            jc.succeed(json!({"docs_written": 0})).await?;
            return Ok(());
        }

        let all_chunks = self.materials.all_chunks_for_set(material_set_id).await?;
        let chunk_lookup: Arc<HashMap<Uuid, (String, Option<i32>)>> =
            Arc::new(all_chunks.iter().map(|c| (c.id, (c.text.clone(), c.page))).collect());
        let existing_doc_bodies = self.nodes.doc_bodies_for_material_set(material_set_id).await?;
        let cited_by_node: HashMap<Uuid, HashSet<Uuid>> = existing_doc_bodies.into_iter().map(|(node_id, body)| (node_id, cited_chunk_ids(&body))).collect();

        let node_ids: Vec<Uuid> = nodes.iter().map(|n| n.id).collect();
        let assignments = distribute_coverage(&node_ids, &all_chunks, &cited_by_node, self.must_cite_per_node);
        let mut must_cite_by_node: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for a in assignments {
            must_cite_by_node.entry(a.path_node_id).or_default().push(a.chunk_id);
        }

        jc.progress(self.r#type(), 10, "coverage assigned, building docs".to_string()).await?;

        let file_ids: Vec<Uuid> = self.materials.files_for_set(material_set_id).await?.into_iter().map(|f| f.id).collect();
        let allowed_chunk_ids: HashSet<Uuid> = all_chunks.iter().map(|c| c.id).collect();
        let namespace = chunk_namespace(&material_set_id);

        let mut tasks = Vec::with_capacity(nodes.len());
        for node in nodes {
            let must_cite = must_cite_by_node.remove(&node.id).unwrap_or_default();
            let builder = SingleNodeDocBuilder {
                node,
                must_cite,
                allowed_chunk_ids: allowed_chunk_ids.clone(),
                file_ids: file_ids.clone(),
                namespace: namespace.clone(),
                nodes: self.nodes.clone(),
                evidence: self.evidence.clone(),
                ai: self.ai.clone(),
                max_attempts: self.max_attempts,
                job_id: jc.job.id,
                chunk_lookup: chunk_lookup.clone(),
            };
            tasks.push(move |_token: CancellationToken| async move { builder.build().await });
        }

        let (results, first_error) = run_bounded(tasks, self.concurrency).await;
        if let Some(err) = first_error {
            return Err(err);
        }
        let docs_written: i64 = results.into_iter().flatten().filter(|written| *written).count() as i64;

        jc.succeed(json!({"docs_written": docs_written})).await?;
        Ok(())
    }
}

struct SingleNodeDocBuilder {
    node: PathNodeRow,
    must_cite: Vec<Uuid>,
    allowed_chunk_ids: HashSet<Uuid>,
    file_ids: Vec<Uuid>,
    namespace: String,
    nodes: Arc<NodeRepo>,
    evidence: Arc<EvidenceRetriever>,
    ai: Arc<dyn AiClient>,
    max_attempts: i32,
    job_id: Uuid,
    chunk_lookup: Arc<HashMap<Uuid, (String, Option<i32>)>>,
}

impl SingleNodeDocBuilder {
    /// Runs the eight-step loop for one node; returns `true` if a new doc
    /// revision was written, `false` if the existing doc's `contentHash` and
    /// `sourcesHash` already matched and the upsert was a no-op.
    async fn build(&self) -> std::result::Result<bool, StageError> {
        let started = Instant::now();
        let node_goal = self.node.metadata.get("goal").and_then(Value::as_str).unwrap_or(&self.node.title).to_string();

        let media_citations = self.media_citation_ids().await?;

        // 1. Retrieve evidence.
        let chunk_ids = self
            .evidence
            .retrieve(&self.namespace, &node_goal, &self.file_ids, &RetrievalParams::default(), &self.must_cite, &media_citations)
            .await
            .map_err(StageError::Evidence)?;

        let media_assets = self.rendered_media_assets().await?;

        // 2. Build prompt.
        let system = "You write a structured, citation-grounded learning document as block-list JSON, using only \
            the given chunk IDs for citations. Respond only with JSON matching the given schema.";
        let mut user = self.build_prompt(&node_goal, &chunk_ids, &media_assets);

        let mut attempts = 0i32;
        let mut errors_log: Vec<String> = Vec::new();
        let mut doc: Option<Value> = None;

        for attempt in 1..=self.max_attempts.max(1) {
            attempts = attempt;
            // 3. Call GenerateJSON; 4. parse failure handled as a schema rejection.
            let candidate = match generate_json(self.ai.as_ref(), system, &user, &SCHEMA).await {
                Ok(v) => v,
                Err(AiError::SchemaRejected(msg)) => {
                    errors_log = vec![msg];
                    user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", errors_log.join("; "));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // 5. The schema already emits the canonical block-list shape.
            let mut candidate = candidate;

            // 6. Scrub.
            scrub(&mut candidate);
            backfill_block_ids(&mut candidate);

            // 7. Validate, attempting must-cite injection first.
            let missing_must_cite: Vec<Uuid> = self.must_cite.iter().copied().filter(|id| !cited_chunk_ids(&candidate).contains(id)).collect();
            if !missing_must_cite.is_empty() {
                let lookup = &self.chunk_lookup;
                inject_missing_must_cite(&mut candidate, &missing_must_cite, |id| {
                    lookup.get(&id).map(|(text, page)| (truncate_quote(text, 160), page.map(|p| p as i64)))
                });
            }

            let mut errors = validate_structure(&candidate, &self.allowed_chunk_ids, &self.must_cite);
            errors.extend(required_media_usage(&candidate, &media_assets));

            if errors.is_empty() {
                doc = Some(candidate);
                break;
            }

            // 8. Retry with validator feedback.
            errors_log = errors;
            user = format!("{user}\n\nVALIDATION_ERRORS_TO_FIX: {}", errors_log.join("; "));
        }

        let doc = doc.ok_or_else(|| StageError::ValidationExhausted(errors_log.join("; ")))?;

        let canonical = canonicalize_json(&doc);
        let content_hash = hash_bytes(canonical.as_bytes());
        let mut sorted_chunk_ids = chunk_ids.clone();
        sorted_chunk_ids.sort();
        let sources_hash = hash_sources(PROMPT_VERSION, SCHEMA_NAME, &sorted_chunk_ids);

        if let Some(existing) = self.nodes.active_doc(self.node.id).await? {
            if existing.content_hash == content_hash && existing.sources_hash == sources_hash {
                return Ok(false);
            }
        }

        self.nodes.upsert_doc(self.node.id, doc, &content_hash, &sources_hash, json!({"attempts": attempts})).await?;
        self.nodes
            .insert_generation_run(Some(self.job_id), "node_doc", self.node.id, attempts, started.elapsed().as_millis() as i64, json!(errors_log), json!({}))
            .await?;
        Ok(true)
    }

    async fn media_citation_ids(&self) -> std::result::Result<Vec<Uuid>, StageError> {
        let mut ids = Vec::new();
        for kind in [AssetKind::Figure, AssetKind::Video] {
            for asset in self.nodes.assets_for_node(kind, self.node.id).await? {
                if asset.status != "rendered" {
                    continue;
                }
                if let Some(list) = asset.citations.as_array() {
                    for v in list {
                        if let Some(id) = v.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                            ids.push(id);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn rendered_media_assets(&self) -> std::result::Result<Vec<(Uuid, String, Option<String>)>, StageError> {
        let mut assets = Vec::new();
        for kind in [AssetKind::Figure, AssetKind::Video] {
            for asset in self.nodes.assets_for_node(kind, self.node.id).await? {
                if asset.status == "rendered" {
                    assets.push((asset.id, asset.semantic_type, asset.caption));
                }
            }
        }
        Ok(assets)
    }

    fn build_prompt(&self, goal: &str, chunk_ids: &[Uuid], media_assets: &[(Uuid, String, Option<String>)]) -> String {
        let mut out = format!("Unit goal: {goal}\n\nAllowed citation chunk IDs: {}\n", chunk_ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", "));
        if !self.must_cite.is_empty() {
            out.push_str(&format!("Must cite every one of these chunk IDs at least once: {}\n", self.must_cite.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")));
        }
        if !media_assets.is_empty() {
            out.push_str("Available rendered media assets (reference their id in a figure/video block's \"assets\" field):\n");
            for (id, kind, caption) in media_assets {
                out.push_str(&format!("- {id} ({kind}): {}\n", caption.clone().unwrap_or_default()));
            }
        }
        out
    }
}

/// Enforces required generated-media usage: when rendered media exists for
/// this node, at least one block must reference one of them.
fn required_media_usage(doc: &Value, media_assets: &[(Uuid, String, Option<String>)]) -> Vec<String> {
    if media_assets.is_empty() {
        return Vec::new();
    }
    let asset_ids: HashSet<String> = media_assets.iter().map(|(id, _, _)| id.to_string()).collect();
    let referenced = doc["blocks"]
        .as_object()
        .into_iter()
        .flat_map(|m| m.values())
        .filter_map(|b| b.get("assets").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .any(|id| asset_ids.contains(id));
    if referenced {
        Vec::new()
    } else {
        vec!["rendered media assets exist but no block references one".to_string()]
    }
}

fn truncate_quote(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_media_usage_flags_unreferenced_rendered_assets() {
        let assets = vec![(Uuid::new_v4(), "illustration".to_string(), None)];
        let doc = json!({"title": "t", "order": ["b1"], "blocks": {"b1": {"type": "paragraph", "content": "x"}}});
        assert!(!required_media_usage(&doc, &assets).is_empty());
    }

    #[test]
    fn required_media_usage_passes_when_a_block_references_the_asset() {
        let asset_id = Uuid::new_v4();
        let assets = vec![(asset_id, "illustration".to_string(), None)];
        let doc = json!({"title": "t", "order": ["b1"], "blocks": {"b1": {"type": "figure", "content": "x", "assets": [asset_id.to_string()]}}});
        assert!(required_media_usage(&doc, &assets).is_empty());
    }

    #[test]
    fn required_media_usage_is_a_noop_without_rendered_assets() {
        let doc = json!({"title": "t", "order": [], "blocks": {}});
        assert!(required_media_usage(&doc, &[]).is_empty());
    }
}
