//! `coverage_coherence_audit`: a deterministic, AI-free sweep that runs after
//! `realize_activities` over a path's built artifacts, recording gaps for a
//! reviewer rather than blocking the build on them: material chunks no
//! active doc cites, and concepts no `PathNode` covers.

use std::collections::HashSet;
use std::sync::Arc;

use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::concept_repo::ConceptRepo;
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::node_repo::NodeRepo;
use orchestrator_db::path_repo::PathRepo;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::coverage::cited_chunk_ids;
use crate::error::Result;

pub struct CoverageCoherenceAuditStage {
    paths: Arc<PathRepo>,
    nodes: Arc<NodeRepo>,
    materials: Arc<MaterialRepo>,
    concepts: Arc<ConceptRepo>,
}

impl CoverageCoherenceAuditStage {
    pub fn new(paths: Arc<PathRepo>, nodes: Arc<NodeRepo>, materials: Arc<MaterialRepo>, concepts: Arc<ConceptRepo>) -> Self {
        Self { paths, nodes, materials, concepts }
    }
}

#[async_trait::async_trait]
impl Pipeline for CoverageCoherenceAuditStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::COVERAGE_COHERENCE_AUDIT
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;

        let all_chunks = self.materials.all_chunks_for_set(material_set_id).await?;
        let doc_bodies = self.nodes.doc_bodies_for_material_set(material_set_id).await?;
        let cited: HashSet<Uuid> = doc_bodies.iter().flat_map(|(_, body)| cited_chunk_ids(body)).collect();
        let uncited_chunk_count = all_chunks.iter().filter(|c| !cited.contains(&c.id)).count();

        let concepts = self.concepts.list_for_path(path_id).await?;
        let nodes = self.nodes.list_for_path(path_id).await?;
        let covered_keys: HashSet<String> = nodes
            .iter()
            .flat_map(|n| n.metadata.get("concept_keys").and_then(Value::as_array).cloned().unwrap_or_default())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let orphan_concepts: Vec<String> = concepts.iter().map(|c| c.key.clone()).filter(|k| !covered_keys.contains(k)).collect();

        let audit = json!({
            "total_chunks": all_chunks.len(),
            "uncited_chunk_count": uncited_chunk_count,
            "orphan_concept_keys": orphan_concepts,
            "node_count": nodes.len(),
            "audited_at": chrono::Utc::now().to_rfc3339(),
        });
        self.paths.merge_metadata(path_id, json!({"audit": audit})).await?;

        jc.succeed(json!({"uncited_chunk_count": uncited_chunk_count, "orphan_concept_count": orphan_concepts.len()})).await?;
        Ok(())
    }
}
