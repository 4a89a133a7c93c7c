//! `user_profile_refresh`: summarizes the current corpus (chunk and file
//! counts, embedding coverage) into `path.metadata.profile` so that
//! downstream personalization-aware stages — `concept_graph_build` in
//! particular — can size their prompts to the material without re-scanning
//! chunks themselves. Always safe to re-run: it only recomputes a summary,
//! never mutates chunks or concepts.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::path_repo::PathRepo;
use serde_json::json;

use crate::error::Result;

pub struct UserProfileRefreshStage {
    paths: Arc<PathRepo>,
    materials: Arc<MaterialRepo>,
}

impl UserProfileRefreshStage {
    pub fn new(paths: Arc<PathRepo>, materials: Arc<MaterialRepo>) -> Self {
        Self { paths, materials }
    }
}

#[async_trait]
impl Pipeline for UserProfileRefreshStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::USER_PROFILE_REFRESH
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        let path_id = jc.payload_uuid(payload::PATH_ID)?;

        let chunks = self.materials.all_chunks_for_set(material_set_id).await?;
        let chunk_count = chunks.len();
        let embedded_count = chunks.iter().filter(|c| c.embedding.is_some()).count();
        let file_count = chunks.iter().map(|c| c.material_file_id).collect::<std::collections::HashSet<_>>().len();

        self.paths
            .merge_metadata(
                path_id,
                json!({"profile": {
                    "chunk_count": chunk_count,
                    "embedded_count": embedded_count,
                    "file_count": file_count,
                    "refreshed_at": chrono::Utc::now().to_rfc3339(),
                }}),
            )
            .await?;

        jc.succeed(json!({"chunk_count": chunk_count, "embedded_count": embedded_count})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // `PathRepo`/`MaterialRepo` require a live Postgres pool; covered by the
    // `#[ignore]`-marked integration suite.
}
