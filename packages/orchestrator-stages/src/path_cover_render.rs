//! `path_cover_render`: a single decorative cover image for the path,
//! running alongside `node_avatar_render` once `path_plan_build` has
//! produced the curriculum. Unlike `node_figures_render`, there's no plan
//! step and no citation set to enforce — one deterministic prompt derived
//! from the path's learning goal, one image, continue on failure the same
//! way figure/video render does.

use std::sync::Arc;

use orchestrator_ai::AiClient;
use orchestrator_core::collaborators::ObjectStore;
use orchestrator_core::fingerprint::hash_bytes;
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::path_repo::PathRepo;
use serde_json::{json, Value};

use crate::error::{Result, StageError};

pub struct PathCoverRenderStage {
    paths: Arc<PathRepo>,
    ai: Arc<dyn AiClient>,
    objects: Arc<dyn ObjectStore>,
}

impl PathCoverRenderStage {
    pub fn new(paths: Arc<PathRepo>, ai: Arc<dyn AiClient>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { paths, ai, objects }
    }
}

#[async_trait::async_trait]
impl Pipeline for PathCoverRenderStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::PATH_COVER_RENDER
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;

        if let Some(existing) = self.paths.cover_for_path(path_id).await? {
            if existing.status == "rendered" {
                jc.succeed(json!({"rendered": false, "skipped": true})).await?;
                return Ok(());
            }
        }

        let path = self.paths.find(path_id).await?;
        let goal = path.metadata.get("intake").and_then(|i| i.get("goal")).and_then(Value::as_str).unwrap_or("this subject");
        let prompt = format!("A clean, welcoming cover illustration for a learning path about: {goal}");

        self.paths.insert_cover(path_id, &prompt).await?;

        match self.ai.generate_image(&prompt).await {
            Ok(asset) => {
                let key = format!("generated/cover/{}/{}.png", path_id, &hash_bytes(prompt.as_bytes())[..16]);
                self.objects.put(&key, asset.bytes, &asset.mime_type).await.map_err(StageError::Core)?;
                let url = self.objects.public_url(&key);
                self.paths.mark_cover_rendered(path_id, &url).await?;
                jc.succeed(json!({"rendered": true})).await?;
            }
            Err(e) => {
                self.paths.mark_cover_failed(path_id, &e.to_string()).await?;
                tracing::warn!(path_id = %path_id, error = %e, "cover render failed");
                jc.succeed(json!({"rendered": false, "error": e.to_string()})).await?;
            }
        }
        Ok(())
    }
}
