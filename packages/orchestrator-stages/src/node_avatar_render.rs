//! `node_avatar_render`: a small decorative avatar icon per `PathNode`,
//! running after `path_plan_build` and mirroring
//! [`crate::path_cover_render`] at node scope.

use std::sync::Arc;

use orchestrator_ai::AiClient;
use orchestrator_core::collaborators::ObjectStore;
use orchestrator_core::fingerprint::hash_bytes;
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::node_repo::NodeRepo;
use serde_json::{json, Value};

use crate::error::{Result, StageError};

pub struct NodeAvatarRenderStage {
    nodes: Arc<NodeRepo>,
    ai: Arc<dyn AiClient>,
    objects: Arc<dyn ObjectStore>,
}

impl NodeAvatarRenderStage {
    pub fn new(nodes: Arc<NodeRepo>, ai: Arc<dyn AiClient>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { nodes, ai, objects }
    }
}

#[async_trait::async_trait]
impl Pipeline for NodeAvatarRenderStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::NODE_AVATAR_RENDER
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

            if let Some(existing) = self.nodes.avatar_for_node(node.id).await? {
                if existing.status == "rendered" {
                    continue;
                }
            }

            let goal = node.metadata.get("goal").and_then(Value::as_str).unwrap_or(&node.title);
            let prompt = format!("A small, simple icon-style avatar representing the learning unit: {goal}");
            self.nodes.insert_avatar(node.id, &prompt).await?;

            match self.ai.generate_image(&prompt).await {
                Ok(asset) => {
                    let key = format!("generated/avatar/{}/{}/{}.png", path_id, node.id, &hash_bytes(prompt.as_bytes())[..16]);
                    self.objects.put(&key, asset.bytes, &asset.mime_type).await.map_err(StageError::Core)?;
                    let url = self.objects.public_url(&key);
                    self.nodes.mark_avatar_rendered(node.id, &url).await?;
                    rendered += 1;
                }
                Err(e) => {
                    self.nodes.mark_avatar_failed(node.id, &e.to_string()).await?;
                    tracing::warn!(node_id = %node.id, error = %e, "avatar render failed, continuing batch");
                    failed += 1;
                }
            }
        }

        jc.succeed(json!({"rendered": rendered, "failed": failed})).await?;
        Ok(())
    }
}
