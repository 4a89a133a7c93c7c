//! `node_figures_render`: figure rendering, thin over
//! [`crate::media::MediaRenderStage`].

use std::sync::Arc;

use orchestrator_ai::AiClient;
use orchestrator_core::collaborators::ObjectStore;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::node_repo::NodeRepo;

use crate::error::Result;
use crate::media::MediaRenderStage;

pub struct NodeFiguresRenderStage(MediaRenderStage);

impl NodeFiguresRenderStage {
    pub fn new(nodes: Arc<NodeRepo>, ai: Arc<dyn AiClient>, objects: Arc<dyn ObjectStore>) -> Self {
        Self(MediaRenderStage::new_figures(nodes, ai, objects))
    }
}

#[async_trait::async_trait]
impl Pipeline for NodeFiguresRenderStage {
    fn r#type(&self) -> &'static str {
        self.0.r#type()
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        self.0.run(jc).await
    }
}
