//! `node_figures_plan`: figure planning, thin over
//! [`crate::media::MediaPlanStage`].

use std::sync::Arc;

use orchestrator_ai::AiClient;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::material_repo::MaterialRepo;
use orchestrator_db::node_repo::NodeRepo;
use orchestrator_evidence::EvidenceRetriever;

use crate::error::Result;
use crate::media::MediaPlanStage;

pub struct NodeFiguresPlanStage(MediaPlanStage);

impl NodeFiguresPlanStage {
    pub fn new(nodes: Arc<NodeRepo>, materials: Arc<MaterialRepo>, evidence: Arc<EvidenceRetriever>, ai: Arc<dyn AiClient>, max_attempts: i32) -> Self {
        Self(MediaPlanStage::new_figures(nodes, materials, evidence, ai, max_attempts))
    }
}

#[async_trait::async_trait]
impl Pipeline for NodeFiguresPlanStage {
    fn r#type(&self) -> &'static str {
        self.0.r#type()
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        self.0.run(jc).await
    }
}
