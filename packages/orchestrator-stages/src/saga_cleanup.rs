//! `saga_cleanup`: periodic `Pipeline` wrapper over
//! [`orchestrator_saga::SagaCoordinator::cleanup`]. Carries no
//! path/material payload — it sweeps across every owner, so it's scheduled
//! standalone rather than as a build-DAG node.

use std::sync::Arc;

use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_saga::SagaCoordinator;
use serde_json::json;

use crate::error::Result;

pub struct SagaCleanupStage {
    saga: Arc<SagaCoordinator>,
    older_than_hours: i64,
    limit: i64,
}

impl SagaCleanupStage {
    pub fn new(saga: Arc<SagaCoordinator>, older_than_hours: i64, limit: i64) -> Self {
        Self { saga, older_than_hours, limit }
    }
}

#[async_trait::async_trait]
impl Pipeline for SagaCleanupStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::SAGA_CLEANUP
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let swept = self.saga.cleanup(self.older_than_hours, self.limit).await?;
        jc.succeed(json!({"sagas_swept": swept})).await?;
        Ok(())
    }
}
