//! Pipeline registry & runtime context.
//!
//! An open registry keyed by stage-type string, with a `JobCtx` that
//! exposes the primitives a stage needs: cancellation, a transactional DB
//! handle, the job row, payload accessors, and the progress/terminal calls.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::job::Job;

/// A pluggable build stage. One implementation per stage name in the
/// build DAG (`path_intake`, `ingest_chunks`, `node_doc_build`, ...).
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// The job `type` this pipeline handles (matches a DAG stage name).
    fn r#type(&self) -> &'static str;

    /// Execute the stage against a claimed job.
    async fn run(&self, jc: &mut JobCtx) -> Result<()>;
}

/// Per-job repo handle abstraction a [`JobCtx`] needs to read/update its own
/// row without depending on `orchestrator-db` directly (kept as a narrow
/// trait object so `orchestrator-core` has no SQL dependency).
#[async_trait]
pub trait JobUpdates: Send + Sync {
    async fn progress(&self, job_id: Uuid, stage: &str, pct: i32, message: Option<String>) -> Result<()>;
    async fn succeed(&self, job_id: Uuid, result: serde_json::Value) -> Result<()>;
    async fn fail(&self, job_id: Uuid, stage: &str, error: &str) -> Result<bool>;
    async fn suspend(&self, job_id: Uuid, question_id: Uuid, question_seq: i64) -> Result<()>;
    async fn heartbeat(&self, job_id: Uuid) -> Result<()>;
    /// Re-read the job's current status, honoring cancellation checked at
    /// every heartbeat.
    async fn is_canceled(&self, job_id: Uuid) -> Result<bool>;
}

/// Runtime context passed to every stage's `Pipeline::run`.
pub struct JobCtx {
    pub ctx: CancellationToken,
    pub job: Job,
    pub updates: Arc<dyn JobUpdates>,
    /// Non-interactive override: skip interactive pauses and proceed with
    /// defaults.
    pub non_interactive: bool,
}

impl JobCtx {
    pub fn new(job: Job, updates: Arc<dyn JobUpdates>, ctx: CancellationToken) -> Self {
        let non_interactive = job.payload.get("non_interactive").and_then(|v| v.as_bool()).unwrap_or(false);
        Self { ctx, job, updates, non_interactive }
    }

    pub fn payload_uuid(&self, key: &str) -> Result<Uuid> {
        self.job.payload_uuid(key)
    }

    pub fn payload_uuid_opt(&self, key: &str) -> Result<Option<Uuid>> {
        self.job.payload_uuid_opt(key)
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.job.payload_str(key)
    }

    pub fn payload_bool(&self, key: &str) -> bool {
        self.job.payload_bool(key)
    }

    pub async fn progress(&self, stage: &str, pct: i32, message: impl Into<Option<String>>) -> Result<()> {
        self.updates.progress(self.job.id, stage, pct, message.into()).await
    }

    pub async fn succeed(&self, result: serde_json::Value) -> Result<()> {
        self.updates.succeed(self.job.id, result).await
    }

    pub async fn fail(&self, stage: &str, error: impl std::fmt::Display) -> Result<bool> {
        self.updates.fail(self.job.id, stage, &error.to_string()).await
    }

    pub async fn suspend(&self, question_id: Uuid, question_seq: i64) -> Result<()> {
        self.updates.suspend(self.job.id, question_id, question_seq).await
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.updates.heartbeat(self.job.id).await
    }

    pub async fn is_canceled(&self) -> Result<bool> {
        self.updates.is_canceled(self.job.id).await
    }
}

/// Maps job type -> [`Pipeline`]. Read-mostly after startup registration:
/// no mutable process-global state is relied upon aside from this
/// registry.
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: std::collections::HashMap<&'static str, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pipeline: Arc<dyn Pipeline>) {
        self.pipelines.insert(pipeline.r#type(), pipeline);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Pipeline>> {
        self.pipelines.get(job_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.pipelines.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct NoopUpdates;

    #[async_trait]
    impl JobUpdates for NoopUpdates {
        async fn progress(&self, _: Uuid, _: &str, _: i32, _: Option<String>) -> Result<()> {
            Ok(())
        }
        async fn succeed(&self, _: Uuid, _: serde_json::Value) -> Result<()> {
            Ok(())
        }
        async fn fail(&self, _: Uuid, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn suspend(&self, _: Uuid, _: Uuid, _: i64) -> Result<()> {
            Ok(())
        }
        async fn heartbeat(&self, _: Uuid) -> Result<()> {
            Ok(())
        }
        async fn is_canceled(&self, _: Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    struct EchoStage {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Pipeline for EchoStage {
        fn r#type(&self) -> &'static str {
            "echo"
        }

        async fn run(&self, jc: &mut JobCtx) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            jc.succeed(serde_json::json!({"ok": true})).await
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_job_type() {
        let ran = Arc::new(AtomicBool::new(false));
        let mut registry = PipelineRegistry::new();
        registry.register(Arc::new(EchoStage { ran: ran.clone() }));

        let job = Job::new_queued("echo", Uuid::new_v4(), None, serde_json::json!({}), 3);
        let mut jc = JobCtx::new(job, Arc::new(NoopUpdates), CancellationToken::new());

        let pipeline = registry.get("echo").expect("registered");
        pipeline.run(&mut jc).await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        assert!(registry.get("missing").is_none());
    }
}
