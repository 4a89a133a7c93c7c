//! `learning_build`: the Build DAG coordinator.
//!
//! The `learning_build` job itself only seeds the DAG root and returns —
//! every `Pipeline` must terminate in a single `run()` call via
//! `jc.succeed`/`fail`/`suspend` (see `orchestrator_core::pipeline`), so a
//! build's lifetime can't be one long-running job. The rest of the DAG is
//! driven by [`BuildDispatcher::tick`], called by the worker after every
//! child job reaches a terminal status, which turns
//! `orchestrator_dag::evaluate`'s pure verdicts into real `job` rows:
//! dispatchable stages get enqueued, cascade-failed stages get inserted
//! already `failed`, and once every DAG stage is terminal the saga is
//! completed or compensated exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::job::{Job, JobStatus};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_dag::dispatch::{evaluate, StageStatus, Verdict};
use orchestrator_dag::{learning_build_dag, stage_names, BuildDag};
use orchestrator_db::job_repo::JobRepo;
use orchestrator_db::path_repo::PathRepo;
use orchestrator_db::SagaStatus;
use orchestrator_saga::SagaCoordinator;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;

fn job_status_to_stage_status(status: JobStatus) -> StageStatus {
    match status {
        JobStatus::Queued | JobStatus::Running => StageStatus::Running,
        JobStatus::WaitingUser => StageStatus::WaitingUser,
        JobStatus::Succeeded => StageStatus::Succeeded,
        JobStatus::Failed => StageStatus::Failed,
        JobStatus::Canceled => StageStatus::Canceled,
    }
}

/// What a `tick` did, for the worker's logging/notification layer.
#[derive(Debug, Default, Clone)]
pub struct TickOutcome {
    pub dispatched: Vec<String>,
    pub cascade_failed: Vec<String>,
    pub finalized: Option<BuildOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    Failed,
}

/// Drives the Build DAG for one `learning_build` job tree: seeds the root
/// stage(s) and, on every subsequent tick, reconciles child job statuses
/// against [`orchestrator_dag::dispatch::evaluate`].
pub struct BuildDispatcher {
    jobs: Arc<JobRepo>,
    paths: Arc<PathRepo>,
    saga: Arc<SagaCoordinator>,
    dag: BuildDag,
    default_max_attempts: i32,
}

impl BuildDispatcher {
    pub fn new(
        jobs: Arc<JobRepo>,
        paths: Arc<PathRepo>,
        saga: Arc<SagaCoordinator>,
        default_max_attempts: i32,
    ) -> Result<Self> {
        let dag = learning_build_dag()?;
        Ok(Self { jobs, paths, saga, dag, default_max_attempts })
    }

    /// Carries every key a child stage might read from its own payload
    /// forward from the parent `learning_build` job, plus the
    /// `path_id`/`saga_id` this dispatcher derived once at seed time.
    fn child_payload(&self, parent: &Job, path_id: Uuid, saga_id: Uuid) -> Value {
        let mut payload = parent.payload.clone();
        let obj = payload.as_object_mut().expect("job payload is always a JSON object");
        obj.insert(payload::PATH_ID.to_string(), json!(path_id));
        obj.insert(payload::SAGA_ID.to_string(), json!(saga_id));
        payload
    }

    /// Seeds a freshly-claimed `learning_build` job: derives the canonical
    /// Path, opens a saga, and enqueues every dependency-free DAG stage as a
    /// child job. Idempotent — a retried seed finds its own children already
    /// enqueued and dispatches nothing twice.
    pub async fn seed(&self, parent: &Job) -> Result<Value> {
        let material_set_id = parent.payload_uuid(payload::MATERIAL_SET_ID)?;
        let path_id = self.paths.ensure_path(parent.owner_user_id, material_set_id).await?;

        let path = self.paths.find(path_id).await?;
        let saga_id = match path.metadata.get("active_build").and_then(|b| b.get("saga_id")).and_then(|v| v.as_str()) {
            Some(existing) => {
                Uuid::parse_str(existing).map_err(|e| orchestrator_core::OrchestratorError::Parse(e.to_string()))?
            }
            None => {
                let saga_id = self.saga.begin(parent.owner_user_id).await?;
                self.paths
                    .merge_metadata(path_id, json!({"active_build": {"saga_id": saga_id, "job_id": parent.id}}))
                    .await?;
                saga_id
            }
        };

        let existing_children = self.jobs.children(parent.id).await?;
        let already_seeded: HashSet<String> = existing_children.iter().map(|c| c.job_type.clone()).collect();

        let payload = self.child_payload(parent, path_id, saga_id);
        let mut dispatched = Vec::new();
        for name in self.dag.stage_names() {
            let stage = self.dag.get(name).expect("dag iterates its own stages");
            if stage.dependencies.is_empty() && !already_seeded.contains(name) {
                self.jobs
                    .enqueue(name, parent.owner_user_id, Some(parent.id), payload.clone(), self.default_max_attempts)
                    .await?;
                dispatched.push(name.to_string());
            }
        }

        info!(job_id = %parent.id, path_id = %path_id, saga_id = %saga_id, dispatched = ?dispatched, "learning build seeded");
        Ok(json!({"path_id": path_id, "saga_id": saga_id, "dispatched": dispatched}))
    }

    /// Reconciles one round of the DAG against the current state of
    /// `parent_job_id`'s children. Call after every child job reaches a
    /// terminal status (succeeded/failed/canceled).
    pub async fn tick(&self, parent_job_id: Uuid) -> Result<TickOutcome> {
        let parent = self.jobs.find(parent_job_id).await?;
        let path_id = parent.payload_uuid_opt(payload::PATH_ID)?;
        let saga_id = parent.payload_uuid_opt(payload::SAGA_ID)?;
        let (Some(path_id), Some(saga_id)) = (path_id, saga_id) else {
            // Not yet seeded (or seeded under an older payload shape); nothing to reconcile.
            return Ok(TickOutcome::default());
        };

        let path = self.paths.find(path_id).await?;
        if path.metadata.get("build_result").is_some() {
            return Ok(TickOutcome::default());
        }

        let children = self.jobs.children(parent_job_id).await?;
        let mut statuses: HashMap<String, StageStatus> = children
            .iter()
            .map(|c| (c.job_type.clone(), job_status_to_stage_status(c.status)))
            .collect();
        let mut existing: HashSet<String> = children.iter().map(|c| c.job_type.clone()).collect();

        let payload = self.child_payload(&parent, path_id, saga_id);

        // A single `evaluate()` pass only looks one hop past each stage's
        // direct parents, so a cascade failure several levels below a stage
        // (e.g. a DAG root failing while a grandchild is still `Halt`)
        // needs more than one pass to fully propagate. Re-evaluate against
        // the updated `statuses` until a pass inserts nothing new.
        let mut outcome = TickOutcome::default();
        loop {
            let verdicts = evaluate(&self.dag, &statuses);
            let mut progressed = false;
            for (name, verdict) in &verdicts {
                if existing.contains(name) {
                    continue;
                }
                match verdict {
                    Verdict::Dispatchable => {
                        self.jobs
                            .enqueue(name, parent.owner_user_id, Some(parent_job_id), payload.clone(), self.default_max_attempts)
                            .await?;
                        statuses.insert(name.clone(), StageStatus::Running);
                        existing.insert(name.clone());
                        outcome.dispatched.push(name.clone());
                        progressed = true;
                    }
                    Verdict::CascadeFail => {
                        self.jobs
                            .insert_cascade_failed(name, parent.owner_user_id, parent_job_id, payload.clone(), "upstream")
                            .await?;
                        statuses.insert(name.clone(), StageStatus::Failed);
                        existing.insert(name.clone());
                        outcome.cascade_failed.push(name.clone());
                        progressed = true;
                    }
                    Verdict::Halt | Verdict::AlreadyResolved => {}
                }
            }
            if !progressed {
                break;
            }
        }

        let all_terminal = self.dag.stage_names().all(|name| {
            matches!(
                statuses.get(name),
                Some(StageStatus::Succeeded | StageStatus::Failed | StageStatus::Canceled)
            )
        });

        if all_terminal {
            let any_failed = self
                .dag
                .stage_names()
                .any(|name| matches!(statuses.get(name), Some(StageStatus::Failed | StageStatus::Canceled)));

            if any_failed {
                if self.saga.status(saga_id).await? == SagaStatus::Pending {
                    let report = self.saga.compensate(saga_id).await?;
                    warn!(path_id = %path_id, saga_id = %saga_id, reversed = report.reversed, failed = report.failed, "learning build failed; saga compensated");
                }
                self.paths.merge_metadata(path_id, json!({"build_result": "failed"})).await?;
                outcome.finalized = Some(BuildOutcome::Failed);
            } else {
                if self.saga.status(saga_id).await? == SagaStatus::Pending {
                    self.saga.complete(saga_id).await?;
                }
                self.paths.merge_metadata(path_id, json!({"build_result": "succeeded"})).await?;
                info!(path_id = %path_id, saga_id = %saga_id, "learning build succeeded");
                outcome.finalized = Some(BuildOutcome::Succeeded);
            }
        }

        Ok(outcome)
    }
}

pub struct LearningBuildStage {
    dispatcher: Arc<BuildDispatcher>,
}

impl LearningBuildStage {
    pub fn new(dispatcher: Arc<BuildDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Pipeline for LearningBuildStage {
    fn r#type(&self) -> &'static str {
        stage_names::LEARNING_BUILD
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        jc.progress(self.r#type(), 10, "seeding build DAG".to_string()).await?;
        let result = self.dispatcher.seed(&jc.job).await?;
        jc.succeed(result).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_maps_queued_and_running_to_stage_running() {
        assert_eq!(job_status_to_stage_status(JobStatus::Queued), StageStatus::Running);
        assert_eq!(job_status_to_stage_status(JobStatus::Running), StageStatus::Running);
        assert_eq!(job_status_to_stage_status(JobStatus::Succeeded), StageStatus::Succeeded);
        assert_eq!(job_status_to_stage_status(JobStatus::Failed), StageStatus::Failed);
        assert_eq!(job_status_to_stage_status(JobStatus::WaitingUser), StageStatus::WaitingUser);
        assert_eq!(job_status_to_stage_status(JobStatus::Canceled), StageStatus::Canceled);
    }

    // `BuildDispatcher::seed`/`tick` exercise `JobRepo`/`PathRepo`/`SagaCoordinator`
    // against a live Postgres pool; covered by the workspace's integration tests.
}
