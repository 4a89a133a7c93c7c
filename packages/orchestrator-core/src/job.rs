//! Job domain model and state machine.
//!
//! A build job moves through six states: queued, running, waiting_user,
//! succeeded, failed, canceled. It can additionally suspend to
//! `waiting_user` while an interactive stage waits on a chat reply, and
//! resume from there back into `queued`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Job lifecycle status. Transitions are restricted to a fixed set of
/// directed edges; enforcement lives in [`JobStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    WaitingUser,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::WaitingUser => "waiting_user",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "waiting_user" => Ok(JobStatus::WaitingUser),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(OrchestratorError::Parse(format!("invalid job status: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub owner_user_id: Uuid,
    pub parent_job_id: Option<Uuid>,
    pub payload: Value,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub progress: i32,
    pub message: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Construct a new queued job, ready to be persisted by `orchestrator-db`.
    pub fn new_queued(
        job_type: impl Into<String>,
        owner_user_id: Uuid,
        parent_job_id: Option<Uuid>,
        payload: Value,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            owner_user_id,
            parent_job_id,
            payload,
            status: JobStatus::Queued,
            stage: None,
            progress: 0,
            message: None,
            attempts: 0,
            max_attempts,
            result: None,
            error: None,
            worker_id: None,
            locked_at: None,
            lock_expires_at: None,
            heartbeat_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Read a required UUID field out of the job payload.
    pub fn payload_uuid(&self, key: &str) -> Result<Uuid> {
        let raw = self
            .payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestratorError::Config(format!("payload missing `{key}`")))?;
        Uuid::parse_str(raw).map_err(|e| OrchestratorError::Parse(format!("`{key}`: {e}")))
    }

    /// Read an optional UUID field out of the job payload.
    pub fn payload_uuid_opt(&self, key: &str) -> Result<Option<Uuid>> {
        match self.payload.get(key).and_then(Value::as_str) {
            Some(raw) => Ok(Some(
                Uuid::parse_str(raw).map_err(|e| OrchestratorError::Parse(format!("`{key}`: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    /// Read an optional string field out of the job payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Read an optional bool field out of the job payload, defaulting to `false`.
    pub fn payload_bool(&self, key: &str) -> bool {
        self.payload.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Enforces the job's directed state-transition graph: wraps a job,
/// exposes one method per transition, and returns a typed error on an
/// illegal one.
pub struct JobStateMachine {
    job: Job,
}

impl JobStateMachine {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_job(self) -> Job {
        self.job
    }

    fn invalid(&self, to: &str) -> OrchestratorError {
        OrchestratorError::InvalidStateTransition {
            from: self.job.status.as_str().to_string(),
            to: to.to_string(),
        }
    }

    /// queued → running
    pub fn start(&mut self, worker_id: String, lease: chrono::Duration) -> Result<()> {
        if self.job.status != JobStatus::Queued {
            return Err(self.invalid("running"));
        }
        let now = Utc::now();
        self.job.status = JobStatus::Running;
        self.job.worker_id = Some(worker_id);
        self.job.locked_at = Some(now);
        self.job.lock_expires_at = Some(now + lease);
        self.job.heartbeat_at = Some(now);
        self.job.attempts += 1;
        self.job.updated_at = now;
        Ok(())
    }

    /// Refresh the lease without changing status.
    pub fn heartbeat(&mut self, lease: chrono::Duration) -> Result<()> {
        if self.job.status != JobStatus::Running {
            return Err(self.invalid("heartbeat"));
        }
        let now = Utc::now();
        self.job.lock_expires_at = Some(now + lease);
        self.job.heartbeat_at = Some(now);
        self.job.updated_at = now;
        Ok(())
    }

    /// Update stage/progress/message while running. Progress is monotonic.
    pub fn progress(&mut self, stage: impl Into<String>, pct: i32, message: Option<String>) -> Result<()> {
        if self.job.status != JobStatus::Running {
            return Err(self.invalid("progress"));
        }
        let pct = pct.clamp(0, 100);
        if pct < self.job.progress {
            return Err(OrchestratorError::Config(format!(
                "progress must be monotonic: {} -> {}",
                self.job.progress, pct
            )));
        }
        self.job.stage = Some(stage.into());
        self.job.progress = pct;
        self.job.message = message;
        self.job.updated_at = Utc::now();
        Ok(())
    }

    /// running → succeeded
    pub fn succeed(&mut self, result: Value) -> Result<()> {
        if self.job.status != JobStatus::Running {
            return Err(self.invalid("succeeded"));
        }
        let now = Utc::now();
        self.job.status = JobStatus::Succeeded;
        self.job.progress = 100;
        self.job.result = Some(result);
        self.job.error = None;
        self.job.locked_at = None;
        self.job.lock_expires_at = None;
        self.job.updated_at = now;
        Ok(())
    }

    /// running → failed (terminal) or queued (retry), depending on attempts remaining.
    pub fn fail(&mut self, stage: impl Into<String>, error: impl Into<String>) -> Result<bool> {
        if self.job.status != JobStatus::Running {
            return Err(self.invalid("failed"));
        }
        let now = Utc::now();
        self.job.stage = Some(stage.into());
        self.job.error = Some(error.into());
        self.job.locked_at = None;
        self.job.lock_expires_at = None;
        self.job.updated_at = now;

        if self.job.attempts < self.job.max_attempts {
            self.job.status = JobStatus::Queued;
            Ok(true)
        } else {
            self.job.status = JobStatus::Failed;
            Ok(false)
        }
    }

    /// running → waiting_user, recording which question the job is blocked on.
    pub fn suspend(&mut self, question_id: Uuid, question_seq: i64) -> Result<()> {
        if self.job.status != JobStatus::Running {
            return Err(self.invalid("waiting_user"));
        }
        let now = Utc::now();
        self.job.status = JobStatus::WaitingUser;
        self.job.result = Some(serde_json::json!({
            "waiting_on_question_id": question_id,
            "waiting_on_question_seq": question_seq,
        }));
        self.job.locked_at = None;
        self.job.lock_expires_at = None;
        self.job.updated_at = now;
        Ok(())
    }

    /// waiting_user → queued, triggered by a matching user chat reply.
    pub fn resume(&mut self) -> Result<()> {
        if self.job.status != JobStatus::WaitingUser {
            return Err(self.invalid("queued (resume)"));
        }
        self.job.status = JobStatus::Queued;
        self.job.updated_at = Utc::now();
        Ok(())
    }

    /// * → canceled, unless already terminal.
    pub fn cancel(&mut self) -> Result<()> {
        if self.job.status.is_terminal() {
            return Err(self.invalid("canceled"));
        }
        self.job.status = JobStatus::Canceled;
        self.job.locked_at = None;
        self.job.lock_expires_at = None;
        self.job.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_job() -> Job {
        Job::new_queued("ingest_chunks", Uuid::new_v4(), None, serde_json::json!({}), 3)
    }

    #[test]
    fn queued_to_running_increments_attempts() {
        let mut sm = JobStateMachine::new(fresh_job());
        sm.start("worker-1".into(), chrono::Duration::seconds(30)).unwrap();
        assert_eq!(sm.job().status, JobStatus::Running);
        assert_eq!(sm.job().attempts, 1);
        assert!(sm.job().locked_at.is_some());
    }

    #[test]
    fn progress_must_be_monotonic() {
        let mut sm = JobStateMachine::new(fresh_job());
        sm.start("w".into(), chrono::Duration::seconds(30)).unwrap();
        sm.progress("embed_chunks", 50, None).unwrap();
        let err = sm.progress("embed_chunks", 10, None);
        assert!(err.is_err());
    }

    #[test]
    fn fail_retries_until_max_attempts() {
        let mut sm = JobStateMachine::new(fresh_job());
        sm.start("w".into(), chrono::Duration::seconds(30)).unwrap();
        let retried = sm.fail("ingest_chunks", "boom").unwrap();
        assert!(retried);
        assert_eq!(sm.job().status, JobStatus::Queued);

        sm.start("w".into(), chrono::Duration::seconds(30)).unwrap();
        let retried = sm.fail("ingest_chunks", "boom").unwrap();
        assert!(retried);

        sm.start("w".into(), chrono::Duration::seconds(30)).unwrap();
        let retried = sm.fail("ingest_chunks", "boom").unwrap();
        assert!(!retried);
        assert_eq!(sm.job().status, JobStatus::Failed);
    }

    #[test]
    fn suspend_then_resume_round_trips() {
        let mut sm = JobStateMachine::new(fresh_job());
        sm.start("w".into(), chrono::Duration::seconds(30)).unwrap();
        let qid = Uuid::new_v4();
        sm.suspend(qid, 7).unwrap();
        assert_eq!(sm.job().status, JobStatus::WaitingUser);
        sm.resume().unwrap();
        assert_eq!(sm.job().status, JobStatus::Queued);
    }

    #[test]
    fn cannot_cancel_terminal_job() {
        let mut sm = JobStateMachine::new(fresh_job());
        sm.start("w".into(), chrono::Duration::seconds(30)).unwrap();
        sm.succeed(serde_json::json!({"ok": true})).unwrap();
        assert!(sm.cancel().is_err());
    }

    #[test]
    fn payload_uuid_roundtrip() {
        let id = Uuid::new_v4();
        let job = Job::new_queued(
            "ingest_chunks",
            Uuid::new_v4(),
            None,
            serde_json::json!({ "material_set_id": id.to_string() }),
            3,
        );
        assert_eq!(job.payload_uuid("material_set_id").unwrap(), id);
        assert!(job.payload_uuid("missing").is_err());
    }
}
