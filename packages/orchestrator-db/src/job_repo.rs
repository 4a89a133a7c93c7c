//! Durable job store.
//!
//! The atomic claim is a `WITH ... FOR UPDATE SKIP LOCKED` CTE feeding an
//! `UPDATE ... RETURNING *`, giving exactly-once claim semantics across
//! concurrent workers without a separate distributed lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::job::{Job, JobStatus};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{DbError, Result};

#[derive(FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    owner_user_id: Uuid,
    parent_job_id: Option<Uuid>,
    payload: serde_json::Value,
    status: String,
    stage: Option<String>,
    progress: i32,
    message: Option<String>,
    attempts: i32,
    max_attempts: i32,
    result: Option<serde_json::Value>,
    error: Option<String>,
    worker_id: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    lock_expires_at: Option<DateTime<Utc>>,
    heartbeat_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: row.id,
            job_type: row.job_type,
            owner_user_id: row.owner_user_id,
            parent_job_id: row.parent_job_id,
            payload: row.payload,
            status: JobStatus::from_str(&row.status)?,
            stage: row.stage,
            progress: row.progress,
            message: row.message,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            result: row.result,
            error: row.error,
            worker_id: row.worker_id,
            locked_at: row.locked_at,
            lock_expires_at: row.lock_expires_at,
            heartbeat_at: row.heartbeat_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, job_type, owner_user_id, parent_job_id, payload, status, stage, \
    progress, message, attempts, max_attempts, result, error, worker_id, locked_at, \
    lock_expires_at, heartbeat_at, created_at, updated_at";

pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `Enqueue(type, owner, payload, parent?)`.
    pub async fn enqueue(
        &self,
        job_type: &str,
        owner_user_id: Uuid,
        parent_job_id: Option<Uuid>,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> Result<Job> {
        let job = Job::new_queued(job_type, owner_user_id, parent_job_id, payload, max_attempts);
        let query = format!(
            "INSERT INTO job ({JOB_COLUMNS}) VALUES \
             ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19) \
             RETURNING {JOB_COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&query)
            .bind(job.id)
            .bind(&job.job_type)
            .bind(job.owner_user_id)
            .bind(job.parent_job_id)
            .bind(&job.payload)
            .bind(job.status.as_str())
            .bind(&job.stage)
            .bind(job.progress)
            .bind(&job.message)
            .bind(job.attempts)
            .bind(job.max_attempts)
            .bind(&job.result)
            .bind(&job.error)
            .bind(&job.worker_id)
            .bind(job.locked_at)
            .bind(job.lock_expires_at)
            .bind(job.heartbeat_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    /// `Claim(workerID, types, leaseDuration) -> Job?`. Also reclaims jobs
    /// whose lease has expired without a heartbeat — such a job is
    /// re-claimable by any worker.
    pub async fn claim(
        &self,
        worker_id: &str,
        job_types: &[String],
        lease: chrono::Duration,
    ) -> Result<Option<Job>> {
        let query = format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM job
                WHERE job_type = ANY($1)
                  AND (
                        status = 'queued'
                        OR (status = 'running' AND lock_expires_at < now())
                      )
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE job
            SET status = 'running',
                worker_id = $2,
                locked_at = now(),
                lock_expires_at = now() + ($3 || ' milliseconds')::interval,
                heartbeat_at = now(),
                attempts = attempts + 1,
                updated_at = now()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(job_types)
            .bind(worker_id)
            .bind(lease.num_milliseconds().to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    pub async fn heartbeat(&self, job_id: Uuid, lease: chrono::Duration) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job SET heartbeat_at = now(), \
             lock_expires_at = now() + ($2 || ' milliseconds')::interval, updated_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(lease.num_milliseconds().to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::JobNotFound(job_id));
        }
        Ok(())
    }

    pub async fn progress(
        &self,
        job_id: Uuid,
        stage: &str,
        pct: i32,
        message: Option<String>,
    ) -> Result<()> {
        // `UpdateFieldsUnlessStatus([canceled])`: never clobber a job
        // that has already been canceled out from under the stage.
        sqlx::query(
            "UPDATE job SET stage = $2, progress = $3, message = $4, updated_at = now() \
             WHERE id = $1 AND status <> 'canceled'",
        )
        .bind(job_id)
        .bind(stage)
        .bind(pct.clamp(0, 100))
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn succeed(&self, job_id: Uuid, result: serde_json::Value) -> Result<()> {
        sqlx::query(
            "UPDATE job SET status = 'succeeded', progress = 100, result = $2, error = NULL, \
             locked_at = NULL, lock_expires_at = NULL, updated_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `true` when the job was requeued for another attempt, `false`
    /// when it failed terminally.
    pub async fn fail(&self, job_id: Uuid, stage: &str, error: &str) -> Result<bool> {
        let row: (String,) = sqlx::query_as(
            "UPDATE job SET \
               status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END, \
               stage = $2, error = $3, locked_at = NULL, lock_expires_at = NULL, updated_at = now() \
             WHERE id = $1 AND status = 'running' \
             RETURNING status",
        )
        .bind(job_id)
        .bind(stage)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => DbError::JobNotFound(job_id),
            other => DbError::Sqlx(other),
        })?;
        Ok(row.0 == "queued")
    }

    pub async fn suspend(&self, job_id: Uuid, question_id: Uuid, question_seq: i64) -> Result<()> {
        let result = serde_json::json!({
            "waiting_on_question_id": question_id,
            "waiting_on_question_seq": question_seq,
        });
        sqlx::query(
            "UPDATE job SET status = 'waiting_user', result = $2, locked_at = NULL, \
             lock_expires_at = NULL, updated_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `ResumeFromWait(jobID)`.
    pub async fn resume_from_wait(&self, job_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job SET status = 'queued', updated_at = now() \
             WHERE id = $1 AND status = 'waiting_user'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::JobNotFound(job_id));
        }
        Ok(())
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE job SET status = 'canceled', locked_at = NULL, lock_expires_at = NULL, \
             updated_at = now() \
             WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'canceled')",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Job> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job WHERE id = $1");
        let row: JobRow = sqlx::query_as(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::JobNotFound(job_id))?;
        row.try_into()
    }

    pub async fn children(&self, parent_job_id: Uuid) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE parent_job_id = $1 ORDER BY created_at"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(parent_job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Insert a child job already in its terminal `failed` state, for the
    /// cascade-fail case in the Build DAG dispatcher: a stage whose
    /// dependency failed is marked failed without ever running.
    pub async fn insert_cascade_failed(
        &self,
        job_type: &str,
        owner_user_id: Uuid,
        parent_job_id: Uuid,
        payload: serde_json::Value,
        error: &str,
    ) -> Result<Job> {
        let mut job = Job::new_queued(job_type, owner_user_id, Some(parent_job_id), payload, 0);
        job.status = JobStatus::Failed;
        job.error = Some(error.to_string());
        let query = format!(
            "INSERT INTO job ({JOB_COLUMNS}) VALUES \
             ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19) \
             RETURNING {JOB_COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&query)
            .bind(job.id)
            .bind(&job.job_type)
            .bind(job.owner_user_id)
            .bind(job.parent_job_id)
            .bind(&job.payload)
            .bind(job.status.as_str())
            .bind(&job.stage)
            .bind(job.progress)
            .bind(&job.message)
            .bind(job.attempts)
            .bind(job.max_attempts)
            .bind(&job.result)
            .bind(&job.error)
            .bind(&job.worker_id)
            .bind(job.locked_at)
            .bind(job.lock_expires_at)
            .bind(job.heartbeat_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    pub async fn is_canceled(&self, job_id: Uuid) -> Result<bool> {
        let row: (String,) = sqlx::query_as("SELECT status FROM job WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::JobNotFound(job_id))?;
        Ok(row.0 == "canceled")
    }

    /// `UpdateFieldsUnlessStatus(jobID, forbiddenStatuses, fields)` for the
    /// narrow case every stage needs: patching `result` after a resume-patch
    /// without racing a concurrent cancel.
    pub async fn patch_result_unless_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        forbidden: &[String],
        result: serde_json::Value,
    ) -> Result<()> {
        sqlx::query("UPDATE job SET result = $2, updated_at = now() WHERE id = $1 AND status <> ALL($3)")
            .bind(job_id)
            .bind(result)
            .bind(forbidden)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Bridges `orchestrator-core`'s narrow [`orchestrator_core::pipeline::JobUpdates`]
/// trait to this repository, so stage code never depends on `sqlx` directly.
#[async_trait]
impl orchestrator_core::pipeline::JobUpdates for JobRepo {
    async fn progress(
        &self,
        job_id: Uuid,
        stage: &str,
        pct: i32,
        message: Option<String>,
    ) -> orchestrator_core::Result<()> {
        JobRepo::progress(self, job_id, stage, pct, message).await.map_err(Into::into)
    }

    async fn succeed(&self, job_id: Uuid, result: serde_json::Value) -> orchestrator_core::Result<()> {
        JobRepo::succeed(self, job_id, result).await.map_err(Into::into)
    }

    async fn fail(&self, job_id: Uuid, stage: &str, error: &str) -> orchestrator_core::Result<bool> {
        JobRepo::fail(self, job_id, stage, error).await.map_err(Into::into)
    }

    async fn suspend(&self, job_id: Uuid, question_id: Uuid, question_seq: i64) -> orchestrator_core::Result<()> {
        JobRepo::suspend(self, job_id, question_id, question_seq).await.map_err(Into::into)
    }

    async fn heartbeat(&self, job_id: Uuid) -> orchestrator_core::Result<()> {
        JobRepo::heartbeat(self, job_id, chrono::Duration::seconds(90)).await.map_err(Into::into)
    }

    async fn is_canceled(&self, job_id: Uuid) -> orchestrator_core::Result<bool> {
        JobRepo::is_canceled(self, job_id).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    // Exercised against a real Postgres instance by the workspace's
    // integration tests (`orchestrator-db/tests/job_repo.rs`); unit tests
    // here are limited to logic with no DB round-trip.
    use super::*;

    #[test]
    fn job_columns_list_has_no_trailing_comma() {
        assert!(!JOB_COLUMNS.trim_end().ends_with(','));
        assert_eq!(JOB_COLUMNS.split(',').count(), 19);
    }
}
