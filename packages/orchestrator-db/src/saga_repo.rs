//! Saga run / saga action storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Pending,
    Completed,
    Failed,
    Compensated,
}

impl SagaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "pending",
            SagaStatus::Completed => "completed",
            SagaStatus::Failed => "failed",
            SagaStatus::Compensated => "compensated",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SagaRunRow {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SagaActionRow {
    pub id: Uuid,
    pub saga_id: Uuid,
    pub kind: String,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct SagaRepo {
    pool: PgPool,
}

impl SagaRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `BeginSaga(ownerUserID) -> sagaID`.
    pub async fn begin(&self, owner_user_id: Uuid) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO saga_run (id, owner_user_id, status) VALUES ($1, $2, 'pending')")
            .bind(id)
            .bind(owner_user_id)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    /// `AppendAction(txHandle, sagaID, kind, params)`. Takes an open
    /// transaction so the insert commits atomically with the forward write
    /// it compensates — this MUST be called inside the same DB transaction
    /// as that forward write.
    pub async fn append_action(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        saga_id: Uuid,
        kind: &str,
        params: serde_json::Value,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO saga_action (id, saga_id, kind, params) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(saga_id)
            .bind(kind)
            .bind(params)
            .execute(&mut **tx)
            .await?;
        Ok(id)
    }

    /// Actions for a saga, ordered newest-first (reverse insertion order —
    /// the order `Compensate` must apply reversers in).
    pub async fn actions_reverse_order(&self, saga_id: Uuid) -> Result<Vec<SagaActionRow>> {
        let rows = sqlx::query_as::<_, SagaActionRow>(
            "SELECT id, saga_id, kind, params, created_at FROM saga_action \
             WHERE saga_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(saga_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_status(&self, saga_id: Uuid, status: SagaStatus) -> Result<()> {
        sqlx::query("UPDATE saga_run SET status = $2, updated_at = now() WHERE id = $1")
            .bind(saga_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find(&self, saga_id: Uuid) -> Result<SagaRunRow> {
        let row = sqlx::query_as::<_, SagaRunRow>(
            "SELECT id, owner_user_id, status, created_at, updated_at FROM saga_run WHERE id = $1",
        )
        .bind(saga_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| crate::error::DbError::NotFound(format!("saga_run {saga_id}")))?;
        Ok(row)
    }

    /// Sagas in `failed`/`compensated` older than `older_than_hours`, for
    /// `SagaCleanup`.
    pub async fn stale_for_cleanup(&self, older_than_hours: i64, limit: i64) -> Result<Vec<SagaRunRow>> {
        let rows = sqlx::query_as::<_, SagaRunRow>(
            "SELECT id, owner_user_id, status, created_at, updated_at FROM saga_run \
             WHERE status IN ('failed', 'compensated') \
               AND updated_at < now() - ($1 || ' hours')::interval \
             ORDER BY updated_at \
             LIMIT $2",
        )
        .bind(older_than_hours.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
