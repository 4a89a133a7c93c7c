//! Path storage + `EnsurePath`, guarded by a per-path advisory lock.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow)]
pub struct PathCoverRow {
    pub id: Uuid,
    pub path_id: Uuid,
    pub prompt: String,
    pub status: String,
    pub asset_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PathRow {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub material_set_id: Uuid,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct PathRepo {
    pool: PgPool,
}

impl PathRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Hash used by `pg_advisory_xact_lock(hashtext(...))` so exactly one
    /// Path exists per (user, materialSet): `ensure_path` returns the
    /// existing row or creates it under this advisory lock.
    fn advisory_key(owner_user_id: Uuid, material_set_id: Uuid) -> String {
        format!("path:{owner_user_id}:{material_set_id}")
    }

    /// Returns the existing Path id, or creates one, serialized by a
    /// transaction-scoped advisory lock so two racing workers converge on a
    /// single row instead of both attempting an insert.
    pub async fn ensure_path(&self, owner_user_id: Uuid, material_set_id: Uuid) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        let key = Self::advisory_key(owner_user_id, material_set_id);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&key)
            .execute(&mut *tx)
            .await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM path WHERE owner_user_id = $1 AND material_set_id = $2",
        )
        .bind(owner_user_id)
        .bind(material_set_id)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some((id,)) => id,
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    "INSERT INTO path (id, owner_user_id, material_set_id, metadata) \
                     VALUES ($1, $2, $3, '{}')",
                )
                .bind(id)
                .bind(owner_user_id)
                .bind(material_set_id)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    pub async fn find(&self, path_id: Uuid) -> Result<PathRow> {
        let row = sqlx::query_as::<_, PathRow>(
            "SELECT id, owner_user_id, material_set_id, metadata, created_at, updated_at \
             FROM path WHERE id = $1",
        )
        .bind(path_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| crate::error::DbError::NotFound(format!("path {path_id}")))?;
        Ok(row)
    }

    /// Merge-patch `metadata` (used for web-resources consent, intake
    /// answers, audit results).
    pub async fn merge_metadata(&self, path_id: Uuid, patch: serde_json::Value) -> Result<()> {
        sqlx::query(
            "UPDATE path SET metadata = metadata || $2, updated_at = now() WHERE id = $1",
        )
        .bind(path_id)
        .bind(patch)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The path's cover-image row, if a `path_cover_render` job has already
    /// planned one.
    pub async fn cover_for_path(&self, path_id: Uuid) -> Result<Option<PathCoverRow>> {
        let row = sqlx::query_as::<_, PathCoverRow>(
            "SELECT id, path_id, prompt, status, asset_url, error FROM path_cover WHERE path_id = $1",
        )
        .bind(path_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_cover(&self, path_id: Uuid, prompt: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO path_cover (id, path_id, prompt) VALUES ($1, $2, $3) ON CONFLICT (path_id) DO NOTHING")
            .bind(id)
            .bind(path_id)
            .bind(prompt)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn mark_cover_rendered(&self, path_id: Uuid, asset_url: &str) -> Result<()> {
        sqlx::query("UPDATE path_cover SET status = 'rendered', asset_url = $2, updated_at = now() WHERE path_id = $1")
            .bind(path_id)
            .bind(asset_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_cover_failed(&self, path_id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE path_cover SET status = 'failed', error = $2, updated_at = now() WHERE path_id = $1")
            .bind(path_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Same as [`Self::ensure_path`] but participates in a caller-owned
    /// transaction, for stages that need the Path row and their own
    /// canonical writes to commit atomically.
    pub async fn ensure_path_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner_user_id: Uuid,
        material_set_id: Uuid,
    ) -> Result<Uuid> {
        let key = Self::advisory_key(owner_user_id, material_set_id);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&key)
            .execute(&mut **tx)
            .await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM path WHERE owner_user_id = $1 AND material_set_id = $2",
        )
        .bind(owner_user_id)
        .bind(material_set_id)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some((id,)) = existing {
            return Ok(id);
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO path (id, owner_user_id, material_set_id, metadata) VALUES ($1, $2, $3, '{}')",
        )
        .bind(id)
        .bind(owner_user_id)
        .bind(material_set_id)
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }
}
