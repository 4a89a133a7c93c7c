//! PathNode / LearningNodeDoc / Figure / Video / DocRevision / GenerationRun
//! storage.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow)]
pub struct PathNodeRow {
    pub id: Uuid,
    pub path_id: Uuid,
    pub position: i32,
    pub title: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct LearningNodeDocRow {
    pub id: Uuid,
    pub path_node_id: Uuid,
    pub active: bool,
    pub body: serde_json::Value,
    pub content_hash: String,
    pub sources_hash: String,
    pub quality_metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Figure,
    Video,
}

#[derive(Debug, Clone, FromRow)]
pub struct AssetRow {
    pub id: Uuid,
    pub path_node_id: Uuid,
    pub slot: i32,
    pub semantic_type: String,
    pub prompt: String,
    pub caption: Option<String>,
    pub alt_text: Option<String>,
    pub placement_hint: Option<String>,
    pub citations: serde_json::Value,
    pub status: String,
    pub asset_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeAvatarRow {
    pub id: Uuid,
    pub path_node_id: Uuid,
    pub prompt: String,
    pub status: String,
    pub asset_url: Option<String>,
    pub error: Option<String>,
}

pub struct NodeRepo {
    pool: PgPool,
}

impl NodeRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn list_for_path(&self, path_id: Uuid) -> Result<Vec<PathNodeRow>> {
        let rows = sqlx::query_as::<_, PathNodeRow>(
            "SELECT id, path_id, position, title, metadata, created_at, updated_at \
             FROM path_node WHERE path_id = $1 ORDER BY position",
        )
        .bind(path_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_node_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        path_id: Uuid,
        position: i32,
        title: &str,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO path_node (id, path_id, position, title, metadata) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (path_id, position) DO NOTHING",
        )
        .bind(id)
        .bind(path_id)
        .bind(position)
        .bind(title)
        .bind(metadata)
        .execute(&mut **tx)
        .await?;
        Ok(id)
    }

    pub async fn active_doc(&self, path_node_id: Uuid) -> Result<Option<LearningNodeDocRow>> {
        let row = sqlx::query_as::<_, LearningNodeDocRow>(
            "SELECT id, path_node_id, active, body, content_hash, sources_hash, quality_metrics, \
                    created_at, updated_at \
             FROM learning_node_doc WHERE path_node_id = $1 AND active",
        )
        .bind(path_node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Upsert the active doc for a node. No-ops (by the caller checking
    /// first) when both `content_hash` and `sources_hash` already match.
    pub async fn upsert_doc(
        &self,
        path_node_id: Uuid,
        body: serde_json::Value,
        content_hash: &str,
        sources_hash: &str,
        quality_metrics: serde_json::Value,
    ) -> Result<Uuid> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE learning_node_doc SET active = false WHERE path_node_id = $1 AND active")
            .bind(path_node_id)
            .execute(&mut *tx)
            .await?;

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO learning_node_doc \
                (id, path_node_id, active, body, content_hash, sources_hash, quality_metrics) \
             VALUES ($1, $2, true, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(path_node_id)
        .bind(body)
        .bind(content_hash)
        .bind(sources_hash)
        .bind(quality_metrics)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Every active doc body for a material set, for coverage accounting.
    pub async fn doc_bodies_for_material_set(&self, material_set_id: Uuid) -> Result<Vec<(Uuid, serde_json::Value)>> {
        let rows: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
            "SELECT n.id, d.body FROM learning_node_doc d \
             JOIN path_node n ON n.id = d.path_node_id \
             JOIN path p ON p.id = n.path_id \
             WHERE p.material_set_id = $1 AND d.active",
        )
        .bind(material_set_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Merge-patch a node's `metadata` (activity slots, goal, concept keys),
    /// the same shape as `PathRepo::merge_metadata`.
    pub async fn merge_metadata(&self, path_node_id: Uuid, patch: serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE path_node SET metadata = metadata || $2, updated_at = now() WHERE id = $1")
            .bind(path_node_id)
            .bind(patch)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_revision(
        &self,
        doc_id: Uuid,
        block_id: &str,
        before_json: Option<serde_json::Value>,
        after_json: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO doc_revision (id, doc_id, block_id, before_json, after_json) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(doc_id)
        .bind(block_id)
        .bind(before_json)
        .bind(after_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn table(kind: AssetKind) -> &'static str {
        match kind {
            AssetKind::Figure => "figure",
            AssetKind::Video => "video",
        }
    }

    pub async fn assets_for_node(&self, kind: AssetKind, path_node_id: Uuid) -> Result<Vec<AssetRow>> {
        let query = format!(
            "SELECT id, path_node_id, slot, semantic_type, prompt, caption, alt_text, placement_hint, citations, status, asset_url, error \
             FROM {} WHERE path_node_id = $1 ORDER BY slot",
            Self::table(kind)
        );
        let rows = sqlx::query_as::<_, AssetRow>(&query)
            .bind(path_node_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn plan_zero_item_sentinel(&self, kind: AssetKind, path_node_id: Uuid) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (id, path_node_id, slot, semantic_type, prompt, status) \
             VALUES ($1, $2, 0, 'none', '', 'skipped') \
             ON CONFLICT (path_node_id, slot) DO NOTHING",
            Self::table(kind)
        );
        sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(path_node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist one `status=planned` figure/video row: the plan stage writes
    /// every valid item this way. `duration_sec` is ignored for
    /// [`AssetKind::Figure`] since the figure table has no such column.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_planned_asset(
        &self,
        kind: AssetKind,
        path_node_id: Uuid,
        slot: i32,
        semantic_type: &str,
        prompt: &str,
        caption: Option<&str>,
        alt_text: Option<&str>,
        placement_hint: Option<&str>,
        citations: serde_json::Value,
        duration_sec: Option<i32>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        match kind {
            AssetKind::Figure => {
                sqlx::query(
                    "INSERT INTO figure (id, path_node_id, slot, semantic_type, prompt, caption, alt_text, placement_hint, citations, status) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'planned') \
                     ON CONFLICT (path_node_id, slot) DO NOTHING",
                )
                .bind(id)
                .bind(path_node_id)
                .bind(slot)
                .bind(semantic_type)
                .bind(prompt)
                .bind(caption)
                .bind(alt_text)
                .bind(placement_hint)
                .bind(citations)
                .execute(&self.pool)
                .await?;
            }
            AssetKind::Video => {
                sqlx::query(
                    "INSERT INTO video (id, path_node_id, slot, semantic_type, prompt, caption, alt_text, placement_hint, citations, duration_sec, status) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'planned') \
                     ON CONFLICT (path_node_id, slot) DO NOTHING",
                )
                .bind(id)
                .bind(path_node_id)
                .bind(slot)
                .bind(semantic_type)
                .bind(prompt)
                .bind(caption)
                .bind(alt_text)
                .bind(placement_hint)
                .bind(citations)
                .bind(duration_sec)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(id)
    }

    pub async fn mark_rendered(&self, kind: AssetKind, asset_id: Uuid, asset_url: &str) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = 'rendered', asset_url = $2, updated_at = now() WHERE id = $1",
            Self::table(kind)
        );
        sqlx::query(&query).bind(asset_id).bind(asset_url).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn mark_failed(&self, kind: AssetKind, asset_id: Uuid, error: &str) -> Result<()> {
        let query = format!(
            "UPDATE {} SET status = 'failed', error = $2, updated_at = now() WHERE id = $1",
            Self::table(kind)
        );
        sqlx::query(&query).bind(asset_id).bind(error).execute(&self.pool).await?;
        Ok(())
    }

    /// The node's avatar-image row, if a `node_avatar_render` job has
    /// already planned one.
    pub async fn avatar_for_node(&self, path_node_id: Uuid) -> Result<Option<NodeAvatarRow>> {
        let row = sqlx::query_as::<_, NodeAvatarRow>(
            "SELECT id, path_node_id, prompt, status, asset_url, error FROM node_avatar WHERE path_node_id = $1",
        )
        .bind(path_node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn insert_avatar(&self, path_node_id: Uuid, prompt: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO node_avatar (id, path_node_id, prompt) VALUES ($1, $2, $3) ON CONFLICT (path_node_id) DO NOTHING")
            .bind(id)
            .bind(path_node_id)
            .bind(prompt)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn mark_avatar_rendered(&self, path_node_id: Uuid, asset_url: &str) -> Result<()> {
        sqlx::query("UPDATE node_avatar SET status = 'rendered', asset_url = $2, updated_at = now() WHERE path_node_id = $1")
            .bind(path_node_id)
            .bind(asset_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_avatar_failed(&self, path_node_id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE node_avatar SET status = 'failed', error = $2, updated_at = now() WHERE path_node_id = $1")
            .bind(path_node_id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_generation_run(
        &self,
        job_id: Option<Uuid>,
        target_kind: &str,
        target_id: Uuid,
        attempts: i32,
        latency_ms: i64,
        errors: serde_json::Value,
        quality_metrics: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO generation_run \
                (id, job_id, target_kind, target_id, attempts, latency_ms, errors, quality_metrics) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(target_kind)
        .bind(target_id)
        .bind(attempts)
        .bind(latency_ms)
        .bind(errors)
        .bind(quality_metrics)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
