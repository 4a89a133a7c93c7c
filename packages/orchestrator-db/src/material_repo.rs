//! Material set / file / chunk storage.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow)]
pub struct MaterialFileRow {
    pub id: Uuid,
    pub material_set_id: Uuid,
    pub original_name: String,
    pub object_key: String,
    pub content_type: Option<String>,
    pub byte_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChunkRow {
    pub id: Uuid,
    pub material_file_id: Uuid,
    pub index: i32,
    pub text: String,
    pub embedding: Option<serde_json::Value>,
    pub kind: String,
    pub page: Option<i32>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChunkRow {
    pub fn is_unextractable(&self) -> bool {
        self.metadata
            .get("unextractable")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// A lexical full-text search hit.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk_id: Uuid,
    pub rank: f64,
}

pub struct MaterialRepo {
    pool: PgPool,
}

impl MaterialRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_material_set(&self, owner_user_id: Uuid, material_set_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO material_set (id, owner_user_id) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(material_set_id)
        .bind(owner_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Idempotent on `(material_set_id, original_name)` — a re-run that
    /// re-uploads the same `web_`-prefixed file is detected here, since the
    /// `originalName` starting with `web_` is how idempotency is checked on
    /// re-runs.
    pub async fn upsert_file(
        &self,
        material_set_id: Uuid,
        original_name: &str,
        object_key: &str,
        content_type: Option<&str>,
        byte_size: Option<i64>,
    ) -> Result<MaterialFileRow> {
        let row = sqlx::query_as::<_, MaterialFileRow>(
            "INSERT INTO material_file (id, material_set_id, original_name, object_key, content_type, byte_size) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (material_set_id, original_name) DO UPDATE SET object_key = EXCLUDED.object_key \
             RETURNING id, material_set_id, original_name, object_key, content_type, byte_size, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(material_set_id)
        .bind(original_name)
        .bind(object_key)
        .bind(content_type)
        .bind(byte_size)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn files_for_set(&self, material_set_id: Uuid) -> Result<Vec<MaterialFileRow>> {
        let rows = sqlx::query_as::<_, MaterialFileRow>(
            "SELECT id, material_set_id, original_name, object_key, content_type, byte_size, created_at \
             FROM material_file WHERE material_set_id = $1 ORDER BY created_at",
        )
        .bind(material_set_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn has_chunks(&self, material_file_id: Uuid) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM chunk WHERE material_file_id = $1")
            .bind(material_file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 > 0)
    }

    pub async fn insert_chunks(&self, material_file_id: Uuid, texts: &[(i32, String, Option<i32>)]) -> Result<i64> {
        let mut inserted = 0i64;
        for (index, text, page) in texts {
            sqlx::query(
                "INSERT INTO chunk (id, material_file_id, index, text, kind, page) \
                 VALUES ($1, $2, $3, $4, 'text', $5)",
            )
            .bind(Uuid::new_v4())
            .bind(material_file_id)
            .bind(index)
            .bind(text)
            .bind(page)
            .execute(&self.pool)
            .await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub async fn chunks_missing_embedding(&self, material_set_id: Uuid, limit: i64) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT c.id, c.material_file_id, c.index, c.text, c.embedding, c.kind, c.page, c.metadata, c.created_at \
             FROM chunk c JOIN material_file f ON f.id = c.material_file_id \
             WHERE f.material_set_id = $1 AND c.embedding IS NULL \
             ORDER BY c.id \
             LIMIT $2",
        )
        .bind(material_set_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_embedding(&self, chunk_id: Uuid, embedding: &[f32]) -> Result<()> {
        let value = serde_json::to_value(embedding).expect("embedding vector serializes");
        sqlx::query("UPDATE chunk SET embedding = $2 WHERE id = $1")
            .bind(chunk_id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn chunks_by_ids(&self, chunk_ids: &[Uuid]) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT id, material_file_id, index, text, embedding, kind, page, metadata, created_at \
             FROM chunk WHERE id = ANY($1) ORDER BY id",
        )
        .bind(chunk_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn chunks_with_embeddings(&self, file_ids: &[Uuid]) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT id, material_file_id, index, text, embedding, kind, page, metadata, created_at \
             FROM chunk WHERE material_file_id = ANY($1) AND embedding IS NOT NULL ORDER BY id",
        )
        .bind(file_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Lexical retrieval: Postgres full-text search ranked by `ts_rank_cd`,
    /// limited to `k`.
    pub async fn lexical_search(&self, file_ids: &[Uuid], query_text: &str, k: i64) -> Result<Vec<LexicalHit>> {
        let rows: Vec<(Uuid, f64)> = sqlx::query_as(
            "SELECT c.id, ts_rank_cd(to_tsvector('english', c.text), plainto_tsquery('english', $2)) AS rank \
             FROM chunk c \
             WHERE c.material_file_id = ANY($1) \
               AND to_tsvector('english', c.text) @@ plainto_tsquery('english', $2) \
             ORDER BY rank DESC, c.id \
             LIMIT $3",
        )
        .bind(file_ids)
        .bind(query_text)
        .bind(k)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(chunk_id, rank)| LexicalHit { chunk_id, rank }).collect())
    }

    /// Every chunk belonging to a material set, for coverage distribution.
    /// Citation membership is computed in
    /// `orchestrator-stages::coverage` by scanning doc bodies returned from
    /// [`crate::node_repo::NodeRepo::doc_bodies_for_material_set`], since
    /// citations live inside each doc's block-list JSON rather than a
    /// dedicated join table.
    pub async fn all_chunks_for_set(&self, material_set_id: Uuid) -> Result<Vec<ChunkRow>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT c.id, c.material_file_id, c.index, c.text, c.embedding, c.kind, c.page, c.metadata, c.created_at \
             FROM chunk c \
             JOIN material_file f ON f.id = c.material_file_id \
             WHERE f.material_set_id = $1 \
             ORDER BY c.id",
        )
        .bind(material_set_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
