//! Reference `VectorStore` implementation for semantic retrieval, backed
//! by the same Postgres database everything else already uses so the
//! worker binary runs standalone without a separate vector index deployment.
//! A production deployment is free to swap in a dedicated index (Qdrant,
//! pgvector) behind the same `orchestrator_core::VectorStore` trait —
//! the collaborator is named-interface only.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use orchestrator_core::{Result as CoreResult, VectorHit, VectorStore};

use crate::error::Result;

#[derive(FromRow)]
struct VectorRow {
    id: Uuid,
    embedding: serde_json::Value,
}

pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_inner(&self, namespace: &str, id: Uuid, embedding: Vec<f32>, metadata: serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO vector_entry (namespace, id, embedding, metadata) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (namespace, id) DO UPDATE SET embedding = EXCLUDED.embedding, metadata = EXCLUDED.metadata",
        )
        .bind(namespace)
        .bind(id)
        .bind(serde_json::to_value(&embedding).unwrap_or_default())
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_top_k_inner(&self, namespace: &str, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>> {
        let rows: Vec<VectorRow> =
            sqlx::query_as("SELECT id, embedding FROM vector_entry WHERE namespace = $1 ORDER BY id")
                .bind(namespace)
                .fetch_all(&self.pool)
                .await?;

        let mut scored: Vec<VectorHit> = rows
            .into_iter()
            .filter_map(|row| {
                let candidate: Vec<f32> = serde_json::from_value(row.embedding).ok()?;
                Some(VectorHit { chunk_id: row.id, score: cosine_similarity(embedding, &candidate) })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_ids_inner(&self, namespace: &str, ids: &[Uuid]) -> Result<()> {
        sqlx::query("DELETE FROM vector_entry WHERE namespace = $1 AND id = ANY($2)")
            .bind(namespace)
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, namespace: &str, id: Uuid, embedding: Vec<f32>, metadata: serde_json::Value) -> CoreResult<()> {
        self.upsert_inner(namespace, id, embedding, metadata).await.map_err(Into::into)
    }

    async fn query_top_k(&self, namespace: &str, embedding: &[f32], top_k: usize) -> CoreResult<Vec<VectorHit>> {
        self.query_top_k_inner(namespace, embedding, top_k).await.map_err(Into::into)
    }

    async fn delete_ids(&self, namespace: &str, ids: &[Uuid]) -> CoreResult<()> {
        self.delete_ids_inner(namespace, ids).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}
