//! Concept / concept edge / concept evidence storage.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, FromRow)]
pub struct ConceptRow {
    pub id: Uuid,
    pub path_id: Uuid,
    pub key: String,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub struct ConceptRepo {
    pool: PgPool,
}

impl ConceptRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn exists_for_path(&self, path_id: Uuid) -> Result<bool> {
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM concept WHERE path_id = $1")
            .bind(path_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 > 0)
    }

    pub async fn list_for_path(&self, path_id: Uuid) -> Result<Vec<ConceptRow>> {
        let rows = sqlx::query_as::<_, ConceptRow>(
            "SELECT id, path_id, key, parent_id, title, metadata, created_at \
             FROM concept WHERE path_id = $1 ORDER BY key",
        )
        .bind(path_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Insert a concept inside the caller's canonical-write transaction.
    /// `ON CONFLICT DO NOTHING` tolerates a lost claim race: a second worker
    /// that re-ran this stage after a lease expiry converges on the same
    /// rows instead of erroring.
    pub async fn insert_concept_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        path_id: Uuid,
        key: &str,
        parent_id: Option<Uuid>,
        title: &str,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let row: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO concept (id, path_id, key, parent_id, title, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (path_id, key) DO NOTHING \
             RETURNING id",
        )
        .bind(id)
        .bind(path_id)
        .bind(key)
        .bind(parent_id)
        .bind(title)
        .bind(metadata)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some((id,)) => Ok(id),
            None => {
                let existing: (Uuid,) = sqlx::query_as(
                    "SELECT id FROM concept WHERE path_id = $1 AND key = $2",
                )
                .bind(path_id)
                .bind(key)
                .fetch_one(&mut **tx)
                .await?;
                Ok(existing.0)
            }
        }
    }

    pub async fn insert_edge_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        path_id: Uuid,
        from_concept: Uuid,
        to_concept: Uuid,
        relation: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO concept_edge (id, path_id, from_concept, to_concept, relation) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (path_id, from_concept, to_concept, relation) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(path_id)
        .bind(from_concept)
        .bind(to_concept)
        .bind(relation)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn insert_evidence_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        concept_id: Uuid,
        chunk_id: Uuid,
    ) -> Result<()> {
        sqlx::query("INSERT INTO concept_evidence (id, concept_id, chunk_id) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(concept_id)
            .bind(chunk_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
