//! Shared helpers for the "canonical write" pattern every graph-mutating
//! stage follows: a per-path advisory lock plus `ON CONFLICT DO NOTHING`
//! tolerance of a lost claim race.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;

/// Acquire the per-path advisory lock for the duration of `tx`, scoped to a
/// namespace so different canonical-write stages don't contend on the same
/// numeric key space. The lock key is derived from a stable hash of
/// (namespace, id) and is held only for the transaction's lifetime.
pub async fn lock_path_for_write(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, namespace: &str, path_id: Uuid) -> Result<()> {
    let key = format!("{namespace}:{path_id}");
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))").bind(&key).execute(&mut **tx).await.map_err(orchestrator_db::DbError::from)?;
    Ok(())
}

/// Begin a transaction on `pool` and immediately take the canonical-write
/// lock for `path_id` under `namespace`.
pub async fn begin_locked(pool: &PgPool, namespace: &str, path_id: Uuid) -> Result<sqlx::Transaction<'_, sqlx::Postgres>> {
    let mut tx = pool.begin().await.map_err(orchestrator_db::DbError::from)?;
    lock_path_for_write(&mut tx, namespace, path_id).await?;
    Ok(tx)
}

#[cfg(test)]
mod tests {
    // Advisory locks only make sense against a live Postgres connection;
    // exercised by the `#[ignore]`-marked integration tests alongside
    // `orchestrator-db`'s own.
}
