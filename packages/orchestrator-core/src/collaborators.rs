//! Named-interface collaborators the orchestrator drives but does not own:
//! object storage and the vector index. Kept here, in the one crate every
//! other orchestrator-*
//! crate already depends on, so `orchestrator-saga` (compensation) and
//! `orchestrator-evidence`/`orchestrator-stages` (retrieval, render upload)
//! share one trait each instead of three narrower ones.

use async_trait::async_trait;

use crate::error::Result;

/// Durable blob storage keyed by a deterministic string path.
/// Every reverser in `orchestrator-saga` treats deletion as idempotent:
/// "delete if exists".
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Idempotent: returns `Ok(())` whether or not the key existed.
    async fn delete_key(&self, key: &str) -> Result<()>;
    /// Idempotent: deletes every object under `prefix`, `Ok(())` if none exist.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
    /// A URL a client can fetch the object from (signed or public, per implementation).
    fn public_url(&self, key: &str) -> String;
}

/// A single vector-store hit: chunk id plus similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: uuid::Uuid,
    pub score: f32,
}

/// The vector index namespace scoped to a material set, used for semantic
/// retrieval. Upserts happen during `embed_chunks`; deletes are a saga
/// reverser (`vector_delete_ids`); queries happen during evidence retrieval.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, namespace: &str, id: uuid::Uuid, embedding: Vec<f32>, metadata: serde_json::Value) -> Result<()>;
    async fn query_top_k(&self, namespace: &str, embedding: &[f32], top_k: usize) -> Result<Vec<VectorHit>>;
    /// Idempotent: returns `Ok(())` whether or not the ids existed.
    async fn delete_ids(&self, namespace: &str, ids: &[uuid::Uuid]) -> Result<()>;
}
