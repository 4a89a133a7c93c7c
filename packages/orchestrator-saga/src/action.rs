//! Saga action kinds as an open-ended registry: a tagged variant
//! (`kind: &str`, `params: Value`) with a `kind -> reverser` handler table.
//! New kinds register at init; unknown kinds during compensation log-and-skip
//! rather than panic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::{ObjectStore, VectorStore};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

pub const OBJECT_DELETE_KEY: &str = "object_delete_key";
pub const OBJECT_DELETE_PREFIX: &str = "object_delete_prefix";
pub const VECTOR_DELETE_IDS: &str = "vector_delete_ids";

/// Reverses one forward-committed side effect. Implementations MUST be
/// idempotent (delete-if-exists) since `Compensate` may be re-invoked by
/// `SagaCleanup` against an action already reversed.
#[async_trait]
pub trait Reverser: Send + Sync {
    async fn reverse(&self, params: &Value) -> Result<()>;
}

/// `kind -> reverser` handler table. Unknown kinds are logged and skipped
/// during compensation instead of treated as a hard failure, since a saga
/// compensated by a newer binary may carry action kinds an older one doesn't
/// recognize (and vice versa during a rolling deploy).
#[derive(Clone, Default)]
pub struct ReverserRegistry {
    reversers: HashMap<&'static str, Arc<dyn Reverser>>,
}

impl ReverserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &'static str, reverser: Arc<dyn Reverser>) {
        self.reversers.insert(kind, reverser);
    }

    /// The three built-in reverser kinds, wired to the named
    /// `ObjectStore`/`VectorStore` collaborators.
    pub fn with_defaults(object_store: Arc<dyn ObjectStore>, vector_store: Arc<dyn VectorStore>) -> Self {
        let mut registry = Self::new();
        registry.register(OBJECT_DELETE_KEY, Arc::new(ObjectDeleteKey { store: object_store.clone() }));
        registry.register(OBJECT_DELETE_PREFIX, Arc::new(ObjectDeletePrefix { store: object_store }));
        registry.register(VECTOR_DELETE_IDS, Arc::new(VectorDeleteIds { store: vector_store }));
        registry
    }

    /// Reverse a single action by kind. Returns `Ok(())` for an unrecognized
    /// kind after logging a warning — compensation is best-effort, not a
    /// hard dependency on every reverser being registered.
    pub async fn reverse(&self, kind: &str, params: &Value) -> Result<()> {
        match self.reversers.get(kind) {
            Some(reverser) => reverser.reverse(params).await,
            None => {
                warn!(kind, "unknown saga action kind during compensation; skipping");
                Ok(())
            }
        }
    }
}

struct ObjectDeleteKey {
    store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl Reverser for ObjectDeleteKey {
    async fn reverse(&self, params: &Value) -> Result<()> {
        let key = params
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::SagaError::Core(orchestrator_core::OrchestratorError::Parse(
                "object_delete_key missing `key`".into(),
            )))?;
        self.store.delete_key(key).await?;
        Ok(())
    }
}

struct ObjectDeletePrefix {
    store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl Reverser for ObjectDeletePrefix {
    async fn reverse(&self, params: &Value) -> Result<()> {
        let prefix = params
            .get("prefix")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::SagaError::Core(orchestrator_core::OrchestratorError::Parse(
                "object_delete_prefix missing `prefix`".into(),
            )))?;
        self.store.delete_prefix(prefix).await?;
        Ok(())
    }
}

struct VectorDeleteIds {
    store: Arc<dyn VectorStore>,
}

#[async_trait]
impl Reverser for VectorDeleteIds {
    async fn reverse(&self, params: &Value) -> Result<()> {
        let namespace = params
            .get("namespace")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::SagaError::Core(orchestrator_core::OrchestratorError::Parse(
                "vector_delete_ids missing `namespace`".into(),
            )))?;
        let ids: Vec<Uuid> = params
            .get("ids")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok())).collect())
            .unwrap_or_default();
        self.store.delete_ids(namespace, &ids).await?;
        Ok(())
    }
}

/// Build the `params` blob for an `object_delete_key` action.
pub fn object_delete_key_params(key: &str) -> Value {
    serde_json::json!({ "key": key })
}

/// Build the `params` blob for an `object_delete_prefix` action.
pub fn object_delete_prefix_params(prefix: &str) -> Value {
    serde_json::json!({ "prefix": prefix })
}

/// Build the `params` blob for a `vector_delete_ids` action.
pub fn vector_delete_ids_params(namespace: &str, ids: &[Uuid]) -> Value {
    serde_json::json!({ "namespace": namespace, "ids": ids })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReverser {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Reverser for CountingReverser {
        async fn reverse(&self, _params: &Value) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_logged_and_skipped_not_an_error() {
        let registry = ReverserRegistry::new();
        let result = registry.reverse("totally_unknown", &serde_json::json!({})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn registered_kind_dispatches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ReverserRegistry::new();
        registry.register("custom", Arc::new(CountingReverser { calls: calls.clone() }));
        registry.reverse("custom", &serde_json::json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
