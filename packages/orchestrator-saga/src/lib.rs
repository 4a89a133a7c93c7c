//! Saga Coordinator: append-only compensation log, forward commit, reverse
//! apply. Reverse-order step compensation, tolerant of individual step
//! failure, over the three reverser kinds this system needs.

pub mod action;
pub mod coordinator;
pub mod error;

pub use action::{Reverser, ReverserRegistry, OBJECT_DELETE_KEY, OBJECT_DELETE_PREFIX, VECTOR_DELETE_IDS};
pub use coordinator::{CompensationReport, SagaCoordinator};
pub use error::{Result, SagaError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use orchestrator_core::{ObjectStore, VectorHit, VectorStore};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeObjectStore {
        deleted_keys: Mutex<Vec<String>>,
        deleted_prefixes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn put(&self, _key: &str, _bytes: Vec<u8>, _content_type: &str) -> orchestrator_core::Result<()> {
            Ok(())
        }
        async fn get(&self, _key: &str) -> orchestrator_core::Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete_key(&self, key: &str) -> orchestrator_core::Result<()> {
            self.deleted_keys.lock().unwrap().push(key.to_string());
            Ok(())
        }
        async fn delete_prefix(&self, prefix: &str) -> orchestrator_core::Result<()> {
            self.deleted_prefixes.lock().unwrap().push(prefix.to_string());
            Ok(())
        }
        fn public_url(&self, key: &str) -> String {
            format!("https://example.test/{key}")
        }
    }

    #[derive(Default)]
    struct FakeVectorStore {
        deleted: Mutex<Vec<(String, Vec<Uuid>)>>,
    }

    #[async_trait]
    impl VectorStore for FakeVectorStore {
        async fn upsert(&self, _ns: &str, _id: Uuid, _e: Vec<f32>, _m: serde_json::Value) -> orchestrator_core::Result<()> {
            Ok(())
        }
        async fn query_top_k(&self, _ns: &str, _e: &[f32], _k: usize) -> orchestrator_core::Result<Vec<VectorHit>> {
            Ok(vec![])
        }
        async fn delete_ids(&self, namespace: &str, ids: &[Uuid]) -> orchestrator_core::Result<()> {
            self.deleted.lock().unwrap().push((namespace.to_string(), ids.to_vec()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn reverser_registry_routes_each_builtin_kind() {
        let objects = Arc::new(FakeObjectStore::default());
        let vectors = Arc::new(FakeVectorStore::default());
        let registry = ReverserRegistry::with_defaults(objects.clone(), vectors.clone());

        registry
            .reverse(OBJECT_DELETE_KEY, &action::object_delete_key_params("materials/m1/f1"))
            .await
            .unwrap();
        registry
            .reverse(OBJECT_DELETE_PREFIX, &action::object_delete_prefix_params("saga/s1/"))
            .await
            .unwrap();
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        registry
            .reverse(VECTOR_DELETE_IDS, &action::vector_delete_ids_params("materials:m1", &ids))
            .await
            .unwrap();

        assert_eq!(objects.deleted_keys.lock().unwrap().as_slice(), ["materials/m1/f1"]);
        assert_eq!(objects.deleted_prefixes.lock().unwrap().as_slice(), ["saga/s1/"]);
        assert_eq!(vectors.deleted.lock().unwrap()[0].1.len(), 2);
    }
}
