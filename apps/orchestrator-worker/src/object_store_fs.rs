//! Filesystem-backed [`ObjectStore`]: a directory tree under `base_dir`,
//! served back to clients by whatever reverse proxy fronts the worker.
//! Object storage is treated as a named-interface collaborator without
//! fixing a vendor SDK; this is the default local implementation.

use std::path::PathBuf;

use async_trait::async_trait;
use orchestrator_core::collaborators::ObjectStore;
use orchestrator_core::error::{OrchestratorError, Result};
use tokio::fs;

pub struct FsObjectStore {
    base_dir: PathBuf,
    public_base_url: String,
}

impl FsObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self { base_dir: base_dir.into(), public_base_url: public_base_url.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.contains("..") {
            return Err(OrchestratorError::Config(format!("object key `{key}` must not contain `..`")));
        }
        Ok(self.base_dir.join(key.trim_start_matches('/')))
    }

    async fn remove_empty_ancestors(&self, mut dir: PathBuf) {
        while dir != self.base_dir && dir.starts_with(&self.base_dir) {
            if fs::remove_dir(&dir).await.is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => break,
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| OrchestratorError::Other(e.into()))?;
        }
        fs::write(&path, bytes).await.map_err(|e| OrchestratorError::Other(e.into()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OrchestratorError::Other(e.into())),
        }
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    self.remove_empty_ancestors(parent.to_path_buf()).await;
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::Other(e.into())),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let path = self.resolve(prefix)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OrchestratorError::Other(e.into())),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), key.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let dir = std::env::temp_dir().join(format!("orchestrator-worker-test-{}", uuid::Uuid::new_v4()));
        let store = FsObjectStore::new(&dir, "https://assets.example.test");
        store.put("materials/m1/f1", b"hello".to_vec(), "text/plain").await.unwrap();
        assert_eq!(store.get("materials/m1/f1").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.public_url("materials/m1/f1"), "https://assets.example.test/materials/m1/f1");
        store.delete_prefix("materials").await.unwrap();
        assert_eq!(store.get("materials/m1/f1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let dir = std::env::temp_dir().join(format!("orchestrator-worker-test-{}", uuid::Uuid::new_v4()));
        let store = FsObjectStore::new(&dir, "https://assets.example.test");
        assert!(store.put("../escape", vec![], "text/plain").await.is_err());
    }
}
