//! Scriptable [`AiClient`] test double, behind the `test-support` feature.
//! Shared across `orchestrator-stages`' unit tests so every stage that calls
//! out to an `AiClient` can be exercised without a live vendor.

#![cfg(feature = "test-support")]

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{AiClient, GeneratedAsset, VideoOptions};
use crate::error::{AiError, Result};

/// Replays a queue of canned `generate_json_raw` responses, one per call,
/// looping the last response if the queue is exhausted. Embeddings are
/// deterministic hashes of the input text so tests can assert on them.
pub struct MockAiClient {
    responses: Mutex<Vec<Result<Value>>>,
    pub embed_dim: usize,
}

impl MockAiClient {
    pub fn new(responses: Vec<Value>) -> Self {
        Self { responses: Mutex::new(responses.into_iter().rev().map(Ok).collect()), embed_dim: 8 }
    }

    /// A client whose `n`th call fails transiently, then the `n+1`th
    /// succeeds with `response` — for testing the generate-validate-retry
    /// loop's error path.
    pub fn failing_then(errors: Vec<AiError>, response: Value) -> Self {
        let mut queue: Vec<Result<Value>> = errors.into_iter().map(Err).collect();
        queue.push(Ok(response));
        queue.reverse();
        Self { responses: Mutex::new(queue), embed_dim: 8 }
    }
}

#[async_trait]
impl AiClient for MockAiClient {
    async fn generate_json_raw(&self, _system: &str, _user: &str, _schema_name: &str) -> Result<Value> {
        let mut queue = self.responses.lock().unwrap();
        match queue.pop() {
            Some(next) => next,
            None => Err(AiError::Other(anyhow::anyhow!("MockAiClient exhausted its response queue"))),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; self.embed_dim];
                for (i, b) in t.bytes().enumerate() {
                    v[i % self.embed_dim] += (b as f32) / 255.0;
                }
                v
            })
            .collect())
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedAsset> {
        Ok(GeneratedAsset { bytes: prompt.as_bytes().to_vec(), mime_type: "image/png".into() })
    }

    async fn generate_video(&self, prompt: &str, _opts: VideoOptions) -> Result<GeneratedAsset> {
        Ok(GeneratedAsset { bytes: prompt.as_bytes().to_vec(), mime_type: "video/mp4".into() })
    }
}
