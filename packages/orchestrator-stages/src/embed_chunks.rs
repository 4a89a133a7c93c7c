//! `embed_chunks`: batches chunks lacking an embedding through `AiClient::embed`
//! and upserts them into the vector store, with per-batch size and
//! per-request concurrency bounded by config. Idempotent: re-running when
//! nothing is missing an embedding returns `chunks_embedded=0`.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_ai::AiClient;
use orchestrator_core::config::OrchestratorConfig;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_core::{payload, run_bounded, VectorStore};
use orchestrator_db::material_repo::MaterialRepo;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StageError};

pub struct EmbedChunksStage {
    materials: Arc<MaterialRepo>,
    ai: Arc<dyn AiClient>,
    vectors: Arc<dyn VectorStore>,
    config: Arc<OrchestratorConfig>,
}

impl EmbedChunksStage {
    pub fn new(materials: Arc<MaterialRepo>, ai: Arc<dyn AiClient>, vectors: Arc<dyn VectorStore>, config: Arc<OrchestratorConfig>) -> Self {
        Self { materials, ai, vectors, config }
    }
}

#[async_trait]
impl Pipeline for EmbedChunksStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::EMBED_CHUNKS
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let material_set_id = jc.payload_uuid(payload::MATERIAL_SET_ID)?;
        let namespace = orchestrator_evidence::chunk_namespace(&material_set_id);

        let mut embedded = 0i64;
        loop {
            let pending = self.materials.chunks_missing_embedding(material_set_id, self.config.embed_chunks_batch_size as i64).await?;
            if pending.is_empty() {
                break;
            }
            if jc.is_canceled().await? {
                jc.fail(self.r#type(), "canceled").await?;
                return Ok(());
            }

            let texts: Vec<String> = pending.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.ai.embed(&texts).await.map_err(StageError::Ai)?;

            let mut tasks: Vec<_> = Vec::with_capacity(pending.len());
            for (chunk, embedding) in pending.iter().cloned().zip(embeddings.into_iter()) {
                let materials = self.materials.clone();
                let vectors = self.vectors.clone();
                let namespace = namespace.clone();
                tasks.push(move |_token: CancellationToken| async move {
                    materials.set_embedding(chunk.id, &embedding).await?;
                    vectors.upsert(&namespace, chunk.id, embedding, json!({"type": "chunk"})).await.map_err(StageError::Core)?;
                    Ok::<(), StageError>(())
                });
            }

            let (_, first_error) = run_bounded(tasks, self.config.embed_chunks_concurrency).await;
            if let Some(err) = first_error {
                return Err(err);
            }

            embedded += pending.len() as i64;
            jc.progress(self.r#type(), 50, format!("{embedded} chunks embedded")).await?;
        }

        jc.succeed(json!({"chunks_embedded": embedded})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // `MaterialRepo`/vector upsert require a live Postgres pool + vector
    // store double; covered by the `#[ignore]`-marked integration suite.
}
