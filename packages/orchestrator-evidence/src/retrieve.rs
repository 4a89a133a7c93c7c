//! Evidence Retrieval Layer: hybrid semantic + lexical +
//! cosine-fallback chunk selection, used by `node_doc_build`,
//! `realize_activities`, and figure/video planning.

use std::sync::Arc;

use orchestrator_ai::AiClient;
use orchestrator_core::VectorStore;
use orchestrator_db::material_repo::MaterialRepo;
use uuid::Uuid;

use crate::cosine::top_k_by_cosine;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub semantic_k: usize,
    pub lexical_k: usize,
    pub k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self { semantic_k: 12, lexical_k: 12, k: 10 }
    }
}

/// Appends each id from `new_ids` to `ordered` exactly once, preserving
/// iteration order and skipping anything already in `seen`.
fn merge_unique(new_ids: impl Iterator<Item = Uuid>, ordered: &mut Vec<Uuid>, seen: &mut std::collections::HashSet<Uuid>) {
    for id in new_ids {
        if seen.insert(id) {
            ordered.push(id);
        }
    }
}

pub struct EvidenceRetriever {
    ai: Arc<dyn AiClient>,
    vector_store: Arc<dyn VectorStore>,
    materials: Arc<MaterialRepo>,
}

impl EvidenceRetriever {
    pub fn new(ai: Arc<dyn AiClient>, vector_store: Arc<dyn VectorStore>, materials: Arc<MaterialRepo>) -> Self {
        Self { ai, vector_store, materials }
    }

    /// `retrieve(queryText, fileIDs, K)`: an ordered, deduplicated list of
    /// chunk IDs. `must_cite` and `media_citation_ids` are merged in first
    /// so the generated excerpt set always includes them, then truncated to
    /// `K` total.
    pub async fn retrieve(
        &self,
        namespace: &str,
        query_text: &str,
        file_ids: &[Uuid],
        params: &RetrievalParams,
        must_cite: &[Uuid],
        media_citation_ids: &[Uuid],
    ) -> Result<Vec<Uuid>> {
        let query_embedding = self
            .ai
            .embed(&[query_text.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut ordered: Vec<Uuid> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        merge_unique(media_citation_ids.iter().chain(must_cite.iter()).copied(), &mut ordered, &mut seen);

        // 1. Semantic.
        let semantic_hits = self.vector_store.query_top_k(namespace, &query_embedding, params.semantic_k).await?;
        let mut semantic_ids: Vec<Uuid> = semantic_hits.into_iter().map(|h| h.chunk_id).collect();
        semantic_ids.sort();
        merge_unique(semantic_ids.into_iter(), &mut ordered, &mut seen);

        // 2. Lexical.
        let lexical_hits = self.materials.lexical_search(file_ids, query_text, params.lexical_k as i64).await?;
        merge_unique(lexical_hits.into_iter().map(|h| h.chunk_id), &mut ordered, &mut seen);

        // 3. Fallback cosine, only if the union so far is short of K.
        if ordered.len() < params.k {
            let embedded_chunks = self.materials.chunks_with_embeddings(file_ids).await?;
            let candidates: Vec<(Uuid, Vec<f32>)> = embedded_chunks
                .into_iter()
                .filter(|c| !seen.contains(&c.id))
                .filter_map(|c| {
                    c.embedding
                        .as_ref()
                        .and_then(|v| serde_json::from_value::<Vec<f32>>(v.clone()).ok())
                        .map(|e| (c.id, e))
                })
                .collect();
            let needed = params.k - ordered.len();
            merge_unique(top_k_by_cosine(&query_embedding, candidates, needed).into_iter(), &mut ordered, &mut seen);
        }

        ordered.truncate(params.k.max(must_cite.len() + media_citation_ids.len()));
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orchestrator_ai::MockAiClient;
    use orchestrator_core::VectorHit;

    struct StubVectorStore {
        hits: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorStore for StubVectorStore {
        async fn upsert(&self, _ns: &str, _id: Uuid, _e: Vec<f32>, _m: serde_json::Value) -> orchestrator_core::Result<()> {
            Ok(())
        }
        async fn query_top_k(&self, _ns: &str, _e: &[f32], _k: usize) -> orchestrator_core::Result<Vec<VectorHit>> {
            Ok(self.hits.clone())
        }
        async fn delete_ids(&self, _ns: &str, _ids: &[Uuid]) -> orchestrator_core::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn retrieval_params_defaults_are_sane() {
        let p = RetrievalParams::default();
        assert!(p.k <= p.semantic_k);
        assert!(p.k <= p.lexical_k);
    }

    #[test]
    fn merge_unique_preserves_first_occurrence_order_and_dedups() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let mut ordered = Vec::new();
        let mut seen = std::collections::HashSet::new();
        merge_unique(vec![a, b, a].into_iter(), &mut ordered, &mut seen);
        merge_unique(vec![b, a].into_iter(), &mut ordered, &mut seen);
        assert_eq!(ordered, vec![a, b]);
    }

    #[tokio::test]
    async fn semantic_source_is_reachable_through_the_ai_and_vector_traits() {
        let ai = Arc::new(MockAiClient::new(vec![]));
        let chunk_a = Uuid::new_v4();
        let vector_store: Arc<dyn VectorStore> = Arc::new(StubVectorStore { hits: vec![VectorHit { chunk_id: chunk_a, score: 0.9 }] });
        let embedding = ai.embed(&["query".to_string()]).await.unwrap().remove(0);
        let hits = vector_store.query_top_k("ns", &embedding, 5).await.unwrap();
        assert_eq!(hits[0].chunk_id, chunk_a);
    }
}
