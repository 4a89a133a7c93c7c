//! Coverage distribution: once every node doc exists, any chunk in the
//! material set that no doc cites yet is assigned to a node as an
//! additional must-cite obligation, so a later `node_doc_patch` pass can
//! fold it in.
//!
//! Resolution of the open question: score by cosine similarity between the
//! uncited chunk's embedding and the centroid of each node's already-cited
//! chunk embeddings when embeddings are available for both sides; otherwise
//! fall back to least-loaded round-robin assignment, capped per node.

use std::collections::{HashMap, HashSet};

use orchestrator_db::material_repo::ChunkRow;
use orchestrator_evidence::cosine_similarity;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageAssignment {
    pub path_node_id: Uuid,
    pub chunk_id: Uuid,
}

/// Chunk ids already cited by `body`'s citation blocks (same shape the
/// validator reads — see [`crate::validate`]).
pub fn cited_chunk_ids(body: &Value) -> HashSet<Uuid> {
    let mut cited = HashSet::new();
    let Some(blocks) = body.get("blocks").and_then(Value::as_object) else { return cited };
    for block in blocks.values() {
        let Some(citations) = block.get("citations").and_then(Value::as_array) else { continue };
        for citation in citations {
            if let Some(id) = citation.get("chunk_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok()) {
                cited.insert(id);
            }
        }
    }
    cited
}

fn mean_embedding(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut sum = vec![0.0f32; dim];
    for v in vectors {
        for (s, x) in sum.iter_mut().zip(v) {
            *s += x;
        }
    }
    let n = vectors.len() as f32;
    Some(sum.into_iter().map(|s| s / n).collect())
}

fn parse_embedding(chunk: &ChunkRow) -> Option<Vec<f32>> {
    chunk.embedding.as_ref().and_then(|v| serde_json::from_value::<Vec<f32>>(v.clone()).ok())
}

/// Distributes every chunk in `all_chunks` not already present in
/// `cited_by_node`'s union across `node_ids`, capped at `per_node_cap`
/// additional assignments per node.
///
/// `cited_by_node` maps each node to the chunk ids its active doc already
/// cites — used both to exclude already-covered chunks and, when
/// embeddings exist, to build each node's similarity centroid.
pub fn distribute_coverage(
    node_ids: &[Uuid],
    all_chunks: &[ChunkRow],
    cited_by_node: &HashMap<Uuid, HashSet<Uuid>>,
    per_node_cap: usize,
) -> Vec<CoverageAssignment> {
    if node_ids.is_empty() {
        return Vec::new();
    }

    let already_cited: HashSet<Uuid> = cited_by_node.values().flatten().copied().collect();
    let uncited: Vec<&ChunkRow> = {
        let mut v: Vec<&ChunkRow> = all_chunks.iter().filter(|c| !already_cited.contains(&c.id)).collect();
        v.sort_by_key(|c| c.id);
        v
    };

    let chunk_embedding_by_id: HashMap<Uuid, Vec<f32>> =
        all_chunks.iter().filter_map(|c| parse_embedding(c).map(|e| (c.id, e))).collect();

    let centroids: HashMap<Uuid, Vec<f32>> = node_ids
        .iter()
        .filter_map(|&node_id| {
            let cited = cited_by_node.get(&node_id)?;
            let vectors: Vec<Vec<f32>> = cited.iter().filter_map(|id| chunk_embedding_by_id.get(id).cloned()).collect();
            mean_embedding(&vectors).map(|c| (node_id, c))
        })
        .collect();

    let mut load: HashMap<Uuid, usize> = node_ids.iter().map(|&id| (id, 0)).collect();
    let mut round_robin_cursor = 0usize;
    let mut out = Vec::new();

    for chunk in uncited {
        let target = match parse_embedding(chunk) {
            Some(chunk_embedding) if !centroids.is_empty() => {
                best_by_cosine(&chunk_embedding, &centroids, &load, per_node_cap, node_ids)
            }
            _ => None,
        };

        let target = target.or_else(|| least_loaded(&load, per_node_cap, node_ids, &mut round_robin_cursor));

        if let Some(node_id) = target {
            *load.get_mut(&node_id).unwrap() += 1;
            out.push(CoverageAssignment { path_node_id: node_id, chunk_id: chunk.id });
        }
    }

    out
}

fn best_by_cosine(
    chunk_embedding: &[f32],
    centroids: &HashMap<Uuid, Vec<f32>>,
    load: &HashMap<Uuid, usize>,
    per_node_cap: usize,
    node_ids: &[Uuid],
) -> Option<Uuid> {
    let mut scored: Vec<(Uuid, f32)> = node_ids
        .iter()
        .filter(|id| load.get(id).copied().unwrap_or(0) < per_node_cap)
        .filter_map(|id| centroids.get(id).map(|c| (*id, cosine_similarity(chunk_embedding, c))))
        .collect();
    // Sort by id first so a stable, deterministic winner emerges among ties
    // once we take the highest-scoring element.
    scored.sort_by(|a, b| a.0.cmp(&b.0));
    scored
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(id, _)| id)
}

/// Round-robin starting from `cursor`, skipping any node already at
/// `per_node_cap`; advances `cursor` so successive calls spread load evenly.
fn least_loaded(load: &HashMap<Uuid, usize>, per_node_cap: usize, node_ids: &[Uuid], cursor: &mut usize) -> Option<Uuid> {
    let n = node_ids.len();
    let min_load = node_ids.iter().map(|id| load.get(id).copied().unwrap_or(0)).min()?;
    if min_load >= per_node_cap {
        return None;
    }
    for offset in 0..n {
        let idx = (*cursor + offset) % n;
        let id = node_ids[idx];
        if load.get(&id).copied().unwrap_or(0) == min_load {
            *cursor = (idx + 1) % n;
            return Some(id);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(id: Uuid, embedding: Option<Vec<f32>>) -> ChunkRow {
        ChunkRow {
            id,
            material_file_id: Uuid::new_v4(),
            index: 0,
            text: "x".into(),
            embedding: embedding.map(|e| serde_json::to_value(e).unwrap()),
            kind: "text".into(),
            page: None,
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cited_chunk_ids_reads_all_blocks() {
        let chunk_id = Uuid::new_v4();
        let body = serde_json::json!({
            "blocks": {"b0": {"citations": [{"chunk_id": chunk_id.to_string()}]}}
        });
        assert_eq!(cited_chunk_ids(&body), [chunk_id].into_iter().collect());
    }

    #[test]
    fn distribute_falls_back_to_round_robin_without_embeddings() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let nodes = vec![a, b];
        let chunks = vec![chunk(Uuid::new_v4(), None), chunk(Uuid::new_v4(), None), chunk(Uuid::new_v4(), None)];
        let assignments = distribute_coverage(&nodes, &chunks, &HashMap::new(), 10);
        assert_eq!(assignments.len(), 3);
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for a in &assignments {
            *counts.entry(a.path_node_id).or_default() += 1;
        }
        assert_eq!(counts.values().copied().max().unwrap() - counts.values().copied().min().unwrap(), 1);
    }

    #[test]
    fn distribute_respects_per_node_cap() {
        let a = Uuid::new_v4();
        let nodes = vec![a];
        let chunks = vec![chunk(Uuid::new_v4(), None), chunk(Uuid::new_v4(), None)];
        let assignments = distribute_coverage(&nodes, &chunks, &HashMap::new(), 1);
        assert_eq!(assignments.len(), 1);
    }

    #[test]
    fn distribute_excludes_already_cited_chunks() {
        let a = Uuid::new_v4();
        let already_cited = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let nodes = vec![a];
        let chunks = vec![chunk(already_cited, None), chunk(fresh, None)];
        let mut cited_by_node = HashMap::new();
        cited_by_node.insert(a, [already_cited].into_iter().collect());
        let assignments = distribute_coverage(&nodes, &chunks, &cited_by_node, 10);
        assert_eq!(assignments, vec![CoverageAssignment { path_node_id: a, chunk_id: fresh }]);
    }

    #[test]
    fn distribute_prefers_centroid_similarity_when_embeddings_present() {
        let near_node = Uuid::new_v4();
        let far_node = Uuid::new_v4();
        let near_cited = Uuid::new_v4();
        let far_cited = Uuid::new_v4();
        let target = Uuid::new_v4();

        let nodes = vec![near_node, far_node];
        let mut cited_by_node = HashMap::new();
        cited_by_node.insert(near_node, [near_cited].into_iter().collect());
        cited_by_node.insert(far_node, [far_cited].into_iter().collect());

        let chunks = vec![
            chunk(near_cited, Some(vec![1.0, 0.0])),
            chunk(far_cited, Some(vec![0.0, 1.0])),
            chunk(target, Some(vec![0.9, 0.1])),
        ];

        let assignments = distribute_coverage(&nodes, &chunks, &cited_by_node, 10);
        assert_eq!(assignments, vec![CoverageAssignment { path_node_id: near_node, chunk_id: target }]);
    }
}
