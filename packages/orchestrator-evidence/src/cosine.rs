//! Fallback cosine similarity scan: computes cosine similarity between the
//! query embedding and each chunk's stored embedding, keeping the top-K via
//! a min-heap with a deterministic chunk-ID-sorted scan. Ties break on
//! chunk-ID lexicographic order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use uuid::Uuid;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ScoredChunk {
    chunk_id: Uuid,
    score: f32,
}

impl Eq for ScoredChunk {}

/// Min-heap ordering: the heap's "greatest" element is the weakest
/// candidate, so pushing past `k` items and popping evicts the weakest one.
/// Score compares first (worse score sorts greater so it's evicted first);
/// ties break on chunk-ID DESCENDING so popping leaves the lexicographically
/// smallest id, giving an ascending final ordering once we reverse the drain.
impl Ord for ScoredChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.chunk_id.cmp(&other.chunk_id))
    }
}

impl PartialOrd for ScoredChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Scans `(chunk_id, embedding)` pairs sorted by chunk id (deterministic
/// iteration order per ) and returns the top `k` by cosine
/// similarity to `query_embedding`, highest first, ties broken by
/// chunk-ID ascending order.
pub fn top_k_by_cosine(query_embedding: &[f32], mut candidates: Vec<(Uuid, Vec<f32>)>, k: usize) -> Vec<Uuid> {
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut heap: BinaryHeap<ScoredChunk> = BinaryHeap::with_capacity(k + 1);
    for (chunk_id, embedding) in candidates {
        let score = cosine_similarity(query_embedding, &embedding);
        heap.push(ScoredChunk { chunk_id, score });
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut ranked: Vec<ScoredChunk> = heap.into_vec();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
    ranked.into_iter().map(|sc| sc.chunk_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn top_k_returns_best_scoring_first() {
        let query = vec![1.0, 0.0];
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let c = Uuid::parse_str("00000000-0000-0000-0000-000000000003").unwrap();
        let candidates = vec![
            (a, vec![0.0, 1.0]), // orthogonal, score 0
            (b, vec![1.0, 0.0]), // identical, score 1
            (c, vec![0.7, 0.7]), // score ~0.707
        ];
        let top = top_k_by_cosine(&query, candidates, 2);
        assert_eq!(top, vec![b, c]);
    }

    #[test]
    fn ties_break_on_chunk_id_ascending() {
        let query = vec![1.0, 0.0];
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let candidates = vec![(a, vec![1.0, 0.0]), (b, vec![1.0, 0.0])];
        let top = top_k_by_cosine(&query, candidates, 2);
        assert_eq!(top, vec![b, a]);
    }
}
