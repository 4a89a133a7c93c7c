//! `chain_signature_build`: derives a deterministic prerequisite ordering
//! over the concept graph and fingerprints it. The fingerprint determines
//! whether a downstream artifact needs regeneration: an upsert may no-op
//! when both `contentHash` and `sourcesHash` already match. `path_plan_build`
//! reads `path.metadata.chain_signature` to decide whether the curriculum
//! structure it already built is still valid for the current concept graph.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_core::fingerprint::{canonicalize_json, hash_bytes};
use orchestrator_core::payload;
use orchestrator_core::pipeline::{JobCtx, Pipeline};
use orchestrator_db::concept_repo::{ConceptRepo, ConceptRow};
use orchestrator_db::path_repo::PathRepo;
use serde_json::{json, Value};

use crate::error::Result;

pub struct ChainSignatureBuildStage {
    paths: Arc<PathRepo>,
    concepts: Arc<ConceptRepo>,
}

impl ChainSignatureBuildStage {
    pub fn new(paths: Arc<PathRepo>, concepts: Arc<ConceptRepo>) -> Self {
        Self { paths, concepts }
    }
}

#[async_trait]
impl Pipeline for ChainSignatureBuildStage {
    fn r#type(&self) -> &'static str {
        orchestrator_dag::stage_names::CHAIN_SIGNATURE_BUILD
    }

    async fn run(&self, jc: &mut JobCtx) -> Result<()> {
        let path_id = jc.payload_uuid(payload::PATH_ID)?;
        let path = self.paths.find(path_id).await?;
        let concepts = self.concepts.list_for_path(path_id).await?;

        let order = topological_order(&concepts);
        let signature_value = json!({"order": order});
        let canonical = canonicalize_json(&signature_value);
        let hash = hash_bytes(canonical.as_bytes());

        let unchanged = path
            .metadata
            .get("chain_signature")
            .and_then(|s| s.get("hash"))
            .and_then(Value::as_str)
            .map(|existing| existing == hash)
            .unwrap_or(false);

        if !unchanged {
            self.paths.merge_metadata(path_id, json!({"chain_signature": {"order": order, "hash": hash}})).await?;
        }

        jc.succeed(json!({"chain_length": order.len(), "unchanged": unchanged})).await?;
        Ok(())
    }
}

/// Kahn's algorithm over the parent/child concept relation, ties broken by
/// concept key so the chain is identical across re-runs. Any leftover cycle
/// is appended in key order rather than dropped, since a concept graph is
/// advisory input, not a hard DAG invariant.
fn topological_order(concepts: &[ConceptRow]) -> Vec<String> {
    let by_id: HashMap<uuid::Uuid, &ConceptRow> = concepts.iter().map(|c| (c.id, c)).collect();
    let mut children: HashMap<uuid::Uuid, Vec<uuid::Uuid>> = HashMap::new();
    let mut indegree: HashMap<uuid::Uuid, usize> = concepts.iter().map(|c| (c.id, 0)).collect();

    for concept in concepts {
        if let Some(parent_id) = concept.parent_id {
            if by_id.contains_key(&parent_id) {
                children.entry(parent_id).or_default().push(concept.id);
                *indegree.entry(concept.id).or_insert(0) += 1;
            }
        }
    }

    let mut ready: VecDeque<uuid::Uuid> = concepts
        .iter()
        .filter(|c| indegree.get(&c.id).copied().unwrap_or(0) == 0)
        .map(|c| c.id)
        .collect();
    ready.make_contiguous().sort_by_key(|id| by_id[id].key.clone());

    let mut order = Vec::with_capacity(concepts.len());
    let mut visited = HashSet::new();
    while let Some(id) = ready.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        order.push(by_id[&id].key.clone());
        if let Some(kids) = children.get(&id) {
            let mut next_ready = Vec::new();
            for kid in kids {
                let entry = indegree.entry(*kid).or_insert(0);
                *entry = entry.saturating_sub(1);
                if *entry == 0 {
                    next_ready.push(*kid);
                }
            }
            next_ready.sort_by_key(|id| by_id[id].key.clone());
            for kid in next_ready {
                ready.push_back(kid);
            }
        }
    }

    // Anything left unreached (a cycle) still needs a deterministic spot.
    let mut leftover: Vec<&ConceptRow> = concepts.iter().filter(|c| !visited.contains(&c.id)).collect();
    leftover.sort_by_key(|c| c.key.clone());
    order.extend(leftover.into_iter().map(|c| c.key.clone()));

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn row(key: &str, parent: Option<uuid::Uuid>) -> ConceptRow {
        ConceptRow { id: Uuid::new_v4(), path_id: Uuid::new_v4(), key: key.to_string(), parent_id: parent, title: key.to_string(), metadata: json!({}), created_at: Utc::now() }
    }

    #[test]
    fn parents_precede_children() {
        let root = row("root", None);
        let root_id = root.id;
        let child = row("child", Some(root_id));
        let order = topological_order(&[child.clone(), root.clone()]);
        assert_eq!(order, vec!["root".to_string(), "child".to_string()]);
    }

    #[test]
    fn ties_break_on_key_order() {
        let b = row("b", None);
        let a = row("a", None);
        let order = topological_order(&[b, a]);
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn signature_is_deterministic_across_calls() {
        let root = row("root", None);
        let root_id = root.id;
        let child = row("child", Some(root_id));
        let concepts = vec![root, child];
        let order1 = topological_order(&concepts);
        let order2 = topological_order(&concepts);
        assert_eq!(order1, order2);
    }
}
