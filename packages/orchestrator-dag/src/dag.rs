//! Build DAG engine: a DAG builder that accepts an arbitrary, string-keyed
//! stage set, so the learning-build's stages are declared as data instead
//! of as a closed enum.

use std::collections::{HashMap, HashSet};

use orchestrator_core::error::{OrchestratorError, Result};

/// One stage in the DAG: its dependencies are the stages that must succeed
/// before it becomes dispatchable ("b waits on a's success").
#[derive(Debug, Clone)]
pub struct StageNode {
    pub name: String,
    pub dependencies: Vec<String>,
}

impl StageNode {
    pub fn new(name: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self { name: name.into(), dependencies }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self::new(name, vec![])
    }
}

/// A dependency-ordered DAG of stages, with a precomputed topological order
/// grouped into parallel phases.
#[derive(Debug, Clone)]
pub struct BuildDag {
    stages: HashMap<String, StageNode>,
    execution_order: Vec<Vec<String>>,
}

impl BuildDag {
    pub fn new(stages: Vec<StageNode>) -> Result<Self> {
        let mut stage_map = HashMap::new();
        for stage in stages {
            stage_map.insert(stage.name.clone(), stage);
        }

        for stage in stage_map.values() {
            for dep in &stage.dependencies {
                if !stage_map.contains_key(dep) {
                    return Err(OrchestratorError::MissingDependency(format!(
                        "stage `{}` depends on undeclared stage `{}`",
                        stage.name, dep
                    )));
                }
            }
        }

        let execution_order = Self::topological_sort(&stage_map)?;
        Ok(Self { stages: stage_map, execution_order })
    }

    fn topological_sort(stages: &HashMap<String, StageNode>) -> Result<Vec<Vec<String>>> {
        let mut in_degree: HashMap<&str, usize> = stages.keys().map(|k| (k.as_str(), 0)).collect();
        for stage in stages.values() {
            *in_degree.get_mut(stage.name.as_str()).unwrap() = stage.dependencies.len();
        }

        let mut result = Vec::new();
        let mut processed: HashSet<&str> = HashSet::new();

        while processed.len() < stages.len() {
            let mut ready: Vec<&str> = in_degree
                .iter()
                .filter(|(name, &degree)| degree == 0 && !processed.contains(*name))
                .map(|(&name, _)| name)
                .collect();
            ready.sort();

            if ready.is_empty() {
                return Err(OrchestratorError::DagCycleDetected);
            }

            result.push(ready.iter().map(|s| s.to_string()).collect());

            for &name in &ready {
                processed.insert(name);
                for dependent in stages.values() {
                    if dependent.dependencies.iter().any(|d| d == name) {
                        *in_degree.get_mut(dependent.name.as_str()).unwrap() -= 1;
                    }
                }
            }
        }

        Ok(result)
    }

    pub fn execution_order(&self) -> &[Vec<String>] {
        &self.execution_order
    }

    pub fn get(&self, name: &str) -> Option<&StageNode> {
        self.stages.get(name)
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(|s| s.as_str())
    }

    /// Stages whose `dependencies` list names `name`, for cascade-fail
    /// propagation.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.stages
            .values()
            .filter(|s| s.dependencies.iter().any(|d| d == name))
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn execution_plan(&self) -> String {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, group)| {
                if group.len() > 1 {
                    format!("Phase {}: {} (parallel)", i + 1, group.join(" \u{2225} "))
                } else {
                    format!("Phase {}: {}", i + 1, group[0])
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The learning-build's dependency edges.
pub fn learning_build_dag() -> Result<BuildDag> {
    use crate::stage_names::*;

    let stages = vec![
        StageNode::root(PATH_INTAKE),
        StageNode::new(WEB_RESOURCES_SEED, vec![PATH_INTAKE.into()]),
        StageNode::new(INGEST_CHUNKS, vec![WEB_RESOURCES_SEED.into()]),
        StageNode::new(EMBED_CHUNKS, vec![INGEST_CHUNKS.into()]),
        StageNode::new(USER_PROFILE_REFRESH, vec![EMBED_CHUNKS.into()]),
        StageNode::new(CONCEPT_GRAPH_BUILD, vec![USER_PROFILE_REFRESH.into()]),
        StageNode::new(CHAIN_SIGNATURE_BUILD, vec![CONCEPT_GRAPH_BUILD.into()]),
        StageNode::new(PATH_PLAN_BUILD, vec![CONCEPT_GRAPH_BUILD.into()]),
        StageNode::new(NODE_FIGURES_PLAN, vec![PATH_PLAN_BUILD.into()]),
        StageNode::new(NODE_FIGURES_RENDER, vec![NODE_FIGURES_PLAN.into()]),
        StageNode::new(NODE_VIDEOS_PLAN, vec![PATH_PLAN_BUILD.into()]),
        StageNode::new(NODE_VIDEOS_RENDER, vec![NODE_VIDEOS_PLAN.into()]),
        StageNode::new(NODE_DOC_BUILD, vec![NODE_FIGURES_RENDER.into(), NODE_VIDEOS_RENDER.into()]),
        StageNode::new(REALIZE_ACTIVITIES, vec![PATH_PLAN_BUILD.into()]),
        StageNode::new(COVERAGE_COHERENCE_AUDIT, vec![REALIZE_ACTIVITIES.into()]),
        StageNode::new(PATH_COVER_RENDER, vec![PATH_PLAN_BUILD.into()]),
        StageNode::new(NODE_AVATAR_RENDER, vec![PATH_PLAN_BUILD.into()]),
    ];

    BuildDag::new(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage_names::*;

    #[test]
    fn learning_build_dag_has_no_cycle_and_every_dependency_declared() {
        let dag = learning_build_dag().unwrap();
        assert!(dag.get(NODE_DOC_BUILD).is_some());
        assert_eq!(dag.get(PATH_INTAKE).unwrap().dependencies.len(), 0);
    }

    #[test]
    fn node_doc_build_waits_on_both_figures_and_videos_render() {
        let dag = learning_build_dag().unwrap();
        let deps = &dag.get(NODE_DOC_BUILD).unwrap().dependencies;
        assert!(deps.contains(&NODE_FIGURES_RENDER.to_string()));
        assert!(deps.contains(&NODE_VIDEOS_RENDER.to_string()));
    }

    #[test]
    fn path_plan_build_fans_out_to_five_independent_branches() {
        let dag = learning_build_dag().unwrap();
        let mut dependents = dag.dependents_of(PATH_PLAN_BUILD);
        dependents.sort();
        assert_eq!(
            dependents,
            vec![NODE_AVATAR_RENDER, NODE_FIGURES_PLAN, NODE_VIDEOS_PLAN, PATH_COVER_RENDER, REALIZE_ACTIVITIES]
        );
    }

    #[test]
    fn topological_order_places_parents_before_children() {
        let dag = learning_build_dag().unwrap();
        let mut position = HashMap::new();
        for (phase, names) in dag.execution_order().iter().enumerate() {
            for name in names {
                position.insert(name.clone(), phase);
            }
        }
        for stage in dag.stages.values() {
            for dep in &stage.dependencies {
                assert!(position[dep] < position[&stage.name], "{} must come after {}", stage.name, dep);
            }
        }
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let stages = vec![StageNode::new("child", vec!["nonexistent".into()])];
        assert!(BuildDag::new(stages).is_err());
    }
}
