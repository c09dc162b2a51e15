//! Dependency injection: fills in the implicit sequential dependency and
//! cross-stage edges that the builder leaves for analysis time.

use std::collections::HashMap;

use crate::ir::graph::BuildGraph;
use crate::ir::operation::FileSource;
use crate::ir::stage::{BuildStage, StageRef};

/// An edge from one node to another, possibly in a different stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub stage_index: usize,
    pub node_id: String,
}

/// The effective (explicit + injected) dependency list for every node in a
/// single stage, keyed by node id. Intra-stage only — cross-stage edges are
/// tracked separately since a per-stage topological sort never needs them.
pub fn intra_stage_dependencies(stage: &BuildStage) -> HashMap<String, Vec<String>> {
    let mut deps = HashMap::with_capacity(stage.nodes.len());
    let mut previous: Option<&str> = None;

    for node in &stage.nodes {
        if node.has_explicit_dependencies() {
            deps.insert(node.id.clone(), node.dependencies.clone());
        } else if let Some(prev_id) = previous {
            deps.insert(node.id.clone(), vec![prev_id.to_string()]);
        } else {
            deps.insert(node.id.clone(), Vec::new());
        }
        previous = Some(&node.id);
    }

    deps
}

/// Resolve a stage reference to a concrete stage index, if it resolves at
/// all. Warnings for unresolved/forward/illegal references are the
/// responsibility of [`crate::ir::validate::ReferenceValidator`]; this
/// function is silent on failure.
fn resolve_stage_ref(graph: &BuildGraph, current_stage_index: usize, stage_ref: &StageRef) -> Option<usize> {
    match stage_ref {
        StageRef::Named(name) => graph.stage_index_named(name),
        StageRef::Index(i) => (*i < graph.stages.len()).then_some(*i),
        StageRef::Previous => current_stage_index.checked_sub(1),
    }
}

/// Cross-stage edges injected for filesystem operations whose source is a
/// stage reference: a dependency on the last node of the referenced stage.
pub fn cross_stage_dependencies(graph: &BuildGraph) -> HashMap<(usize, String), Vec<DependencyEdge>> {
    let mut edges: HashMap<(usize, String), Vec<DependencyEdge>> = HashMap::new();

    for (stage_index, stage) in graph.stages.iter().enumerate() {
        for node in &stage.nodes {
            let Some(fs) = node.operation.as_filesystem() else {
                continue;
            };
            let FileSource::Stage { stage_ref, .. } = &fs.source else {
                continue;
            };
            let Some(source_stage_index) = resolve_stage_ref(graph, stage_index, stage_ref) else {
                continue;
            };
            let Some(last_node) = graph.stages[source_stage_index].nodes.last() else {
                continue;
            };

            edges
                .entry((stage_index, node.id.clone()))
                .or_default()
                .push(DependencyEdge {
                    stage_index: source_stage_index,
                    node_id: last_node.id.clone(),
                });
        }
    }

    edges
}
