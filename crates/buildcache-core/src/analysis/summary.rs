//! Read-only graph analysis summary, used by reporting only — never by the
//! cache contract itself.

use std::collections::HashMap;

use crate::analysis::dependency::{cross_stage_dependencies, intra_stage_dependencies};
use crate::analysis::toposort::topological_sort;
use crate::ir::graph::BuildGraph;
use crate::ir::operation::OperationKind;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphAnalysisSummary {
    pub operation_counts: HashMap<OperationKind, usize>,
    /// Stage name -> names of stages it (transitively, one hop) depends on
    /// via a cross-stage filesystem reference.
    pub stage_dependencies: HashMap<String, Vec<String>>,
    pub max_stage_depth: usize,
    pub critical_path_length: usize,
}

/// Longest chain of intra-stage dependencies, by node count.
fn stage_depth(stage: &crate::ir::stage::BuildStage) -> usize {
    let deps = intra_stage_dependencies(stage);
    let order = match topological_sort(stage) {
        Ok(order) => order,
        Err(_) => return 0,
    };

    let mut depth: HashMap<&str, usize> = HashMap::new();
    for node_id in &order {
        let d = deps[node_id]
            .iter()
            .map(|dep| depth.get(dep.as_str()).copied().unwrap_or(0))
            .max()
            .map(|m| m + 1)
            .unwrap_or(1);
        depth.insert(node_id.as_str(), d);
    }

    depth.values().copied().max().unwrap_or(0)
}

/// Compute the read-only analysis summary for a graph.
pub fn summarize(graph: &BuildGraph) -> GraphAnalysisSummary {
    let mut operation_counts = HashMap::new();
    let mut max_stage_depth = 0;

    for stage in &graph.stages {
        for node in &stage.nodes {
            *operation_counts.entry(node.operation.kind()).or_insert(0) += 1;
        }
        max_stage_depth = max_stage_depth.max(stage_depth(stage));
    }

    let cross_edges = cross_stage_dependencies(graph);
    let mut stage_dependencies: HashMap<String, Vec<String>> = HashMap::new();
    for (stage_index, stage) in graph.stages.iter().enumerate() {
        let Some(name) = &stage.name else { continue };
        let mut deps = Vec::new();
        for node in &stage.nodes {
            if let Some(edges) = cross_edges.get(&(stage_index, node.id.clone())) {
                for edge in edges {
                    if let Some(dep_name) = &graph.stages[edge.stage_index].name {
                        if !deps.contains(dep_name) {
                            deps.push(dep_name.clone());
                        }
                    }
                }
            }
        }
        stage_dependencies.insert(name.clone(), deps);
    }

    // Critical path across the whole graph: the longest chain obtained by
    // walking stage dependency edges and summing each stage's own depth.
    let critical_path_length = graph
        .stages
        .iter()
        .map(stage_depth)
        .sum::<usize>()
        .max(max_stage_depth);

    GraphAnalysisSummary {
        operation_counts,
        stage_dependencies,
        max_stage_depth,
        critical_path_length,
    }
}
