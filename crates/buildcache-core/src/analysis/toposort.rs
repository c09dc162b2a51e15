//! Per-stage topological sort (Kahn's algorithm) over the effective
//! (explicit + injected) intra-stage dependency graph.

use crate::analysis::dependency::intra_stage_dependencies;
use crate::errors::BuildCacheError;
use crate::ir::stage::BuildStage;

/// Topologically sort a stage's nodes, returning node ids in dependency
/// order. Ties are broken by input (declaration) order, not an arbitrary
/// one, so output is stable across runs for an unchanged stage.
pub fn topological_sort(stage: &BuildStage) -> Result<Vec<String>, BuildCacheError> {
    let deps = intra_stage_dependencies(stage);
    let order: Vec<&str> = stage.nodes.iter().map(|n| n.id.as_str()).collect();

    let mut in_degree: std::collections::HashMap<&str, usize> =
        order.iter().map(|&id| (id, 0)).collect();
    let mut dependents: std::collections::HashMap<&str, Vec<&str>> =
        order.iter().map(|&id| (id, Vec::new())).collect();

    for node_id in &order {
        for dep in &deps[*node_id] {
            *in_degree.get_mut(*node_id).unwrap() += 1;
            dependents.get_mut(dep.as_str()).unwrap().push(node_id);
        }
    }

    let mut ready: Vec<&str> = order
        .iter()
        .copied()
        .filter(|id| in_degree[id] == 0)
        .collect();
    let mut sorted = Vec::with_capacity(order.len());

    while !ready.is_empty() {
        // Stable tie-break: always take the earliest-declared ready node.
        ready.sort_by_key(|id| order.iter().position(|o| o == id).unwrap());
        let next = ready.remove(0);
        sorted.push(next.to_string());

        for &dependent in &dependents[next] {
            let degree = in_degree.get_mut(dependent).unwrap();
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependent);
            }
        }
    }

    if sorted.len() != order.len() {
        let unresolved: Vec<String> = order
            .iter()
            .filter(|id| !sorted.contains(&id.to_string()))
            .map(|id| id.to_string())
            .collect();
        return Err(BuildCacheError::CyclicDependency {
            stage_index: 0,
            node_ids: unresolved,
        });
    }

    Ok(sorted)
}
