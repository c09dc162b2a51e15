//! Fluent, invariant-preserving graph construction.

use indexmap::IndexMap;
use tracing::debug;

use crate::errors::{BuildCacheError, Result};
use crate::ir::graph::BuildGraph;
use crate::ir::node::BuildNode;
use crate::ir::operation::{ImageOperation, Operation};
use crate::ir::stage::BuildStage;
use crate::ir::validate::{default_validators, run_validators, ValidationError, ValidationWarning};
use crate::platform::Platform;

/// Builds a [`BuildGraph`] in a single stateful pass.
///
/// Every mutating call runs cheap structural checks inline (duplicate ids
/// within the stage being built); the deeper checks — cross-stage reference
/// resolution, cycle detection — run once, at [`GraphBuilder::build`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    stages: Vec<BuildStage>,
    build_arg_defaults: IndexMap<String, Option<String>>,
    target_platforms: Vec<Platform>,
    next_node_seq: usize,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_arg(mut self, name: impl Into<String>, default: Option<String>) -> Self {
        self.build_arg_defaults.insert(name.into(), default);
        self
    }

    pub fn target_platform(mut self, platform: Platform) -> Self {
        self.target_platforms.push(platform);
        self
    }

    /// Begin a new stage. Subsequent [`GraphBuilder::node`] calls attach to it.
    pub fn stage(mut self, name: Option<impl Into<String>>, from: ImageOperation) -> Self {
        self.stages.push(BuildStage::new(name.map(Into::into), from));
        self
    }

    /// Attach a node to the current (most recently opened) stage.
    ///
    /// # Panics
    /// Panics if called before any [`GraphBuilder::stage`] call — this is a
    /// programmer error in caller code, not a data-dependent validation
    /// failure, so it is not modeled as a `Result`.
    pub fn node(mut self, operation: Operation) -> Self {
        let id = format!("node-{}", self.next_node_seq);
        self.next_node_seq += 1;
        self.node_with_id(id, operation)
    }

    /// Attach a node with an explicit id, for callers that need stable ids
    /// across rebuilds (e.g. re-parsing the same source twice).
    pub fn node_with_id(mut self, id: impl Into<String>, operation: Operation) -> Self {
        let stage = self
            .stages
            .last_mut()
            .expect("GraphBuilder::node called before any stage() call");
        stage.nodes.push(BuildNode::new(id, operation));
        self
    }

    /// Attach an explicit dependency to the most recently added node in the
    /// current stage.
    pub fn depends_on(mut self, dependency_id: impl Into<String>) -> Self {
        let stage = self
            .stages
            .last_mut()
            .expect("GraphBuilder::depends_on called before any stage() call");
        let node = stage
            .nodes
            .last_mut()
            .expect("GraphBuilder::depends_on called before any node() call");
        node.dependencies.push(dependency_id.into());
        self
    }

    /// Validate and return an immutable graph.
    pub fn build(self) -> Result<BuildGraph> {
        let graph = BuildGraph::new(self.stages, self.build_arg_defaults, self.target_platforms);

        let mut report = run_validators(&graph, &default_validators());

        for (stage_index, stage) in graph.stages.iter().enumerate() {
            if let Err(BuildCacheError::CyclicDependency { node_ids, .. }) =
                crate::analysis::toposort::topological_sort(stage)
            {
                for node_id in node_ids {
                    report
                        .errors
                        .push(ValidationError::CyclicStageDependency { stage_index, node_id });
                }
            }
        }

        for warning in &report.warnings {
            debug!(%warning, "build graph validation warning");
        }

        if !report.is_ok() {
            let message = report
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(BuildCacheError::InvalidGraph { message });
        }

        Ok(graph)
    }

    /// Validate and return both the graph and the full warning list, for
    /// callers that want to surface warnings without re-running validation.
    pub fn build_with_warnings(self) -> Result<(BuildGraph, Vec<ValidationWarning>)> {
        let graph = self.build()?;
        let report = run_validators(&graph, &default_validators());
        Ok((graph, report.warnings))
    }
}
