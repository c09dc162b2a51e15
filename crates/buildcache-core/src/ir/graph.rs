//! The immutable build graph: an ordered sequence of stages plus defaults.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ir::stage::BuildStage;
use crate::platform::Platform;

/// A complete, validated build graph. Produced only by
/// [`crate::ir::builder::GraphBuilder::build`]; there is no public mutable
/// constructor, matching the "immutable after `build()`" lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildGraph {
    pub stages: Vec<BuildStage>,
    /// Declared build-arg defaults, in declaration order.
    #[serde(default)]
    pub build_arg_defaults: IndexMap<String, Option<String>>,
    #[serde(default)]
    pub target_platforms: Vec<Platform>,
}

impl BuildGraph {
    pub(crate) fn new(
        stages: Vec<BuildStage>,
        build_arg_defaults: IndexMap<String, Option<String>>,
        target_platforms: Vec<Platform>,
    ) -> Self {
        Self {
            stages,
            build_arg_defaults,
            target_platforms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_named(&self, name: &str) -> Option<&BuildStage> {
        self.stages
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
    }

    pub fn stage_index_named(&self, name: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.name.as_deref() == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operation::ImageOperation;
    use crate::ir::stage::BuildStage;

    #[test]
    fn empty_graph_is_empty() {
        let graph = BuildGraph::new(Vec::new(), IndexMap::new(), Vec::new());
        assert!(graph.is_empty());
        assert!(graph.stage_named("anything").is_none());
    }

    #[test]
    fn stage_lookup_by_name_and_index_agree() {
        let stages = vec![
            BuildStage::new(Some("builder".to_string()), ImageOperation::scratch()),
            BuildStage::new(Some("runtime".to_string()), ImageOperation::scratch()),
        ];
        let graph = BuildGraph::new(stages, IndexMap::new(), Vec::new());

        assert_eq!(graph.stage_index_named("runtime"), Some(1));
        assert_eq!(graph.stage_named("builder").unwrap().name.as_deref(), Some("builder"));
        assert!(graph.stage_index_named("missing").is_none());
    }
}
