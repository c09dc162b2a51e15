//! Build nodes: a single operation plus its intra-stage dependencies.

use serde::{Deserialize, Serialize};

use crate::ir::operation::{Operation, SourceLocation};

/// One operation within a stage, with its explicit dependency set.
///
/// `dependencies` is empty for most nodes as authored; [`crate::analysis`]
/// fills in the implicit sequential dependency at analysis time rather than
/// mutating nodes here, so a `BuildNode` read back from storage is identical
/// to the one the builder produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildNode {
    pub id: String,
    pub operation: Operation,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
}

impl BuildNode {
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            operation,
            dependencies: Vec::new(),
            source_location: None,
        }
    }

    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.dependencies.push(node_id.into());
        self
    }

    pub fn has_explicit_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operation::ImageOperation;

    fn op() -> Operation {
        Operation::Image(ImageOperation::scratch())
    }

    #[test]
    fn fresh_node_has_no_dependencies() {
        let node = BuildNode::new("a", op());
        assert!(!node.has_explicit_dependencies());
    }

    #[test]
    fn depends_on_records_the_dependency() {
        let node = BuildNode::new("b", op()).depends_on("a");
        assert!(node.has_explicit_dependencies());
        assert_eq!(node.dependencies, vec!["a".to_string()]);
    }
}
