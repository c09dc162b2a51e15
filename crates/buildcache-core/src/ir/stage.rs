//! Build stages and symbolic references between them.

use serde::{Deserialize, Serialize};

use crate::ir::node::BuildNode;
use crate::ir::operation::ImageOperation;

/// A symbolic pointer from one stage to another, resolved against the
/// enclosing graph's stage vector at analysis time — never a back-pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageRef {
    Named(String),
    Index(usize),
    Previous,
}

/// One stage of a build graph: a base image plus an ordered list of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub base: ImageOperation,
    #[serde(default)]
    pub nodes: Vec<BuildNode>,
}

impl BuildStage {
    pub fn new(name: Option<String>, base: ImageOperation) -> Self {
        Self {
            name,
            base,
            nodes: Vec::new(),
        }
    }
}
