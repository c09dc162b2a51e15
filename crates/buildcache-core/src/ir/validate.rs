//! Composable graph validators producing a `(errors, warnings)` pair.

use crate::ir::graph::BuildGraph;
use crate::ir::operation::{FileSource, MetadataAction, Operation};
use crate::ir::stage::StageRef;

/// A hard validation failure: the graph the builder is about to hand out is
/// structurally unsound and must be rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    DuplicateStageName(String),
    DuplicateNodeId {
        stage_index: usize,
        node_id: String,
    },
    MissingDependency {
        stage_index: usize,
        node_id: String,
        missing_dependency: String,
    },
    CyclicStageDependency {
        stage_index: usize,
        node_id: String,
    },
    PreviousReferenceInFirstStage {
        stage_index: usize,
        node_id: String,
    },
    EmptyDestinationPath {
        stage_index: usize,
        node_id: String,
    },
    EmptyMountTarget {
        stage_index: usize,
        node_id: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DuplicateStageName(name) => {
                write!(f, "duplicate stage name: {name}")
            }
            ValidationError::DuplicateNodeId { stage_index, node_id } => write!(
                f,
                "duplicate node id '{node_id}' in stage {stage_index}"
            ),
            ValidationError::MissingDependency {
                stage_index,
                node_id,
                missing_dependency,
            } => write!(
                f,
                "node '{node_id}' in stage {stage_index} depends on undefined node '{missing_dependency}'"
            ),
            ValidationError::CyclicStageDependency { stage_index, node_id } => write!(
                f,
                "cyclic dependency involving node '{node_id}' in stage {stage_index}"
            ),
            ValidationError::PreviousReferenceInFirstStage { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} uses .previous in the first stage"
            ),
            ValidationError::EmptyDestinationPath { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} has an empty destination path"
            ),
            ValidationError::EmptyMountTarget { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} has a mount with an empty target"
            ),
        }
    }
}

/// A soft finding: surfaced to an optional reporter but never blocks
/// `build()`.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    UndefinedNamedStageReference {
        stage_index: usize,
        node_id: String,
        name: String,
    },
    StageIndexOutOfBounds {
        stage_index: usize,
        node_id: String,
        index: usize,
    },
    ForwardStageReference {
        stage_index: usize,
        node_id: String,
        referenced_index: usize,
    },
    AbsoluteContextPath {
        stage_index: usize,
        node_id: String,
    },
    PathTraversal {
        stage_index: usize,
        node_id: String,
    },
    PrivilegedExecution {
        stage_index: usize,
        node_id: String,
    },
    RunningAsRoot {
        stage_index: usize,
        node_id: String,
    },
    ReadWriteSecretMount {
        stage_index: usize,
        node_id: String,
    },
    PackageManagerUpdateWithoutInstall {
        stage_index: usize,
        node_id: String,
    },
    MissingHealthcheck,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::UndefinedNamedStageReference { stage_index, node_id, name } => {
                write!(f, "node '{node_id}' in stage {stage_index} references undefined stage '{name}'")
            }
            ValidationWarning::StageIndexOutOfBounds { stage_index, node_id, index } => write!(
                f,
                "node '{node_id}' in stage {stage_index} references out-of-bounds stage index {index}"
            ),
            ValidationWarning::ForwardStageReference { stage_index, node_id, referenced_index } => write!(
                f,
                "node '{node_id}' in stage {stage_index} forward-references stage {referenced_index}"
            ),
            ValidationWarning::AbsoluteContextPath { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} uses an absolute build-context path"
            ),
            ValidationWarning::PathTraversal { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} has a path with '..' components"
            ),
            ValidationWarning::PrivilegedExecution { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} runs privileged"
            ),
            ValidationWarning::RunningAsRoot { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} runs as root"
            ),
            ValidationWarning::ReadWriteSecretMount { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} mounts a secret read-write"
            ),
            ValidationWarning::PackageManagerUpdateWithoutInstall { stage_index, node_id } => write!(
                f,
                "node '{node_id}' in stage {stage_index} runs a package-manager update without an install"
            ),
            ValidationWarning::MissingHealthcheck => write!(f, "image defines no healthcheck"),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// One pass over the graph, producing errors and/or warnings.
pub trait Validator {
    fn validate(&self, graph: &BuildGraph) -> ValidationReport;
}

pub struct StructuralValidator;

impl Validator for StructuralValidator {
    fn validate(&self, graph: &BuildGraph) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut seen_stage_names = std::collections::HashSet::new();

        for stage in &graph.stages {
            if let Some(name) = &stage.name {
                if !seen_stage_names.insert(name.clone()) {
                    report.errors.push(ValidationError::DuplicateStageName(name.clone()));
                }
            }
        }

        // Node ids must be unique graph-wide (spec §3), not merely within
        // their own stage — a single set threaded across every stage catches
        // a node id reused by a later stage, not only a repeat inside one.
        let mut seen_node_ids = std::collections::HashSet::new();
        for (stage_index, stage) in graph.stages.iter().enumerate() {
            for node in &stage.nodes {
                if !seen_node_ids.insert(node.id.clone()) {
                    report.errors.push(ValidationError::DuplicateNodeId {
                        stage_index,
                        node_id: node.id.clone(),
                    });
                }
            }
            for node in &stage.nodes {
                for dep in &node.dependencies {
                    if !stage.nodes.iter().any(|n| &n.id == dep) {
                        report.errors.push(ValidationError::MissingDependency {
                            stage_index,
                            node_id: node.id.clone(),
                            missing_dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        report
    }
}

pub struct ReferenceValidator;

impl ReferenceValidator {
    fn resolve_index(graph: &BuildGraph, stage_index: usize, stage_ref: &StageRef) -> Option<(usize, bool)> {
        match stage_ref {
            StageRef::Named(name) => graph.stage_index_named(name).map(|i| (i, false)),
            StageRef::Index(i) => {
                if *i < graph.stages.len() {
                    Some((*i, false))
                } else {
                    None
                }
            }
            StageRef::Previous => {
                if stage_index == 0 {
                    None
                } else {
                    Some((stage_index - 1, true))
                }
            }
        }
    }
}

impl Validator for ReferenceValidator {
    fn validate(&self, graph: &BuildGraph) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (stage_index, stage) in graph.stages.iter().enumerate() {
            for node in &stage.nodes {
                let Some(fs) = node.operation.as_filesystem() else {
                    continue;
                };
                let FileSource::Stage { stage_ref, .. } = &fs.source else {
                    continue;
                };

                match stage_ref {
                    StageRef::Named(name) => {
                        if graph.stage_index_named(name).is_none() {
                            report.warnings.push(ValidationWarning::UndefinedNamedStageReference {
                                stage_index,
                                node_id: node.id.clone(),
                                name: name.clone(),
                            });
                        }
                    }
                    StageRef::Index(i) => {
                        if *i >= graph.stages.len() {
                            report.warnings.push(ValidationWarning::StageIndexOutOfBounds {
                                stage_index,
                                node_id: node.id.clone(),
                                index: *i,
                            });
                        } else if *i >= stage_index {
                            report.warnings.push(ValidationWarning::ForwardStageReference {
                                stage_index,
                                node_id: node.id.clone(),
                                referenced_index: *i,
                            });
                        }
                    }
                    StageRef::Previous => {
                        if stage_index == 0 {
                            report.errors.push(ValidationError::PreviousReferenceInFirstStage {
                                stage_index,
                                node_id: node.id.clone(),
                            });
                        }
                    }
                }

                let _ = Self::resolve_index(graph, stage_index, stage_ref);
            }
        }

        report
    }
}

pub struct PathValidator;

impl Validator for PathValidator {
    fn validate(&self, graph: &BuildGraph) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (stage_index, stage) in graph.stages.iter().enumerate() {
            for node in &stage.nodes {
                if let Some(fs) = node.operation.as_filesystem() {
                    if fs.destination.is_empty() {
                        report.errors.push(ValidationError::EmptyDestinationPath {
                            stage_index,
                            node_id: node.id.clone(),
                        });
                    }
                    if fs.destination.starts_with("..") || fs.destination.contains("/../") {
                        report.warnings.push(ValidationWarning::PathTraversal {
                            stage_index,
                            node_id: node.id.clone(),
                        });
                    }
                    if let FileSource::Context { patterns } = &fs.source {
                        if patterns.iter().any(|p| p.starts_with('/')) {
                            report.warnings.push(ValidationWarning::AbsoluteContextPath {
                                stage_index,
                                node_id: node.id.clone(),
                            });
                        }
                    }
                }

                if let Some(exec) = node.operation.as_exec() {
                    for mount in &exec.mounts {
                        if mount.has_empty_target() {
                            report.errors.push(ValidationError::EmptyMountTarget {
                                stage_index,
                                node_id: node.id.clone(),
                            });
                        }
                    }
                }
            }
        }

        report
    }
}

pub struct SecurityValidator;

impl Validator for SecurityValidator {
    fn validate(&self, graph: &BuildGraph) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (stage_index, stage) in graph.stages.iter().enumerate() {
            for node in &stage.nodes {
                let Some(exec) = node.operation.as_exec() else {
                    continue;
                };
                if exec.security.privileged {
                    report.warnings.push(ValidationWarning::PrivilegedExecution {
                        stage_index,
                        node_id: node.id.clone(),
                    });
                }
                if exec.user.as_ref().map(|u| u.is_root()).unwrap_or(false) {
                    report.warnings.push(ValidationWarning::RunningAsRoot {
                        stage_index,
                        node_id: node.id.clone(),
                    });
                }
                for mount in &exec.mounts {
                    if mount.is_read_write_secret() {
                        report.warnings.push(ValidationWarning::ReadWriteSecretMount {
                            stage_index,
                            node_id: node.id.clone(),
                        });
                    }
                }
            }
        }

        report
    }
}

const PACKAGE_MANAGER_UPDATE_TOKENS: &[&str] =
    &["apt-get update", "apt update", "apk update", "yum update", "dnf update"];

fn command_text(command: &crate::ir::operation::Command) -> String {
    match command {
        crate::ir::operation::Command::Shell(s) => s.clone(),
        crate::ir::operation::Command::Argv(argv) => argv.join(" "),
    }
}

pub struct BestPracticesValidator;

impl Validator for BestPracticesValidator {
    fn validate(&self, graph: &BuildGraph) -> ValidationReport {
        let mut report = ValidationReport::default();
        let mut has_healthcheck = false;

        for (stage_index, stage) in graph.stages.iter().enumerate() {
            for node in &stage.nodes {
                if let Some(exec) = node.operation.as_exec() {
                    let text = command_text(&exec.command).to_lowercase();
                    let has_update = PACKAGE_MANAGER_UPDATE_TOKENS
                        .iter()
                        .any(|token| text.contains(token));
                    if has_update && !text.contains("install") {
                        report.warnings.push(ValidationWarning::PackageManagerUpdateWithoutInstall {
                            stage_index,
                            node_id: node.id.clone(),
                        });
                    }
                }
                if let Operation::Metadata(meta) = &node.operation {
                    if matches!(meta.action, MetadataAction::SetHealthcheck(_)) {
                        has_healthcheck = true;
                    }
                }
            }
        }

        if !has_healthcheck && !graph.stages.is_empty() {
            report.warnings.push(ValidationWarning::MissingHealthcheck);
        }

        report
    }
}

/// The standard validator pipeline run by [`crate::ir::builder::GraphBuilder::build`].
pub fn default_validators() -> Vec<Box<dyn Validator>> {
    vec![
        Box::new(StructuralValidator),
        Box::new(ReferenceValidator),
        Box::new(PathValidator),
        Box::new(SecurityValidator),
        Box::new(BestPracticesValidator),
    ]
}

pub fn run_validators(graph: &BuildGraph, validators: &[Box<dyn Validator>]) -> ValidationReport {
    let mut report = ValidationReport::default();
    for validator in validators {
        report.merge(validator.validate(graph));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::mounts::Mount;
    use crate::ir::operation::{
        Command, ExecOperation, FileMetadata, FileSource, FilesystemAction, FilesystemOperation,
        NetworkMode, SecurityOptions, UserSpec,
    };
    use crate::ir::stage::BuildStage;

    fn exec(cmd: &str) -> Operation {
        Operation::Exec(ExecOperation {
            command: Command::Shell(cmd.to_string()),
            environment: Vec::new(),
            mounts: Vec::new(),
            working_dir: None,
            user: None,
            network: NetworkMode::Default,
            security: SecurityOptions::default(),
        })
    }

    fn graph_with_stages(stages: Vec<BuildStage>) -> BuildGraph {
        BuildGraph::new(stages, Default::default(), Vec::new())
    }

    #[test]
    fn structural_validator_catches_node_id_reused_across_stages() {
        let mut stage0 = BuildStage::new(Some("builder".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage0.nodes.push(crate::ir::node::BuildNode::new("shared-id", exec("one")));
        let mut stage1 = BuildStage::new(Some("runtime".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage1.nodes.push(crate::ir::node::BuildNode::new("shared-id", exec("two")));

        let graph = graph_with_stages(vec![stage0, stage1]);
        let report = StructuralValidator.validate(&graph);

        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::DuplicateNodeId { stage_index: 1, node_id } if node_id == "shared-id"
        )));
    }

    #[test]
    fn structural_validator_allows_distinct_ids_across_stages() {
        let mut stage0 = BuildStage::new(Some("builder".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage0.nodes.push(crate::ir::node::BuildNode::new("a", exec("one")));
        let mut stage1 = BuildStage::new(Some("runtime".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage1.nodes.push(crate::ir::node::BuildNode::new("b", exec("two")));

        let graph = graph_with_stages(vec![stage0, stage1]);
        let report = StructuralValidator.validate(&graph);

        assert!(report.is_ok());
    }

    #[test]
    fn reference_validator_warns_on_undefined_named_stage() {
        let mut stage = BuildStage::new(Some("runtime".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage.nodes.push(crate::ir::node::BuildNode::new(
            "copy",
            Operation::Filesystem(FilesystemOperation {
                action: FilesystemAction::Copy,
                source: FileSource::Stage {
                    stage_ref: StageRef::Named("missing".to_string()),
                    paths: vec!["/out".to_string()],
                },
                destination: "/app".to_string(),
                metadata: FileMetadata::default(),
            }),
        ));

        let graph = graph_with_stages(vec![stage]);
        let report = ReferenceValidator.validate(&graph);

        assert!(report.errors.is_empty());
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::UndefinedNamedStageReference { .. })));
    }

    #[test]
    fn reference_validator_rejects_previous_in_first_stage() {
        let mut stage = BuildStage::new(Some("runtime".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage.nodes.push(crate::ir::node::BuildNode::new(
            "copy",
            Operation::Filesystem(FilesystemOperation {
                action: FilesystemAction::Copy,
                source: FileSource::Stage {
                    stage_ref: StageRef::Previous,
                    paths: vec!["/out".to_string()],
                },
                destination: "/app".to_string(),
                metadata: FileMetadata::default(),
            }),
        ));

        let graph = graph_with_stages(vec![stage]);
        let report = ReferenceValidator.validate(&graph);

        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::PreviousReferenceInFirstStage { .. })));
    }

    #[test]
    fn path_validator_flags_empty_destination_and_mount_target() {
        let mut stage = BuildStage::new(Some("main".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage.nodes.push(crate::ir::node::BuildNode::new(
            "copy",
            Operation::Filesystem(FilesystemOperation {
                action: FilesystemAction::Copy,
                source: FileSource::Context { patterns: vec![] },
                destination: String::new(),
                metadata: FileMetadata::default(),
            }),
        ));
        let mut run = crate::ir::node::BuildNode::new("run", exec("echo"));
        if let Operation::Exec(op) = &mut run.operation {
            op.mounts.push(Mount::cache(""));
        }
        stage.nodes.push(run);

        let graph = graph_with_stages(vec![stage]);
        let report = PathValidator.validate(&graph);

        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyDestinationPath { .. })));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyMountTarget { .. })));
    }

    #[test]
    fn security_validator_warns_on_privileged_root_and_rw_secret() {
        let mut stage = BuildStage::new(Some("main".to_string()), crate::ir::operation::ImageOperation::scratch());
        let mut node = crate::ir::node::BuildNode::new("run", exec("echo"));
        if let Operation::Exec(op) = &mut node.operation {
            op.security.privileged = true;
            op.user = Some(UserSpec::Uid(0));
            op.mounts.push(Mount {
                mode: crate::ir::mounts::MountMode::ReadWrite,
                ..Mount::secret("/run/secrets/token")
            });
        }
        stage.nodes.push(node);

        let graph = graph_with_stages(vec![stage]);
        let report = SecurityValidator.validate(&graph);

        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::PrivilegedExecution { .. })));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::RunningAsRoot { .. })));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::ReadWriteSecretMount { .. })));
    }

    #[test]
    fn best_practices_validator_flags_update_without_install_and_missing_healthcheck() {
        let mut stage = BuildStage::new(Some("main".to_string()), crate::ir::operation::ImageOperation::scratch());
        stage.nodes.push(crate::ir::node::BuildNode::new("update", exec("apt-get update")));

        let graph = graph_with_stages(vec![stage]);
        let report = BestPracticesValidator.validate(&graph);

        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::PackageManagerUpdateWithoutInstall { .. })));
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ValidationWarning::MissingHealthcheck)));
    }
}
