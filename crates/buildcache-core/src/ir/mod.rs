//! Build-graph intermediate representation: operations, nodes, stages, and
//! the graph they compose into.

pub mod builder;
pub mod graph;
pub mod mounts;
pub mod node;
pub mod operation;
pub mod stage;
pub mod validate;

pub use builder::GraphBuilder;
pub use graph::BuildGraph;
pub use mounts::{Mount, MountKind, MountMode, MountSharing};
pub use node::BuildNode;
pub use operation::{
    Command, EnvValue, EnvVar, ExecOperation, FileMetadata, FileSource, FilesystemAction,
    FilesystemOperation, Healthcheck, ImageOperation, ImageSource, MetadataAction,
    MetadataOperation, NetworkMode, NetworkProtocol, Operation, OperationKind, PermissionMode,
    SecurityOptions, SourceLocation, UserSpec,
};
pub use stage::{BuildStage, StageRef};
pub use validate::{ValidationError, ValidationReport, ValidationWarning, Validator};
