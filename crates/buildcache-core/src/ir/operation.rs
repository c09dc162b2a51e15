//! Operation variants: the polymorphic payload carried by a [`crate::ir::node::BuildNode`].
//!
//! The source model used an open class hierarchy with a visitor; here each
//! kind is an arm of a tagged sum, with a catch-all for forward compatibility.

use serde::{Deserialize, Serialize};

use crate::ir::mounts::Mount;
use crate::ir::stage::StageRef;
use crate::platform::Platform;

/// A position in build-definition source, carried only for diagnostics.
/// Excluded from content-digest computation (§4.3 of the design).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Command form: a shell string or an explicit argv vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "lowercase")]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

/// The value half of an environment variable assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvValue {
    Literal(String),
    BuildArg(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: EnvValue,
}

/// The identity an exec operation runs as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum UserSpec {
    Named(String),
    Uid(u32),
    UidGid(u32, u32),
    UserGroup(String, String),
}

impl UserSpec {
    /// `true` when this spec resolves to the root uid, either explicitly or
    /// by the well-known name `"root"`.
    pub fn is_root(&self) -> bool {
        matches!(self, UserSpec::Uid(0) | UserSpec::UidGid(0, _))
            || matches!(self, UserSpec::Named(name) if name == "root")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Default,
    None,
    Host,
}

impl Default for NetworkMode {
    fn default() -> Self {
        NetworkMode::Default
    }
}

/// Linux capability add/drop sets plus sandboxing profile references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityOptions {
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub add_capabilities: Vec<String>,
    #[serde(default)]
    pub drop_capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// Run a process, with its environment, mounts, and sandboxing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecOperation {
    pub command: Command,
    #[serde(default)]
    pub environment: Vec<EnvVar>,
    #[serde(default)]
    pub mounts: Vec<Mount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSpec>,
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub security: SecurityOptions,
}

/// Where filesystem content for a `Filesystem` operation comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileSource {
    /// Build context, optionally filtered by glob patterns.
    Context { patterns: Vec<String> },
    /// Another stage's filesystem, by symbolic reference.
    Stage { stage_ref: StageRef, paths: Vec<String> },
    /// An external image's filesystem.
    Image { image_ref: String, paths: Vec<String> },
    /// A remote URL, fetched and written as a single file.
    Url(String),
}

/// Filesystem mutation kind. `Other` keeps the sum open for forward
/// compatibility with actions this crate does not yet model explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum FilesystemAction {
    Copy,
    Add,
    Remove,
    Other(String),
}

/// File permission mode: either an explicit octal mode or "preserve source".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionMode {
    Preserve,
    Mode(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PermissionMode>,
    #[serde(default)]
    pub preserve_timestamps: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemOperation {
    pub action: FilesystemAction,
    pub source: FileSource,
    pub destination: String,
    #[serde(default)]
    pub metadata: FileMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkProtocol {
    Tcp,
    Udp,
}

/// A healthcheck directive attached to an image via metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Healthcheck {
    pub command: Command,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Image-manifest-level metadata mutations (the OCI config verbs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MetadataAction {
    SetEnv { key: String, value: String },
    SetEnvBatch(Vec<(String, String)>),
    SetLabel { key: String, value: String },
    SetLabelBatch(Vec<(String, String)>),
    DeclareArg { name: String, default: Option<String> },
    Expose { port: u16, proto: NetworkProtocol },
    SetWorkdir(String),
    SetUser(UserSpec),
    SetEntrypoint(Command),
    SetCmd(Command),
    SetShell(Vec<String>),
    SetStopSignal(String),
    AddVolume(String),
    SetHealthcheck(Healthcheck),
    AddOnbuild(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataOperation {
    pub action: MetadataAction,
}

/// Where an image-producing operation's content comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Registry(String),
    Scratch,
    OciLayout { path: String, tag: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageOperation {
    pub source: ImageSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ImageOperation {
    pub fn scratch() -> Self {
        Self {
            source: ImageSource::Scratch,
            platform: None,
        }
    }

    pub fn registry(reference: impl Into<String>) -> Self {
        Self {
            source: ImageSource::Registry(reference.into()),
            platform: None,
        }
    }
}

/// Which arm of [`Operation`] a value is, independent of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Exec,
    Filesystem,
    Metadata,
    Image,
}

/// The polymorphic operation payload of a build node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    Exec(ExecOperation),
    Filesystem(FilesystemOperation),
    Metadata(MetadataOperation),
    Image(ImageOperation),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Exec(_) => OperationKind::Exec,
            Operation::Filesystem(_) => OperationKind::Filesystem,
            Operation::Metadata(_) => OperationKind::Metadata,
            Operation::Image(_) => OperationKind::Image,
        }
    }

    pub fn as_exec(&self) -> Option<&ExecOperation> {
        match self {
            Operation::Exec(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&FilesystemOperation> {
        match self {
            Operation::Filesystem(op) => Some(op),
            _ => None,
        }
    }
}
