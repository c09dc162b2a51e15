//! Mount specifications attached to exec operations.

use serde::{Deserialize, Serialize};

/// How a cache mount is shared across concurrent builds using the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountSharing {
    Shared,
    Private,
    Locked,
}

/// Read/write mode for a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountMode {
    ReadWrite,
    ReadOnly,
}

/// The kind of mount and its kind-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MountKind {
    /// Persistent cache directory, shared or locked across concurrent runs.
    Cache {
        #[serde(skip_serializing_if = "Option::is_none")]
        sharing: Option<MountSharing>,
    },
    /// Build-time secret, never persisted into the resulting image.
    Secret {
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
    },
    /// Bind mount from the build context or another stage.
    Bind,
    /// In-memory filesystem.
    Tmpfs {
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
    },
}

/// A single mount attached to an exec operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    pub kind: MountKind,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub mode: MountMode,
}

impl Mount {
    pub fn cache(target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Cache { sharing: None },
            target: target.into(),
            source: None,
            mode: MountMode::ReadWrite,
        }
    }

    pub fn secret(target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Secret { mode: None },
            target: target.into(),
            source: None,
            mode: MountMode::ReadOnly,
        }
    }

    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Bind,
            target: target.into(),
            source: Some(source.into()),
            mode: MountMode::ReadWrite,
        }
    }

    pub fn tmpfs(target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Tmpfs { size: None },
            target: target.into(),
            source: None,
            mode: MountMode::ReadWrite,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.mode = MountMode::ReadOnly;
        self
    }

    /// `true` when the mount's target is empty — flagged by path validation.
    pub fn has_empty_target(&self) -> bool {
        self.target.is_empty()
    }

    /// `true` for a secret mount opened read-write, which a security
    /// validator should warn on.
    pub fn is_read_write_secret(&self) -> bool {
        matches!(self.kind, MountKind::Secret { .. }) && self.mode == MountMode::ReadWrite
    }
}
