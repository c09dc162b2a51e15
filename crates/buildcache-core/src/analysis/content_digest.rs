//! Stable content digest of a single operation's semantic fields.

use crate::canon::canonical_bytes;
use crate::digest::{Algorithm, Digest};
use crate::errors::Result;
use crate::ir::operation::Operation;

/// Compute the `operationDigest` used in a cache key: sha256 over the
/// operation's canonical (key-sorted) JSON encoding.
///
/// `Operation` never carries node ids or source locations — those live on
/// `BuildNode` — so hashing the operation value directly already excludes
/// the non-semantic fields the cache key deliberately excludes.
pub fn operation_content_digest(operation: &Operation) -> Result<Digest> {
    let bytes = canonical_bytes(operation)?;
    Ok(Digest::compute(&bytes, Algorithm::Sha256))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operation::{Command, ExecOperation, NetworkMode, SecurityOptions};

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

    #[test]
    fn is_deterministic_for_equal_operations() {
        let a = operation_content_digest(&exec("echo hi")).unwrap();
        let b = operation_content_digest(&exec("echo hi")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn differs_for_distinct_operations() {
        let a = operation_content_digest(&exec("echo hi")).unwrap();
        let b = operation_content_digest(&exec("echo bye")).unwrap();
        assert_ne!(a, b);
    }
}
