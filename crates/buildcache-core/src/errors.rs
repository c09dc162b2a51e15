//! Error types for the cache engine.
//!
//! Most anomalies are absorbed as cache misses rather than propagated, so
//! this enum only covers the cases that must surface to a caller.

use thiserror::Error;

/// Errors raised by digest parsing, IR construction/analysis, serialization,
/// the content store, and the cache facade.
#[derive(Error, Debug)]
pub enum BuildCacheError {
    /// A digest string failed to parse or a byte slice had the wrong length
    /// for its algorithm.
    #[error("invalid digest: {message}")]
    InvalidDigest { message: String },

    /// Build-graph construction or validation failed (duplicate ids, missing
    /// dependencies, cycles, undefined stage references, empty paths, ...).
    #[error("invalid build graph: {message}")]
    InvalidGraph { message: String },

    /// A cycle was detected while topologically sorting a stage.
    #[error("cyclic dependency in stage {stage_index} among nodes: {node_ids:?}")]
    CyclicDependency {
        stage_index: usize,
        node_ids: Vec<String>,
    },

    /// Encoding or decoding the IR failed (version mismatch, truncation,
    /// unknown tag).
    #[error("serialization error: {message}")]
    SerializationError { message: String },

    /// An ingest session id did not match any open session.
    #[error("ingest session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Completing an ingest session failed partway through.
    #[error("ingest session {session_id} failed: {message}")]
    IngestFailure { session_id: String, message: String },

    /// Underlying filesystem I/O failure.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A pending operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, BuildCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_digest_display_includes_message() {
        let err = BuildCacheError::InvalidDigest {
            message: "unsupported algorithm: md5".to_string(),
        };
        assert_eq!(err.to_string(), "invalid digest: unsupported algorithm: md5");
    }

    #[test]
    fn cyclic_dependency_display_includes_node_ids() {
        let err = BuildCacheError::CyclicDependency {
            stage_index: 1,
            node_ids: vec!["a".to_string(), "b".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("stage 1"));
        assert!(message.contains('a'));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: BuildCacheError = io_err.into();
        assert!(matches!(err, BuildCacheError::Io { .. }));
    }
}
