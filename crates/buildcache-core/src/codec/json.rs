//! Canonical JSON coder for the build graph IR.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canon::canonicalize;
use crate::errors::{BuildCacheError, Result};
use crate::ir::graph::BuildGraph;

const SUPPORTED_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: String,
    graph: BuildGraph,
}

/// Encode a graph as canonical JSON: deterministic key ordering, an
/// explicit `version` tag, and (when `pretty` is set) two-space indentation
/// that affects only whitespace, never the decoded value.
pub fn encode(graph: &BuildGraph, pretty: bool) -> Result<Vec<u8>> {
    let envelope = Envelope {
        version: SUPPORTED_VERSION.to_string(),
        graph: graph.clone(),
    };

    let value = serde_json::to_value(&envelope).map_err(|e| BuildCacheError::SerializationError {
        message: format!("failed to encode graph to JSON: {e}"),
    })?;
    let canonical = canonicalize(value);

    if pretty {
        canonical_pretty(&canonical)
    } else {
        serde_json::to_vec(&canonical).map_err(|e| BuildCacheError::SerializationError {
            message: format!("failed to serialize canonical JSON: {e}"),
        })
    }
}

fn canonical_pretty(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(value, &mut serializer).map_err(|e| BuildCacheError::SerializationError {
        message: format!("failed to pretty-print canonical JSON: {e}"),
    })?;
    Ok(buf)
}

/// Decode a graph previously produced by [`encode`]. Rejects truncated
/// input, a version other than the one this coder supports, and any field
/// whose value fails its own structural invariants (e.g. an unsupported
/// digest algorithm tag).
pub fn decode(bytes: &[u8]) -> Result<BuildGraph> {
    if bytes.is_empty() {
        return Err(BuildCacheError::SerializationError {
            message: "truncated input: empty byte slice".to_string(),
        });
    }

    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| BuildCacheError::SerializationError {
            message: format!("failed to parse JSON envelope: {e}"),
        })?;

    if envelope.version != SUPPORTED_VERSION {
        return Err(BuildCacheError::SerializationError {
            message: format!(
                "unsupported IR version: expected {SUPPORTED_VERSION}, got {}",
                envelope.version
            ),
        });
    }

    Ok(envelope.graph)
}
