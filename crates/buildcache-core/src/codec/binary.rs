//! Compact, self-describing binary coder for the build graph IR.
//!
//! Frame layout: a 4-byte magic, a little-endian u16 version tag, then a
//! `bincode`-encoded payload. Smaller than the canonical JSON coder for the
//! same graph since it carries no field names.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::errors::{BuildCacheError, Result};
use crate::ir::graph::BuildGraph;

const MAGIC: &[u8; 4] = b"BCIR";
const SUPPORTED_VERSION: u16 = 1;

/// Encode a graph into the compact binary frame.
pub fn encode(graph: &BuildGraph) -> Result<Vec<u8>> {
    let payload = bincode::serialize(graph).map_err(|e| BuildCacheError::SerializationError {
        message: format!("failed to encode graph to binary: {e}"),
    })?;

    let mut buf = Vec::with_capacity(MAGIC.len() + 2 + payload.len());
    buf.write_all(MAGIC).expect("writing to a Vec cannot fail");
    buf.write_u16::<LittleEndian>(SUPPORTED_VERSION)
        .expect("writing to a Vec cannot fail");
    buf.write_all(&payload).expect("writing to a Vec cannot fail");
    Ok(buf)
}

/// Decode a graph previously produced by [`encode`]. Rejects truncated
/// frames, an unrecognized magic, and a version other than the one this
/// coder supports.
pub fn decode(bytes: &[u8]) -> Result<BuildGraph> {
    if bytes.len() < MAGIC.len() + 2 {
        return Err(BuildCacheError::SerializationError {
            message: "truncated input: frame shorter than its header".to_string(),
        });
    }

    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(BuildCacheError::SerializationError {
            message: "unrecognized magic bytes in binary IR frame".to_string(),
        });
    }

    let mut cursor = Cursor::new(rest);
    let version = cursor
        .read_u16::<LittleEndian>()
        .map_err(|e| BuildCacheError::SerializationError {
            message: format!("failed to read version tag: {e}"),
        })?;
    if version != SUPPORTED_VERSION {
        return Err(BuildCacheError::SerializationError {
            message: format!(
                "unsupported IR binary version: expected {SUPPORTED_VERSION}, got {version}"
            ),
        });
    }

    let payload = &rest[2..];
    bincode::deserialize(payload).map_err(|e| BuildCacheError::SerializationError {
        message: format!("failed to decode binary graph payload: {e}"),
    })
}
