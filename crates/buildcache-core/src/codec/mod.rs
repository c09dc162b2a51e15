//! IR serialization: a canonical JSON coder and a compact binary coder.
//! Neither coder mutates the graph it encodes or decodes.

pub mod binary;
pub mod json;
