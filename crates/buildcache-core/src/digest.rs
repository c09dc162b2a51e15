//! Multi-algorithm content digests.
//!
//! A [`Digest`] pairs an [`Algorithm`] with a fixed-length byte string and
//! prints in the canonical `"<alg>:<lowercase-hex>"` form used throughout the
//! cache (index keys, blob paths, descriptors).

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha384, Sha512};

use crate::errors::BuildCacheError;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// Byte length of a digest produced by this algorithm.
    pub const fn digest_len(self) -> usize {
        match self {
            Algorithm::Sha256 => 32,
            Algorithm::Sha384 => 48,
            Algorithm::Sha512 => 64,
        }
    }

    /// The algorithm's canonical lowercase name, as used in digest strings
    /// and blob store subdirectories.
    pub const fn name(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for Algorithm {
    type Err = BuildCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(BuildCacheError::InvalidDigest {
                message: format!("unsupported algorithm: {other}"),
            }),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A content digest: algorithm tag plus the raw hash bytes.
///
/// Equality and hashing are structural over `(algorithm, bytes)`; the
/// canonical string form is always lowercase regardless of the case of any
/// input that was parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl Digest {
    /// Compute the digest of `data` under `algorithm`.
    pub fn compute(data: &[u8], algorithm: Algorithm) -> Self {
        let bytes = match algorithm {
            Algorithm::Sha256 => Sha256::digest(data).to_vec(),
            Algorithm::Sha384 => Sha384::digest(data).to_vec(),
            Algorithm::Sha512 => Sha512::digest(data).to_vec(),
        };
        Self { algorithm, bytes }
    }

    /// Convenience constructor for the default cache-key algorithm.
    pub fn sha256(data: &[u8]) -> Self {
        Self::compute(data, Algorithm::Sha256)
    }

    /// Parse a canonical `"<alg>:<hex>"` string. Hex input is accepted in any
    /// case; `to_string()` always yields lowercase.
    pub fn parse(s: &str) -> Result<Self, BuildCacheError> {
        let (alg_str, hex_str) = s.split_once(':').ok_or_else(|| BuildCacheError::InvalidDigest {
            message: format!("missing ':' separator in digest: {s}"),
        })?;
        let algorithm: Algorithm = alg_str.parse()?;

        if !hex_str.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BuildCacheError::InvalidDigest {
                message: format!("non-hex characters in digest: {hex_str}"),
            });
        }

        let bytes = hex::decode(hex_str).map_err(|e| BuildCacheError::InvalidDigest {
            message: format!("invalid hex in digest: {e}"),
        })?;

        let expected = algorithm.digest_len();
        if bytes.len() != expected {
            return Err(BuildCacheError::InvalidDigest {
                message: format!(
                    "wrong digest length for {algorithm}: expected {expected} bytes, got {}",
                    bytes.len()
                ),
            });
        }

        Ok(Self { algorithm, bytes })
    }

    /// Construct a digest directly from already-computed bytes, validating
    /// the length against the algorithm.
    pub fn from_bytes(algorithm: Algorithm, bytes: Vec<u8>) -> Result<Self, BuildCacheError> {
        let expected = algorithm.digest_len();
        if bytes.len() != expected {
            return Err(BuildCacheError::InvalidDigest {
                message: format!(
                    "wrong digest length for {algorithm}: expected {expected} bytes, got {}",
                    bytes.len()
                ),
            });
        }
        Ok(Self { algorithm, bytes })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex encoding of the raw bytes (no algorithm prefix).
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = BuildCacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_display_and_parse() {
        let d = Digest::sha256(b"hello world");
        let s = d.to_string();
        assert_eq!(s.len(), "sha256:".len() + 64);
        let parsed: Digest = s.parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn is_deterministic() {
        let a = Digest::sha256(b"same input");
        let b = Digest::sha256(b"same input");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_inputs_yield_distinct_digests() {
        let a = Digest::sha256(b"a");
        let b = Digest::sha256(b"b");
        assert_ne!(a, b);
    }

    #[test]
    fn parses_mixed_case_hex_and_normalizes_to_lowercase() {
        let lower = Digest::sha256(b"case test").to_string();
        let upper = lower.to_uppercase();
        // uppercase algorithm name would be invalid, so only uppercase the hex part
        let (alg, hex_part) = upper.split_once(':').unwrap();
        let mixed = format!("{}:{}", alg.to_lowercase(), hex_part);
        let parsed: Digest = mixed.parse().unwrap();
        assert_eq!(parsed.to_string(), lower);
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let err = Digest::parse("md5:0123456789abcdef0123456789abcdef");
        assert!(matches!(err, Err(BuildCacheError::InvalidDigest { .. })));
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Digest::parse("sha256:abcd");
        assert!(matches!(err, Err(BuildCacheError::InvalidDigest { .. })));
    }

    #[test]
    fn rejects_non_hex() {
        let err = Digest::parse("sha256:zzzz567890abcdef0123456789abcdef0123456789abcdef0123456789abcd");
        assert!(matches!(err, Err(BuildCacheError::InvalidDigest { .. })));
    }

    #[test]
    fn rejects_missing_separator() {
        let err = Digest::parse("sha256-0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd");
        assert!(matches!(err, Err(BuildCacheError::InvalidDigest { .. })));
    }

    #[test]
    fn sha384_and_sha512_have_expected_lengths() {
        let d384 = Digest::compute(b"x", Algorithm::Sha384);
        assert_eq!(d384.as_bytes().len(), 48);
        let d512 = Digest::compute(b"x", Algorithm::Sha512);
        assert_eq!(d512.as_bytes().len(), 64);
    }

    #[test]
    fn serializes_as_canonical_string() {
        let d = Digest::sha256(b"serde");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{d}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
