//! Core library for the container build cache
//!
//! This crate contains the content-addressable store, in-memory cache index,
//! eviction/GC engine, and build-graph intermediate representation used to
//! memoize the outputs of build graph operations across builds. It has no
//! CLI, no container runtime, and no network transport of its own.

pub mod analysis;
pub mod cache;
mod canon;
pub mod codec;
pub mod digest;
pub mod errors;
pub mod eviction;
pub mod index;
pub mod ir;
pub mod platform;
pub mod store;

pub use cache::{BuildCache, CacheConfiguration, CachedResult, ContentAddressableCache, MemoryBuildCache, NoOpBuildCache};
pub use digest::{Algorithm, Digest};
pub use errors::{BuildCacheError, Result};
pub use eviction::EvictionPolicy;
pub use index::{CacheKey, CacheStatistics};
pub use platform::Platform;
pub use store::ContentStore;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
