//! In-memory cache index (C6): key → (descriptor, metadata), with hit/miss
//! counters, size accounting, and a persistent `cache.json` snapshot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::digest::Digest;
use crate::errors::Result;
use crate::platform::Platform;

const SNAPSHOT_VERSION: &str = "1.0";

/// The triple that identifies a memoization slot: the digest of the
/// operation itself, the ordered digests of its inputs, and the target
/// platform. Order of `input_digests` is semantically meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub operation_digest: Digest,
    pub input_digests: Vec<Digest>,
    pub platform: Platform,
}

impl CacheKey {
    pub fn new(operation_digest: Digest, input_digests: Vec<Digest>, platform: Platform) -> Self {
        Self {
            operation_digest,
            input_digests,
            platform,
        }
    }

    /// Canonical string form used as the index's map key and as the `key`
    /// field of a `cache.json` entry.
    pub fn canonical(&self) -> String {
        let inputs = self
            .input_digests
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}|[{}]|{}", self.operation_digest, inputs, self.platform.canonical())
    }
}

/// A pointer into the content store: media type, digest, and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
}

/// Bookkeeping attached to each cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub operation_hash: Digest,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
}

impl CacheMetadata {
    /// `now - createdAt > min(ttl, defaultTtl, maxAgeSeconds)`, per the
    /// eviction engine's TTL rule. The per-entry `ttl` (if set) narrows the
    /// effective bound further than the cache-wide defaults.
    pub fn is_expired(&self, now: DateTime<Utc>, default_ttl: Option<u64>, max_age_seconds: u64) -> bool {
        let mut bound = max_age_seconds;
        if let Some(ttl) = self.ttl {
            bound = bound.min(ttl);
        }
        if let Some(default_ttl) = default_ttl {
            bound = bound.min(default_ttl);
        }
        let age_seconds = (now - self.created_at).num_seconds().max(0) as u64;
        age_seconds > bound
    }
}

/// One mapping held by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub descriptor: Descriptor,
    pub metadata: CacheMetadata,
}

/// Snapshot of index-wide counters and accounting, returned by
/// [`CacheIndex::statistics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub entry_count: usize,
    pub total_size: u64,
    pub average_entry_size: f64,
    pub hit_rate: f64,
    pub oldest_entry_age_seconds: Option<u64>,
    pub most_recent_entry_age_seconds: Option<u64>,
    pub eviction_policy: String,
    /// No blob compression is applied by this crate (see DESIGN.md); this
    /// is always `1.0`, surfaced so embedders that configure a compression
    /// algorithm still get a well-formed statistics value.
    pub compression_ratio: f64,
    /// Extension point for embedder-defined per-operation counters; the
    /// core never populates this itself.
    pub operation_metrics: IndexMap<String, u64>,
    pub error_count: u64,
    pub last_gc_time: Option<DateTime<Utc>>,
    pub shard_info: Option<ShardInfo>,
}

/// Present only when a future sharding layer is wired in; the single-shard
/// implementation in this crate never populates it (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_count: usize,
    pub current_shard: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    descriptor: Descriptor,
    metadata: CacheMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SnapshotStats {
    hits: u64,
    misses: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: String,
    entries: Vec<SnapshotEntry>,
    stats: SnapshotStats,
}

struct IndexState {
    entries: IndexMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    error_count: u64,
    last_gc_time: Option<DateTime<Utc>>,
}

/// In-memory authoritative index, backed by an atomically-rewritten
/// `cache.json` snapshot file. All operations are serialized behind a
/// single mutex held only for the duration of one method call.
pub struct CacheIndex {
    path: PathBuf,
    default_ttl: Option<u64>,
    max_age_seconds: u64,
    state: Mutex<IndexState>,
}

impl CacheIndex {
    /// Load (or start empty, if the file is absent or corrupt) the index
    /// snapshot at `path`.
    pub async fn open(path: impl Into<PathBuf>, default_ttl: Option<u64>, max_age_seconds: u64) -> Result<Self> {
        let path = path.into();
        let state = Self::load(&path).await;
        Ok(Self {
            path,
            default_ttl,
            max_age_seconds,
            state: Mutex::new(state),
        })
    }

    async fn load(path: &Path) -> IndexState {
        let empty = IndexState {
            entries: IndexMap::new(),
            hits: 0,
            misses: 0,
            error_count: 0,
            last_gc_time: None,
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(_) => return empty,
        };

        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, path = ?path, "cache index snapshot is corrupt; starting empty");
                return empty;
            }
        };

        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                version = %snapshot.version,
                expected = SNAPSHOT_VERSION,
                "cache index snapshot has an unrecognized version; starting empty"
            );
            return empty;
        }

        let mut entries = IndexMap::with_capacity(snapshot.entries.len());
        for entry in snapshot.entries {
            entries.insert(
                entry.key,
                CacheEntry {
                    descriptor: entry.descriptor,
                    metadata: entry.metadata,
                },
            );
        }

        debug!(entries = entries.len(), path = ?path, "loaded cache index snapshot");
        IndexState {
            entries,
            hits: snapshot.stats.hits,
            misses: snapshot.stats.misses,
            error_count: 0,
            last_gc_time: None,
        }
    }

    async fn flush_locked(&self, state: &IndexState) -> Result<()> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            entries: state
                .entries
                .iter()
                .map(|(key, entry)| SnapshotEntry {
                    key: key.clone(),
                    descriptor: entry.descriptor.clone(),
                    metadata: entry.metadata.clone(),
                })
                .collect(),
            stats: SnapshotStats {
                hits: state.hits,
                misses: state.misses,
            },
        };

        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| crate::errors::BuildCacheError::SerializationError {
            message: format!("failed to serialize cache index: {e}"),
        })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn is_entry_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        entry
            .metadata
            .is_expired(now, self.default_ttl, self.max_age_seconds)
    }

    /// Insert `(key, descriptor, metadata)`. First-writer-wins: if a live,
    /// unexpired entry already exists for this key, this is a no-op
    /// (including statistics) and returns `false`. Returns `true` when the
    /// mapping was actually written.
    pub async fn put(&self, key: &CacheKey, descriptor: Descriptor, metadata: CacheMetadata) -> Result<bool> {
        let canonical = key.canonical();
        let now = Utc::now();

        let mut state = self.state.lock().await;
        if let Some(existing) = state.entries.get(&canonical) {
            if !self.is_entry_expired(existing, now) {
                trace!(key = %canonical, "put is a no-op: first writer already holds this key");
                return Ok(false);
            }
        }

        state.entries.insert(
            canonical.clone(),
            CacheEntry {
                descriptor,
                metadata,
            },
        );
        trace!(key = %canonical, "inserted cache entry");
        self.flush_locked(&state).await?;
        Ok(true)
    }

    /// Look up `key`. On a live hit, strictly advances `accessed_at` and
    /// increments the hit counter. A miss — absent key, or present but
    /// expired — increments the miss counter and never mutates
    /// `accessed_at`.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let canonical = key.canonical();
        let now = Utc::now();

        let mut state = self.state.lock().await;
        let expired = match state.entries.get(&canonical) {
            Some(entry) => self.is_entry_expired(entry, now),
            None => {
                state.misses += 1;
                trace!(key = %canonical, "cache index miss");
                return Ok(None);
            }
        };

        if expired {
            state.misses += 1;
            trace!(key = %canonical, "cache index entry expired");
            return Ok(None);
        }

        let entry = state
            .entries
            .get_mut(&canonical)
            .expect("presence checked above");
        // `Utc::now()` alone does not guarantee forward progress: two gets
        // serialized by the same mutex tick can land on the same clock
        // reading (millisecond/microsecond resolution varies by OS), and a
        // clock step can regress it outright. Clamp to strictly after the
        // entry's previous `accessed_at` so the invariant holds regardless
        // of what the wall clock does between calls.
        let advanced = now.max(entry.metadata.accessed_at + chrono::Duration::nanoseconds(1));
        entry.metadata.accessed_at = advanced;
        state.hits += 1;
        let result = state.entries.get(&canonical).cloned();
        self.flush_locked(&state).await?;
        trace!(key = %canonical, "cache index hit");
        Ok(result)
    }

    /// Remove the listed keys (already-canonicalized strings), returning
    /// the entries that were actually present.
    pub async fn remove(&self, keys: &[String]) -> Result<Vec<(String, CacheEntry)>> {
        let mut state = self.state.lock().await;
        let mut removed = Vec::new();
        for key in keys {
            if let Some(entry) = state.entries.shift_remove(key) {
                removed.push((key.clone(), entry));
            }
        }
        if !removed.is_empty() {
            self.flush_locked(&state).await?;
        }
        Ok(removed)
    }

    /// A point-in-time copy of every mapping currently held.
    pub async fn all_entries(&self) -> IndexMap<String, CacheEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Record that an anomaly (e.g. a missing blob behind a live entry) was
    /// absorbed rather than propagated.
    pub async fn record_error(&self) {
        self.state.lock().await.error_count += 1;
    }

    /// Record that a GC tick just ran, for `statistics().last_gc_time`.
    pub async fn note_gc_tick(&self) {
        self.state.lock().await.last_gc_time = Some(Utc::now());
    }

    pub async fn statistics(&self, eviction_policy: &str) -> CacheStatistics {
        let state = self.state.lock().await;
        let now = Utc::now();

        let entry_count = state.entries.len();
        let total_size: u64 = state.entries.values().map(|e| e.descriptor.size).sum();
        let average_entry_size = if entry_count == 0 {
            0.0
        } else {
            total_size as f64 / entry_count as f64
        };

        let mut oldest = None;
        let mut newest = None;
        for entry in state.entries.values() {
            let age = (now - entry.metadata.created_at).num_seconds().max(0) as u64;
            oldest = Some(oldest.map_or(age, |o: u64| o.max(age)));
            newest = Some(newest.map_or(age, |n: u64| n.min(age)));
        }

        let total_requests = state.hits + state.misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            state.hits as f64 / total_requests as f64
        };

        CacheStatistics {
            entry_count,
            total_size,
            average_entry_size,
            hit_rate,
            oldest_entry_age_seconds: oldest,
            most_recent_entry_age_seconds: newest,
            eviction_policy: eviction_policy.to_string(),
            compression_ratio: 1.0,
            operation_metrics: IndexMap::new(),
            error_count: state.error_count,
            last_gc_time: state.last_gc_time,
            shard_info: None,
        }
    }
}
