//! Eviction / GC engine (C7): byte-budget and age-limit enforcement under a
//! selectable policy, plus a periodic reconciliation tick.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::digest::Digest;
use crate::errors::{BuildCacheError, Result};
use crate::index::CacheIndex;
use crate::store::ContentStore;

/// Victim-selection strategy. Selected once at cache construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Victim = entry with the smallest `accessed_at`. Default.
    Lru,
    /// Victim = entry with the smallest `created_at`.
    Fifo,
    /// Adaptive Replacement Cache: recency list T1, frequency list T2, and
    /// their ghost histories B1/B2, with a self-tuning target size `p`.
    Arc,
}

impl EvictionPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Arc => "arc",
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = BuildCacheError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lru" => Ok(EvictionPolicy::Lru),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "arc" => Ok(EvictionPolicy::Arc),
            other => Err(BuildCacheError::InvalidGraph {
                message: format!("unknown eviction policy: {other}"),
            }),
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Lru
    }
}

/// Budgets and scheduling knobs the eviction engine enforces.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    pub max_size_bytes: u64,
    pub max_age_seconds: u64,
    pub gc_interval_seconds: u64,
    pub policy: EvictionPolicy,
    pub default_ttl_seconds: Option<u64>,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            max_age_seconds: 7 * 24 * 3600,
            gc_interval_seconds: 3600,
            policy: EvictionPolicy::Lru,
            default_ttl_seconds: None,
        }
    }
}

/// Ghost-list state for the ARC policy. Tracked independently of the
/// index: membership here is only ever used to *order* candidate victims,
/// never to decide what is actually present (the index remains the single
/// source of truth for that).
#[derive(Default)]
struct ArcState {
    p: usize,
    t1: VecDeque<String>,
    t2: VecDeque<String>,
    b1: VecDeque<String>,
    b2: VecDeque<String>,
}

impl ArcState {
    fn remove_key(&mut self, key: &str) {
        self.t1.retain(|k| k != key);
        self.t2.retain(|k| k != key);
        self.b1.retain(|k| k != key);
        self.b2.retain(|k| k != key);
    }

    /// A fresh insertion enters T1 (recently used, not yet frequent).
    fn record_insertion(&mut self, key: &str, capacity: usize) {
        if self.t1.iter().any(|k| k == key) || self.t2.iter().any(|k| k == key) {
            self.record_access(key, capacity);
            return;
        }
        self.remove_key(key);
        self.t1.push_back(key.to_string());
    }

    /// A reference hit promotes T1→T2, bumps an existing T2 entry to MRU,
    /// or adapts `p` on a ghost hit per the standard ARC rule.
    fn record_access(&mut self, key: &str, capacity: usize) {
        if let Some(pos) = self.t1.iter().position(|k| k == key) {
            self.t1.remove(pos);
            self.t2.push_back(key.to_string());
            return;
        }
        if let Some(pos) = self.t2.iter().position(|k| k == key) {
            let entry = self.t2.remove(pos).unwrap();
            self.t2.push_back(entry);
            return;
        }
        if let Some(pos) = self.b1.iter().position(|k| k == key) {
            self.b1.remove(pos);
            let delta = (self.b2.len().max(1) / self.b1.len().max(1)).max(1);
            self.p = (self.p + delta).min(capacity);
            self.t2.push_back(key.to_string());
            return;
        }
        if let Some(pos) = self.b2.iter().position(|k| k == key) {
            self.b2.remove(pos);
            let delta = (self.b1.len().max(1) / self.b2.len().max(1)).max(1);
            self.p = self.p.saturating_sub(delta);
            self.t2.push_back(key.to_string());
            return;
        }
        // Neither resident nor ghost: treat like a fresh insertion.
        self.record_insertion(key, capacity);
    }

    /// Classic ARC REPLACE: evict from T1 if it has grown past the target
    /// size `p`, otherwise from T2; the victim moves to the matching ghost
    /// list.
    fn next_victim(&mut self) -> Option<String> {
        if !self.t1.is_empty() && self.t1.len() >= self.p.max(1) {
            let victim = self.t1.pop_front()?;
            self.b1.push_back(victim.clone());
            Some(victim)
        } else if let Some(victim) = self.t2.pop_front() {
            self.b2.push_back(victim.clone());
            Some(victim)
        } else {
            self.t1.pop_front()
        }
    }
}

/// Enforces `max_size_bytes` and `max_age_seconds` against a [`CacheIndex`],
/// and reconciles the [`ContentStore`] with whatever the index still
/// references. One engine is owned per cache instance.
pub struct EvictionEngine {
    config: EvictionConfig,
    index: Arc<CacheIndex>,
    store: Arc<ContentStore>,
    arc: Mutex<ArcState>,
}

impl EvictionEngine {
    pub fn new(config: EvictionConfig, index: Arc<CacheIndex>, store: Arc<ContentStore>) -> Self {
        Self {
            config,
            index,
            store,
            arc: Mutex::new(ArcState::default()),
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.config.policy
    }

    /// Notify the ARC policy of a new entry. A no-op under LRU/FIFO.
    pub async fn record_put(&self, key: &str) {
        if self.config.policy == EvictionPolicy::Arc {
            let capacity = self.arc_capacity().await;
            self.arc.lock().await.record_insertion(key, capacity);
        }
    }

    /// Notify the ARC policy of a cache hit. A no-op under LRU/FIFO, since
    /// those policies read recency/insertion order straight off the index.
    pub async fn record_access(&self, key: &str) {
        if self.config.policy == EvictionPolicy::Arc {
            let capacity = self.arc_capacity().await;
            self.arc.lock().await.record_access(key, capacity);
        }
    }

    /// ARC's capacity parameter is a slot count; this crate's budget is
    /// byte-denominated, so the slot count is re-derived each time from the
    /// current average entry size.
    async fn arc_capacity(&self) -> usize {
        let stats = self.index.statistics(self.config.policy.as_str()).await;
        if stats.entry_count == 0 || stats.average_entry_size < 1.0 {
            return 1;
        }
        ((self.config.max_size_bytes as f64 / stats.average_entry_size) as usize).max(1)
    }

    async fn select_victim(&self) -> Result<Option<String>> {
        let entries = self.index.all_entries().await;
        if entries.is_empty() {
            return Ok(None);
        }

        match self.config.policy {
            EvictionPolicy::Lru => Ok(entries
                .iter()
                .min_by_key(|(_, e)| e.metadata.accessed_at)
                .map(|(k, _)| k.clone())),
            EvictionPolicy::Fifo => Ok(entries
                .iter()
                .min_by_key(|(_, e)| e.metadata.created_at)
                .map(|(k, _)| k.clone())),
            EvictionPolicy::Arc => {
                let mut arc = self.arc.lock().await;
                loop {
                    match arc.next_victim() {
                        Some(candidate) if entries.contains_key(&candidate) => {
                            return Ok(Some(candidate))
                        }
                        Some(_) => continue,
                        None => {
                            // Ghost lists are empty or desynced from the index
                            // (e.g. right after a restart); fall back to LRU.
                            return Ok(entries
                                .iter()
                                .min_by_key(|(_, e)| e.metadata.accessed_at)
                                .map(|(k, _)| k.clone()));
                        }
                    }
                }
            }
        }
    }

    async fn evict_one(&self, key: &str) -> Result<()> {
        self.index.remove(std::slice::from_ref(&key.to_string())).await?;
        debug!(key, policy = %self.config.policy, "evicted cache entry");
        Ok(())
    }

    /// Cheap trim run synchronously after every `put`: remove victims while
    /// `total_size` exceeds `max_size_bytes`. Best-effort — concurrent
    /// activity may transiently push `total_size` above budget again before
    /// the next GC tick catches up.
    pub async fn trim_after_put(&self) -> Result<()> {
        loop {
            let stats = self.index.statistics(self.config.policy.as_str()).await;
            if stats.total_size <= self.config.max_size_bytes {
                return Ok(());
            }
            match self.select_victim().await? {
                Some(victim) => self.evict_one(&victim).await?,
                None => return Ok(()),
            }
        }
    }

    /// Expensive periodic scan: expire TTL'd entries regardless of budget,
    /// trim to the size budget, and reclaim content-store blobs no longer
    /// referenced by any live entry.
    pub async fn gc_tick(&self) -> Result<()> {
        let now = Utc::now();
        let entries = self.index.all_entries().await;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| {
                e.metadata
                    .is_expired(now, self.config.default_ttl_seconds, self.config.max_age_seconds)
            })
            .map(|(k, _)| k.clone())
            .collect();

        if !expired.is_empty() {
            self.index.remove(&expired).await?;
            if self.config.policy == EvictionPolicy::Arc {
                let mut arc = self.arc.lock().await;
                for key in &expired {
                    arc.remove_key(key);
                }
            }
            debug!(count = expired.len(), "GC tick expired entries");
        }

        self.trim_after_put().await?;

        let live = self.index.all_entries().await;
        let keep: HashSet<Digest> = live.values().map(|e| e.descriptor.digest.clone()).collect();
        let (removed, freed_bytes) = self.store.delete_except(&keep).await?;
        if !removed.is_empty() {
            debug!(removed = removed.len(), freed_bytes, "GC tick reclaimed orphaned blobs");
        }

        self.index.note_gc_tick().await;
        Ok(())
    }

    /// Spawn the background GC task. Ticks every `gc_interval_seconds`,
    /// calling back into the index and store through their normal APIs —
    /// it never holds a lock externally across a suspension point.
    pub fn spawn_background(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.gc_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(e) = self.gc_tick().await {
                    warn!(error = %e, "GC tick failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CacheKey, Descriptor};
    use crate::platform::Platform;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    async fn new_engine(dir: &TempDir, config: EvictionConfig) -> (Arc<CacheIndex>, Arc<ContentStore>, EvictionEngine) {
        let index = Arc::new(
            CacheIndex::open(dir.path().join("cache.json"), config.default_ttl_seconds, config.max_age_seconds)
                .await
                .unwrap(),
        );
        let store = Arc::new(ContentStore::open(dir.path()).await.unwrap());
        let engine = EvictionEngine::new(config, index.clone(), store.clone());
        (index, store, engine)
    }

    fn key(tag: &str) -> CacheKey {
        CacheKey::new(
            Digest::sha256(format!("op-{tag}").as_bytes()),
            vec![],
            Platform::linux_amd64(),
        )
    }

    async fn put_sized(index: &CacheIndex, tag: &str, size: u64) {
        let now = Utc::now();
        let k = key(tag);
        index
            .put(
                &k,
                Descriptor {
                    media_type: "application/vnd.buildcache.manifest+json".to_string(),
                    digest: Digest::sha256(tag.as_bytes()),
                    size,
                },
                crate::index::CacheMetadata {
                    created_at: now,
                    accessed_at: now,
                    operation_hash: k.operation_digest.clone(),
                    platform: Platform::linux_amd64(),
                    ttl: None,
                    tags: Default::default(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lru_trim_removes_least_recently_accessed() {
        let dir = TempDir::new().unwrap();
        let config = EvictionConfig {
            max_size_bytes: 150,
            policy: EvictionPolicy::Lru,
            ..Default::default()
        };
        let (index, _store, engine) = new_engine(&dir, config).await;

        put_sized(&index, "a", 100).await;
        put_sized(&index, "b", 100).await;
        // Touch "b" so "a" becomes the least-recently-accessed.
        index.get(&key("b")).await.unwrap();

        engine.trim_after_put().await.unwrap();
        let stats = index.statistics("lru").await;
        assert!(stats.total_size <= 150);
        assert!(index.get(&key("b")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fifo_trim_removes_oldest_created() {
        let dir = TempDir::new().unwrap();
        let config = EvictionConfig {
            max_size_bytes: 150,
            policy: EvictionPolicy::Fifo,
            ..Default::default()
        };
        let (index, _store, engine) = new_engine(&dir, config).await;

        put_sized(&index, "first", 100).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        put_sized(&index, "second", 100).await;

        engine.trim_after_put().await.unwrap();
        assert!(index.get(&key("first")).await.unwrap().is_none());
        assert!(index.get(&key("second")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn gc_tick_expires_entries_past_their_ttl() {
        let dir = TempDir::new().unwrap();
        let config = EvictionConfig {
            max_size_bytes: u64::MAX,
            ..Default::default()
        };
        let (index, _store, engine) = new_engine(&dir, config).await;

        let k = key("ttl");
        let metadata = crate::index::CacheMetadata {
            created_at: Utc::now() - ChronoDuration::seconds(10),
            accessed_at: Utc::now() - ChronoDuration::seconds(10),
            operation_hash: k.operation_digest.clone(),
            platform: Platform::linux_amd64(),
            ttl: Some(1),
            tags: Default::default(),
        };
        index
            .put(
                &k,
                Descriptor {
                    media_type: "application/vnd.buildcache.manifest+json".to_string(),
                    digest: Digest::sha256(b"ttl"),
                    size: 10,
                },
                metadata,
            )
            .await
            .unwrap();

        engine.gc_tick().await.unwrap();
        assert_eq!(index.all_entries().await.len(), 0);
    }

    #[tokio::test]
    async fn arc_adapts_target_size_on_ghost_hit() {
        let mut arc = ArcState::default();
        arc.record_insertion("a", 4);
        arc.record_insertion("b", 4);
        assert_eq!(arc.next_victim().as_deref(), Some("a"));
        // "a" is now a ghost in B1; referencing it again should grow p.
        let before = arc.p;
        arc.record_access("a", 4);
        assert!(arc.p >= before);
    }
}
