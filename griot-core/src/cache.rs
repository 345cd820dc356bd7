//! Two-tier story cache with strict first-in-first-out eviction.
//!
//! Stories and branch sets live in independent tiers, each a bounded queue
//! ordered purely by insertion. Reads never reorder anything: an entry's
//! lifetime is decided the moment it goes in, so a hot key still ages out
//! on schedule and the tier never degenerates into an accidental LRU.
//!
//! Every memory insertion is mirrored to an optional [`BlobStore`] as a
//! versioned JSON envelope plus a lightweight metadata sidecar. Durable
//! writes are best-effort: failures are logged and the caller never sees
//! them. On a memory miss the durable copy is promoted back in as a brand
//! new insertion with its original `stored_at` preserved.

use crate::artifact::{BranchStub, StoryArtifact};
use crate::request::CacheKey;
use crate::storage::{sanitize_key_component, BlobStore, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Version stamp embedded in every durable cache entry. Entries written by
/// an incompatible build are treated as misses rather than half-decoded.
pub const STORE_VERSION: u32 = 1;

/// Default capacity of the story tier.
pub const DEFAULT_MAX_STORIES: usize = 20;

/// Default capacity of the branch-set tier.
pub const DEFAULT_MAX_BRANCH_SETS: usize = 10;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Most story artifacts held in memory before eviction.
    pub max_story_entries: usize,
    /// Most branch sets held in memory before eviction.
    pub max_branch_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_story_entries: DEFAULT_MAX_STORIES,
            max_branch_entries: DEFAULT_MAX_BRANCH_SETS,
        }
    }
}

impl CacheConfig {
    pub fn with_max_story_entries(mut self, max: usize) -> Self {
        self.max_story_entries = max;
        self
    }

    pub fn with_max_branch_entries(mut self, max: usize) -> Self {
        self.max_branch_entries = max;
        self
    }
}

// ============================================================================
// Payloads and tiers
// ============================================================================

/// What a cache entry holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum CachedPayload {
    Story(StoryArtifact),
    Branches(Vec<BranchStub>),
}

impl CachedPayload {
    pub fn into_story(self) -> Option<StoryArtifact> {
        match self {
            CachedPayload::Story(artifact) => Some(artifact),
            CachedPayload::Branches(_) => None,
        }
    }

    pub fn into_branches(self) -> Option<Vec<BranchStub>> {
        match self {
            CachedPayload::Branches(stubs) => Some(stubs),
            CachedPayload::Story(_) => None,
        }
    }
}

/// The two independent cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Stories,
    BranchSets,
}

impl CacheTier {
    /// Namespace prefix for durable keys in this tier.
    fn namespace(&self) -> &'static str {
        match self {
            CacheTier::Stories => "story",
            CacheTier::BranchSets => "branches",
        }
    }
}

/// Which layer satisfied a cache read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitLayer {
    Memory,
    Durable,
}

/// Running counters for cache behavior. Hits include durable promotions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Durable envelope
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    stored_at: DateTime<Utc>,
    /// The original cache key. Sanitized file names can collide, so the
    /// envelope records the true key and reads verify it.
    cache_key: String,
    payload: CachedPayload,
}

/// Sidecar written next to each payload so housekeeping scans read a few
/// bytes per entry instead of whole artifacts.
#[derive(Debug, Serialize, Deserialize)]
struct StoredMeta {
    version: u32,
    stored_at: DateTime<Utc>,
    cache_key: String,
}

fn payload_key(tier: CacheTier, digest: &str) -> String {
    format!("{}/{}", tier.namespace(), sanitize_key_component(digest))
}

fn meta_key(tier: CacheTier, digest: &str) -> String {
    format!("meta/{}/{}", tier.namespace(), sanitize_key_component(digest))
}

fn decode_entry(bytes: &[u8]) -> Result<StoredEntry, StorageError> {
    let entry: StoredEntry = serde_json::from_slice(bytes)?;
    if entry.version != STORE_VERSION {
        return Err(StorageError::VersionMismatch {
            expected: STORE_VERSION,
            found: entry.version,
        });
    }
    Ok(entry)
}

fn decode_meta(bytes: &[u8]) -> Result<StoredMeta, StorageError> {
    let meta: StoredMeta = serde_json::from_slice(bytes)?;
    if meta.version != STORE_VERSION {
        return Err(StorageError::VersionMismatch {
            expected: STORE_VERSION,
            found: meta.version,
        });
    }
    Ok(meta)
}

// ============================================================================
// Memory tier
// ============================================================================

struct MemoryEntry {
    payload: CachedPayload,
    stored_at: DateTime<Utc>,
}

/// Bounded insertion-ordered map. `order` and `entries` always hold the
/// same key set; the queue front is the oldest insertion.
struct FifoTier {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, MemoryEntry>,
}

impl FifoTier {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&self, digest: &str) -> Option<&MemoryEntry> {
        self.entries.get(digest)
    }

    /// Insert an entry, returning the digest of whatever was evicted to
    /// make room. Overwriting a present key keeps its original queue
    /// position: age runs from first insertion.
    fn insert(
        &mut self,
        digest: String,
        payload: CachedPayload,
        stored_at: DateTime<Utc>,
    ) -> Option<String> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(existing) = self.entries.get_mut(&digest) {
            existing.payload = payload;
            existing.stored_at = stored_at;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        self.order.push_back(digest.clone());
        self.entries.insert(digest, MemoryEntry { payload, stored_at });
        evicted
    }

    fn purge_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stored_at >= cutoff);
        self.order.retain(|digest| self.entries.contains_key(digest));
        before - self.entries.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// Story cache
// ============================================================================

struct CacheState {
    stories: FifoTier,
    branch_sets: FifoTier,
    stats: CacheStats,
}

impl CacheState {
    fn tier_mut(&mut self, tier: CacheTier) -> &mut FifoTier {
        match tier {
            CacheTier::Stories => &mut self.stories,
            CacheTier::BranchSets => &mut self.branch_sets,
        }
    }
}

/// Two-tier FIFO cache for stories and branch sets, with an optional
/// durable second layer.
pub struct StoryCache {
    store: Option<Arc<dyn BlobStore>>,
    state: Mutex<CacheState>,
}

impl StoryCache {
    /// Memory-only cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            store: None,
            state: Mutex::new(CacheState {
                stories: FifoTier::new(config.max_story_entries),
                branch_sets: FifoTier::new(config.max_branch_entries),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Attach a durable layer. Every insertion is mirrored there and memory
    /// misses fall through to it.
    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn get_story(&self, key: &CacheKey) -> Option<(StoryArtifact, HitLayer)> {
        let (payload, layer) = self.get_inner(key, CacheTier::Stories).await?;
        Some((payload.into_story()?, layer))
    }

    pub async fn get_branches(&self, key: &CacheKey) -> Option<(Vec<BranchStub>, HitLayer)> {
        let (payload, layer) = self.get_inner(key, CacheTier::BranchSets).await?;
        Some((payload.into_branches()?, layer))
    }

    pub async fn put_story(&self, key: &CacheKey, artifact: StoryArtifact) {
        self.put_inner(key, CacheTier::Stories, CachedPayload::Story(artifact))
            .await;
    }

    pub async fn put_branches(&self, key: &CacheKey, stubs: Vec<BranchStub>) {
        self.put_inner(key, CacheTier::BranchSets, CachedPayload::Branches(stubs))
            .await;
    }

    async fn get_inner(&self, key: &CacheKey, tier: CacheTier) -> Option<(CachedPayload, HitLayer)> {
        let digest = key.as_str();

        {
            let mut state = self.state.lock().await;
            if let Some(entry) = state.tier_mut(tier).get(digest) {
                let payload = entry.payload.clone();
                state.stats.hits += 1;
                debug!(key = %digest, layer = "memory", "Cache hit");
                return Some((payload, HitLayer::Memory));
            }
        }

        // Memory miss. Try the durable layer without holding the lock.
        if let Some(entry) = self.durable_get(tier, digest).await {
            let payload = entry.payload.clone();
            let mut state = self.state.lock().await;
            let evicted = state
                .tier_mut(tier)
                .insert(digest.to_string(), entry.payload, entry.stored_at);
            if evicted.is_some() {
                state.stats.evictions += 1;
            }
            state.stats.hits += 1;
            debug!(key = %digest, layer = "durable", "Cache hit promoted to memory");
            return Some((payload, HitLayer::Durable));
        }

        let mut state = self.state.lock().await;
        state.stats.misses += 1;
        debug!(key = %digest, "Cache miss");
        None
    }

    async fn durable_get(&self, tier: CacheTier, digest: &str) -> Option<StoredEntry> {
        let store = self.store.as_ref()?;
        let bytes = match store.get(&payload_key(tier, digest)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %digest, error = %e, "Durable cache read failed");
                return None;
            }
        };
        match decode_entry(&bytes) {
            Ok(entry) if entry.cache_key == digest => Some(entry),
            Ok(entry) => {
                warn!(
                    key = %digest,
                    stored_key = %entry.cache_key,
                    "Durable entry belongs to a different key"
                );
                None
            }
            Err(e) => {
                warn!(key = %digest, error = %e, "Durable entry unreadable");
                None
            }
        }
    }

    async fn put_inner(&self, key: &CacheKey, tier: CacheTier, payload: CachedPayload) {
        let digest = key.as_str();
        let stored_at = Utc::now();

        {
            let mut state = self.state.lock().await;
            let evicted = state
                .tier_mut(tier)
                .insert(digest.to_string(), payload.clone(), stored_at);
            if let Some(old) = evicted {
                state.stats.evictions += 1;
                debug!(evicted_key = %old, "Cache tier full, evicted oldest entry");
            }
        }

        if let Some(store) = &self.store {
            if let Err(e) = self
                .durable_put(store.as_ref(), tier, digest, payload, stored_at)
                .await
            {
                warn!(key = %digest, error = %e, "Durable cache write failed");
            }
        }
    }

    async fn durable_put(
        &self,
        store: &dyn BlobStore,
        tier: CacheTier,
        digest: &str,
        payload: CachedPayload,
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let entry = StoredEntry {
            version: STORE_VERSION,
            stored_at,
            cache_key: digest.to_string(),
            payload,
        };
        let meta = StoredMeta {
            version: STORE_VERSION,
            stored_at,
            cache_key: digest.to_string(),
        };
        store
            .put(&payload_key(tier, digest), &serde_json::to_vec_pretty(&entry)?)
            .await?;
        store
            .put(&meta_key(tier, digest), &serde_json::to_vec_pretty(&meta)?)
            .await?;
        Ok(())
    }

    /// Drop every entry stored before `cutoff` from both layers. Returns
    /// the number of removals, counted per layer.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = {
            let mut state = self.state.lock().await;
            state.stories.purge_older_than(cutoff) + state.branch_sets.purge_older_than(cutoff)
        };

        if let Some(store) = &self.store {
            removed += self.durable_purge(store.as_ref(), cutoff).await;
        }

        if removed > 0 {
            debug!(removed, "Purged aged cache entries");
        }
        removed
    }

    async fn durable_purge(&self, store: &dyn BlobStore, cutoff: DateTime<Utc>) -> usize {
        let meta_keys = match store.list_keys("meta/").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Durable cache scan failed");
                return 0;
            }
        };

        let mut removed = 0;
        for meta_key in meta_keys {
            let Some(payload_key) = meta_key.strip_prefix("meta/") else {
                continue;
            };
            let expired = match store.get(&meta_key).await {
                Ok(Some(bytes)) => match decode_meta(&bytes) {
                    Ok(meta) => meta.stored_at < cutoff,
                    // An unreadable sidecar means the entry can never be
                    // served again, so reclaim it.
                    Err(e) => {
                        warn!(key = %meta_key, error = %e, "Reclaiming unreadable cache entry");
                        true
                    }
                },
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %meta_key, error = %e, "Durable cache read failed");
                    continue;
                }
            };
            if !expired {
                continue;
            }
            if let Err(e) = store.delete(payload_key).await {
                warn!(key = %payload_key, error = %e, "Durable cache delete failed");
                continue;
            }
            if let Err(e) = store.delete(&meta_key).await {
                warn!(key = %meta_key, error = %e, "Durable cache delete failed");
                continue;
            }
            removed += 1;
        }
        removed
    }

    /// Empty both tiers and the durable layer. Stats are preserved.
    pub async fn clear(&self) {
        {
            let mut state = self.state.lock().await;
            state.stories.clear();
            state.branch_sets.clear();
        }

        if let Some(store) = &self.store {
            match store.list_keys("").await {
                Ok(keys) => {
                    for key in keys {
                        if let Err(e) = store.delete(&key).await {
                            warn!(key = %key, error = %e, "Durable cache delete failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Durable cache scan failed"),
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats
    }

    pub async fn story_count(&self) -> usize {
        self.state.lock().await.stories.len()
    }

    pub async fn branch_count(&self) -> usize {
        self.state.lock().await.branch_sets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::StoryBlock;
    use crate::request::StoryRequest;
    use crate::testing::FailingBlobStore;
    use crate::storage::FsBlobStore;
    use chrono::Duration;
    use tempfile::TempDir;

    fn artifact(title: &str) -> StoryArtifact {
        StoryArtifact {
            id: crate::artifact::StoryId::new(),
            title: title.to_string(),
            theme: "loops".to_string(),
            region: "general".to_string(),
            character_name: "Amara".to_string(),
            blocks: vec![StoryBlock::text("Once there was a patient weaver.")],
            challenge: None,
            branches: None,
            cultural_notes: HashMap::new(),
            concepts_covered: vec!["loops".to_string()],
            created_at: Utc::now(),
        }
    }

    fn key(concept: &str) -> CacheKey {
        StoryRequest::fresh(vec![concept.to_string()], crate::request::SkillLevel::Beginner)
            .cache_key()
    }

    #[tokio::test]
    async fn put_then_get_hits_memory() {
        let cache = StoryCache::new(CacheConfig::default());
        let k = key("loops");
        cache.put_story(&k, artifact("The Weaver")).await;

        let (hit, layer) = cache.get_story(&k).await.unwrap();
        assert_eq!(hit.title, "The Weaver");
        assert_eq!(layer, HitLayer::Memory);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn oldest_entry_is_evicted_at_capacity() {
        let config = CacheConfig::default().with_max_story_entries(3);
        let cache = StoryCache::new(config);

        for concept in ["a", "b", "c", "d"] {
            cache.put_story(&key(concept), artifact(concept)).await;
        }

        assert!(cache.get_story(&key("a")).await.is_none());
        assert!(cache.get_story(&key("b")).await.is_some());
        assert!(cache.get_story(&key("d")).await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
        assert_eq!(cache.story_count().await, 3);
    }

    #[tokio::test]
    async fn reads_do_not_protect_entries_from_eviction() {
        let config = CacheConfig::default().with_max_story_entries(2);
        let cache = StoryCache::new(config);

        cache.put_story(&key("a"), artifact("a")).await;
        cache.put_story(&key("b"), artifact("b")).await;

        // A read of the oldest entry must not refresh its position.
        assert!(cache.get_story(&key("a")).await.is_some());
        cache.put_story(&key("c"), artifact("c")).await;

        assert!(cache.get_story(&key("a")).await.is_none());
        assert!(cache.get_story(&key("b")).await.is_some());
        assert!(cache.get_story(&key("c")).await.is_some());
    }

    #[tokio::test]
    async fn overwriting_a_key_keeps_its_queue_position() {
        let config = CacheConfig::default().with_max_story_entries(2);
        let cache = StoryCache::new(config);

        cache.put_story(&key("a"), artifact("first draft")).await;
        cache.put_story(&key("b"), artifact("b")).await;
        cache.put_story(&key("a"), artifact("second draft")).await;
        cache.put_story(&key("c"), artifact("c")).await;

        // "a" was still the oldest insertion, so it went first.
        assert!(cache.get_story(&key("a")).await.is_none());
        let (b, _) = cache.get_story(&key("b")).await.unwrap();
        assert_eq!(b.title, "b");
    }

    #[tokio::test]
    async fn branch_tier_capacity_is_independent() {
        let config = CacheConfig::default()
            .with_max_story_entries(10)
            .with_max_branch_entries(1);
        let cache = StoryCache::new(config);

        cache.put_story(&key("story"), artifact("story")).await;
        cache.put_branches(&key("x"), Vec::new()).await;
        cache.put_branches(&key("y"), Vec::new()).await;

        assert!(cache.get_branches(&key("x")).await.is_none());
        assert!(cache.get_branches(&key("y")).await.is_some());
        assert!(cache.get_story(&key("story")).await.is_some());
        assert_eq!(cache.branch_count().await, 1);
    }

    #[tokio::test]
    async fn evicted_entries_are_promoted_back_from_durable() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(FsBlobStore::new(dir.path()));
        let config = CacheConfig::default().with_max_story_entries(1);
        let cache = StoryCache::new(config).with_store(store);

        cache.put_story(&key("a"), artifact("a")).await;
        cache.put_story(&key("b"), artifact("b")).await;

        // "a" fell out of memory but survives durably.
        let (hit, layer) = cache.get_story(&key("a")).await.unwrap();
        assert_eq!(hit.title, "a");
        assert_eq!(layer, HitLayer::Durable);

        // Promotion made it a fresh memory insertion.
        let (_, layer) = cache.get_story(&key("a")).await.unwrap();
        assert_eq!(layer, HitLayer::Memory);
    }

    #[tokio::test]
    async fn durable_write_failure_is_not_surfaced() {
        let cache =
            StoryCache::new(CacheConfig::default()).with_store(Arc::new(FailingBlobStore));

        let k = key("loops");
        cache.put_story(&k, artifact("still cached")).await;

        let (hit, layer) = cache.get_story(&k).await.unwrap();
        assert_eq!(hit.title, "still cached");
        assert_eq!(layer, HitLayer::Memory);
    }

    #[tokio::test]
    async fn purge_removes_aged_entries_from_both_layers() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
        let cache = StoryCache::new(CacheConfig::default()).with_store(Arc::clone(&store));

        cache.put_story(&key("old"), artifact("old")).await;

        let removed = cache
            .purge_older_than(Utc::now() + Duration::minutes(1))
            .await;
        assert!(removed >= 1);
        assert!(cache.get_story(&key("old")).await.is_none());
        assert!(store.list_keys("story/").await.unwrap().is_empty());
        assert!(store.list_keys("meta/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_keeps_entries_newer_than_cutoff() {
        let cache = StoryCache::new(CacheConfig::default());
        cache.put_story(&key("fresh"), artifact("fresh")).await;

        let removed = cache
            .purge_older_than(Utc::now() - Duration::minutes(5))
            .await;
        assert_eq!(removed, 0);
        assert!(cache.get_story(&key("fresh")).await.is_some());
    }

    #[tokio::test]
    async fn clear_empties_both_tiers_and_durable_layer() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
        let cache = StoryCache::new(CacheConfig::default()).with_store(Arc::clone(&store));

        cache.put_story(&key("s"), artifact("s")).await;
        cache.put_branches(&key("b"), Vec::new()).await;
        cache.clear().await;

        assert!(cache.get_story(&key("s")).await.is_none());
        assert!(cache.get_branches(&key("b")).await.is_none());
        assert_eq!(cache.story_count().await, 0);
        assert!(store.list_keys("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn incompatible_durable_version_is_a_miss() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
        let cache = StoryCache::new(CacheConfig::default()).with_store(Arc::clone(&store));

        let k = key("versioned");
        let stale = serde_json::json!({
            "version": STORE_VERSION + 1,
            "stored_at": Utc::now(),
            "cache_key": k.as_str(),
            "payload": { "kind": "branches", "content": [] },
        });
        store
            .put(
                &payload_key(CacheTier::Stories, k.as_str()),
                stale.to_string().as_bytes(),
            )
            .await
            .unwrap();

        assert!(cache.get_story(&k).await.is_none());
        assert_eq!(cache.stats().await.misses, 1);
    }
}
