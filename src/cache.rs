//! Tiered request/image cache.
//!
//! Three independent tiers — API (network-first), Image and Static (both
//! cache-first) — each with its own TTL and entry capacity. Entries expire
//! lazily on read and are evicted eagerly by a maintenance pass that runs at
//! construction and after every write-through. Eviction is FIFO by insertion
//! order, not LRU: reads do not promote an entry, so callers must not assume
//! recency-based retention.
//!
//! Cache errors never escape this module as failures except in one case:
//! a network-first read whose fetch failed and which has no usable cached
//! fallback surfaces the network error to the caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::store::{DurableStore, KEY_CACHE_PREFIX};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The three cache tiers. Each owns one durable-store namespace
/// (`cache:<name>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Api,
    Image,
    Static,
}

impl TierKind {
    pub fn name(self) -> &'static str {
        match self {
            TierKind::Api => "api",
            TierKind::Image => "image",
            TierKind::Static => "static",
        }
    }

    fn store_key(self) -> String {
        format!("{KEY_CACHE_PREFIX}{}", self.name())
    }
}

/// How a tier answers reads: freshness-first or availability-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Always fetch; fall back to a non-expired cached entry on failure.
    NetworkFirst,
    /// Serve a non-expired cached entry without a network call; fetch only
    /// on miss, degrading to `None` when the fetch fails.
    CacheFirst,
}

#[derive(Debug, Clone)]
pub struct TierConfig {
    pub max_age: ChronoDuration,
    pub max_entries: usize,
    pub strategy: ReadStrategy,
}

impl TierConfig {
    /// API responses: fresh-leaning, 30 minutes, 100 entries.
    pub fn api() -> Self {
        Self {
            max_age: ChronoDuration::minutes(30),
            max_entries: 100,
            strategy: ReadStrategy::NetworkFirst,
        }
    }

    /// Images: availability-leaning, 24 hours, 200 entries.
    pub fn image() -> Self {
        Self {
            max_age: ChronoDuration::hours(24),
            max_entries: 200,
            strategy: ReadStrategy::CacheFirst,
        }
    }

    /// Static assets: 7 days, 50 entries.
    pub fn static_assets() -> Self {
        Self {
            max_age: ChronoDuration::days(7),
            max_entries: 50,
            strategy: ReadStrategy::CacheFirst,
        }
    }
}

/// Per-tier configuration bundle, overridable by the embedder.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub api: TierConfig,
    pub image: TierConfig,
    pub static_assets: TierConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            api: TierConfig::api(),
            image: TierConfig::image(),
            static_assets: TierConfig::static_assets(),
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch collaborator
// ---------------------------------------------------------------------------

/// Network fetch contract used to fill cache tiers. Keys are request
/// identities (full URLs in practice).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> CoreResult<Value>;
}

// ---------------------------------------------------------------------------
// Tier state
// ---------------------------------------------------------------------------

/// One cached payload. Entries are ordered by insertion within their tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

struct Tier {
    kind: TierKind,
    config: TierConfig,
    entries: Vec<CacheEntry>,
}

impl Tier {
    fn is_expired(&self, entry: &CacheEntry) -> bool {
        Utc::now() - entry.timestamp > self.config.max_age
    }

    /// Non-expired lookup. An entry found past its max age counts as a miss
    /// and is deleted as a side effect, forcing a refetch.
    fn lookup(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|e| e.key == key)?;
        if self.is_expired(&self.entries[idx]) {
            debug!(tier = self.kind.name(), key, "expired entry dropped on read");
            self.entries.remove(idx);
            return None;
        }
        Some(self.entries[idx].data.clone())
    }

    /// Write-through. Rewriting an existing key re-inserts it at the back,
    /// so a refreshed entry is no longer first in line for eviction.
    fn insert(&mut self, key: &str, data: Value) {
        self.entries.retain(|e| e.key != key);
        self.entries.push(CacheEntry {
            key: key.to_string(),
            data,
            timestamp: Utc::now(),
        });
        self.maintain();
    }

    /// Remove expired entries, then evict oldest-inserted entries until the
    /// tier is at or under capacity. Returns how many entries were removed.
    fn maintain(&mut self) -> usize {
        let before = self.entries.len();
        let now = Utc::now();
        let max_age = self.config.max_age;
        self.entries.retain(|e| now - e.timestamp <= max_age);
        while self.entries.len() > self.config.max_entries {
            let evicted = self.entries.remove(0);
            debug!(
                tier = self.kind.name(),
                key = %evicted.key,
                "evicted oldest entry over capacity"
            );
        }
        before - self.entries.len()
    }
}

/// Entry count and age bounds of one tier, for diagnostics surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub tier: &'static str,
    pub entries: usize,
    pub max_entries: usize,
    pub oldest: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Cache manager
// ---------------------------------------------------------------------------

/// Explicit, constructible cache service (no global instance). Each tier is
/// reloaded from its durable namespace at construction and maintained
/// immediately, so stale or over-capacity state left by a previous session
/// is trimmed before the first read.
pub struct CacheManager {
    store: Arc<dyn DurableStore>,
    fetcher: Arc<dyn Fetcher>,
    tiers: [Mutex<Tier>; 3],
    request_timeout: Duration,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn DurableStore>,
        fetcher: Arc<dyn Fetcher>,
        config: CacheConfig,
        request_timeout: Duration,
    ) -> Self {
        let manager = Self {
            tiers: [
                Mutex::new(Self::load_tier(&*store, TierKind::Api, config.api)),
                Mutex::new(Self::load_tier(&*store, TierKind::Image, config.image)),
                Mutex::new(Self::load_tier(
                    &*store,
                    TierKind::Static,
                    config.static_assets,
                )),
            ],
            store,
            fetcher,
            request_timeout,
        };
        manager.maintain();
        manager
    }

    fn load_tier(store: &dyn DurableStore, kind: TierKind, config: TierConfig) -> Tier {
        let entries = match store.get(&kind.store_key()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<CacheEntry>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(tier = kind.name(), "cache tier unreadable, starting empty: {e}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(tier = kind.name(), "cache tier load failed, starting empty: {e}");
                Vec::new()
            }
        };
        Tier {
            kind,
            config,
            entries,
        }
    }

    fn tier(&self, kind: TierKind) -> &Mutex<Tier> {
        match kind {
            TierKind::Api => &self.tiers[0],
            TierKind::Image => &self.tiers[1],
            TierKind::Static => &self.tiers[2],
        }
    }

    /// Read `key` through the tier's configured strategy.
    ///
    /// Cache-first tiers return `Ok(None)` when both the cache misses and
    /// the fetch fails (soft failure; the caller degrades to a placeholder).
    /// Network-first tiers surface the fetch error only when no non-expired
    /// cached fallback exists.
    pub async fn read(&self, kind: TierKind, key: &str) -> CoreResult<Option<Value>> {
        let strategy = {
            let tier = self.tier(kind).lock().expect("cache lock poisoned");
            tier.config.strategy
        };
        match strategy {
            ReadStrategy::CacheFirst => self.read_cache_first(kind, key).await,
            ReadStrategy::NetworkFirst => self.read_network_first(kind, key).await,
        }
    }

    async fn read_cache_first(&self, kind: TierKind, key: &str) -> CoreResult<Option<Value>> {
        if let Some(hit) = self.lookup(kind, key) {
            return Ok(Some(hit));
        }
        match self.fetch_with_timeout(key).await {
            Ok(data) => {
                self.write_through(kind, key, data.clone());
                Ok(Some(data))
            }
            Err(e) => {
                debug!(tier = kind.name(), key, "cache-first fetch failed, degrading to miss: {e}");
                Ok(None)
            }
        }
    }

    async fn read_network_first(&self, kind: TierKind, key: &str) -> CoreResult<Option<Value>> {
        match self.fetch_with_timeout(key).await {
            Ok(data) => {
                self.write_through(kind, key, data.clone());
                Ok(Some(data))
            }
            Err(e) => {
                if let Some(cached) = self.lookup(kind, key) {
                    debug!(tier = kind.name(), key, "fetch failed, serving cached fallback: {e}");
                    return Ok(Some(cached));
                }
                Err(e)
            }
        }
    }

    /// Non-expired cached value for `key`, if any. Expired entries are
    /// dropped as a side effect.
    fn lookup(&self, kind: TierKind, key: &str) -> Option<Value> {
        let mut tier = self.tier(kind).lock().expect("cache lock poisoned");
        let len_before = tier.entries.len();
        let hit = tier.lookup(key);
        if tier.entries.len() != len_before {
            self.persist(&tier);
        }
        hit
    }

    fn write_through(&self, kind: TierKind, key: &str, data: Value) {
        let mut tier = self.tier(kind).lock().expect("cache lock poisoned");
        tier.insert(key, data);
        self.persist(&tier);
    }

    /// Maintenance pass over every tier: drop expired entries, then evict
    /// past-capacity entries oldest-first. Run at construction; may be
    /// re-run periodically by the embedder.
    pub fn maintain(&self) {
        for slot in &self.tiers {
            let mut tier = slot.lock().expect("cache lock poisoned");
            let removed = tier.maintain();
            if removed > 0 {
                debug!(tier = tier.kind.name(), removed, "cache maintenance pass");
                self.persist(&tier);
            }
        }
    }

    /// Delete every tier wholesale (manual cache-reset affordance).
    pub fn clear_all(&self) {
        for slot in &self.tiers {
            let mut tier = slot.lock().expect("cache lock poisoned");
            tier.entries.clear();
            if let Err(e) = self.store.delete(&tier.kind.store_key()) {
                warn!(tier = tier.kind.name(), "cache namespace delete failed: {e}");
            }
        }
    }

    pub fn stats(&self, kind: TierKind) -> TierStats {
        let tier = self.tier(kind).lock().expect("cache lock poisoned");
        TierStats {
            tier: tier.kind.name(),
            entries: tier.entries.len(),
            max_entries: tier.config.max_entries,
            oldest: tier.entries.first().map(|e| e.timestamp),
        }
    }

    fn persist(&self, tier: &Tier) {
        let bytes = match serde_json::to_vec(&tier.entries) {
            Ok(b) => b,
            Err(e) => {
                warn!(tier = tier.kind.name(), "cache tier serialize failed: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(&tier.kind.store_key(), &bytes) {
            warn!(tier = tier.kind.name(), "cache tier persist failed: {e}");
        }
    }

    async fn fetch_with_timeout(&self, url: &str) -> CoreResult<Value> {
        match tokio::time::timeout(self.request_timeout, self.fetcher.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Network(format!(
                "fetch timed out after {:?}: {url}",
                self.request_timeout
            ))),
        }
    }
}
