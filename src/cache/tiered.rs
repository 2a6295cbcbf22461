//! Two-tier artifact cache.
//!
//! Small payloads live in memory, large ones on disk. Callers see one
//! get/put interface; placement, expiry, eviction and promotion happen
//! behind it. Storage faults degrade to misses and are never returned.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use super::disk_tier::{DiskLookup, DiskSweep, DiskTier};
use super::entry::{CacheKey, MemoryEntry, Payload, Tier};
use super::error::CacheError;
use super::eviction::watermark_bytes;
use super::memory_tier::{MemoryLookup, MemoryTier};
use crate::telemetry;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;
const KEY_STRIPES: usize = 64;

/// Configuration for the tiered cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Memory tier budget (bytes).
    pub memory_budget: u64,
    /// Disk tier budget (bytes).
    pub disk_budget: u64,
    /// Payloads at or above this size go to disk.
    pub disk_threshold: u64,
    /// Disk entries accessed more than this many times are promoted.
    pub promotion_threshold: u64,
    /// Only disk entries smaller than this are promoted.
    pub promotion_max_size: u64,
    /// Share of a tier's budget to evict down to.
    pub eviction_watermark: f64,
    /// Root directory of the disk tier.
    pub disk_root: PathBuf,
    /// TTL for namespaces without an explicit entry.
    pub default_ttl: Duration,
    /// Per-namespace default TTLs.
    pub namespace_ttls: HashMap<String, Duration>,
    /// Period of the maintenance sweep.
    pub maintenance_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_budget: 512 * MIB,
            disk_budget: 5 * GIB,
            disk_threshold: 10 * MIB,
            promotion_threshold: 5,
            promotion_max_size: 50 * MIB,
            eviction_watermark: 0.8,
            disk_root: PathBuf::from("cache"),
            default_ttl: Duration::from_secs(3600),
            namespace_ttls: default_namespace_ttls(),
            maintenance_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl CacheConfig {
    /// Default config rooted at `disk_root`.
    pub fn with_root(disk_root: impl Into<PathBuf>) -> Self {
        Self {
            disk_root: disk_root.into(),
            ..Self::default()
        }
    }

    /// TTL for `namespace`, falling back to the default.
    pub fn ttl_for(&self, namespace: &str) -> Duration {
        self.namespace_ttls
            .get(namespace)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

/// Built-in TTLs for the namespaces used by the wrappers.
pub fn default_namespace_ttls() -> HashMap<String, Duration> {
    use super::namespaces::{COMPILED_OUTPUTS, PARSED_DOCUMENTS, SEARCH_RESULTS};
    HashMap::from([
        (PARSED_DOCUMENTS.to_string(), Duration::from_secs(24 * 3600)),
        (SEARCH_RESULTS.to_string(), Duration::from_secs(3600)),
        (COMPILED_OUTPUTS.to_string(), Duration::from_secs(6 * 3600)),
    ])
}

/// Point-in-time cache diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_bytes: u64,
    pub memory_entries: usize,
    pub memory_budget: u64,
    pub disk_bytes: u64,
    pub disk_entries: usize,
    pub disk_budget: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub expirations: u64,
    pub corrupt_records: u64,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub memory_expired: usize,
    pub disk: DiskSweep,
}

impl MaintenanceReport {
    pub fn cleaned(&self) -> usize {
        self.memory_expired + self.disk.cleaned()
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    expirations: AtomicU64,
    corrupt: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.evictions,
            &self.promotions,
            &self.expirations,
            &self.corrupt,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

struct CacheInner {
    config: CacheConfig,
    memory: MemoryTier,
    disk: DiskTier,
    clock: AtomicU64,
    counters: Counters,
    /// Serializes operations that move a key between tiers.
    key_locks: Box<[Mutex<()>]>,
}

/// Memoizes artifacts across a memory tier and a disk tier.
///
/// Cheap to clone; clones share the same tiers.
#[derive(Clone)]
pub struct TieredCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("disk_root", &self.inner.config.disk_root)
            .field("memory_bytes", &self.inner.memory.bytes())
            .field("disk_bytes", &self.inner.disk.bytes())
            .finish()
    }
}

impl TieredCache {
    /// Open the cache, adopting any records already under the disk root.
    pub fn open(config: CacheConfig) -> Self {
        let clock = AtomicU64::new(1);
        let disk = DiskTier::open(config.disk_root.clone(), config.disk_budget, &clock);
        Self::assemble(config, disk, clock)
    }

    /// Open for reporting only: stale disk files are counted out but kept.
    ///
    /// Nothing under the disk root is deleted or created by opening. Writes
    /// and maintenance on the returned cache still mutate storage.
    pub fn inspect(config: CacheConfig) -> Self {
        let clock = AtomicU64::new(1);
        let disk = DiskTier::inspect(config.disk_root.clone(), config.disk_budget, &clock);
        Self::assemble(config, disk, clock)
    }

    fn assemble(config: CacheConfig, disk: DiskTier, clock: AtomicU64) -> Self {
        let memory = MemoryTier::new(config.memory_budget);
        Self {
            inner: Arc::new(CacheInner {
                config,
                memory,
                disk,
                clock,
                counters: Counters::default(),
                key_locks: (0..KEY_STRIPES).map(|_| Mutex::new(())).collect(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn disk_root(&self) -> &Path {
        self.inner.disk.root()
    }

    fn lock_key(&self, key: &CacheKey) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.inner.key_locks.len();
        self.inner.key_locks[stripe].lock()
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn target(&self, budget: u64) -> u64 {
        watermark_bytes(budget, self.inner.config.eviction_watermark)
    }

    /// Tier a payload of `size` bytes is written to.
    pub fn placement(&self, size: u64) -> Tier {
        let config = &self.inner.config;
        if size >= config.disk_threshold || size > config.memory_budget {
            Tier::Disk
        } else {
            Tier::Memory
        }
    }

    /// Store `payload`, replacing any existing entry for the key in either tier.
    ///
    /// Returns the tier chosen. A failed disk write is logged and leaves the
    /// key absent; only an invalid namespace or key is an error.
    pub fn put(
        &self,
        namespace: &str,
        key: &str,
        payload: impl Into<Payload>,
        ttl: Duration,
    ) -> Result<Tier, CacheError> {
        let cache_key = CacheKey::new(namespace, key)?;
        let payload: Payload = payload.into();
        let size = payload.len() as u64;
        let tier = self.placement(size);
        let _key_guard = self.lock_key(&cache_key);
        let tick = self.tick();

        match tier {
            Tier::Memory => {
                self.inner.disk.remove(&cache_key);
                let target = self.target(self.inner.memory.budget());
                let evicted = self
                    .inner
                    .memory
                    .insert(cache_key, MemoryEntry::new(payload, ttl, tick), target);
                self.record_evictions(Tier::Memory, evicted);
            }
            Tier::Disk => {
                self.inner.memory.remove(&cache_key);
                if size > self.inner.disk.budget() {
                    self.inner.disk.remove(&cache_key);
                    tracing::warn!(key = %cache_key, size, budget = self.inner.disk.budget(), "payload exceeds disk tier budget; not cached");
                    return Ok(tier);
                }
                let target = self.target(self.inner.disk.budget());
                match self.inner.disk.insert(cache_key.clone(), &payload, ttl, tick, target) {
                    Ok(evicted) => self.record_evictions(Tier::Disk, evicted),
                    Err(err) => {
                        tracing::warn!(key = %cache_key, size, error = %err, "disk cache write failed; entry not cached");
                    }
                }
            }
        }
        telemetry::record_cache_tiers(self.inner.memory.bytes(), self.inner.disk.bytes());
        Ok(tier)
    }

    /// Store with the namespace's default TTL.
    pub fn put_default(
        &self,
        namespace: &str,
        key: &str,
        payload: impl Into<Payload>,
    ) -> Result<Tier, CacheError> {
        let ttl = self.inner.config.ttl_for(namespace);
        self.put(namespace, key, payload, ttl)
    }

    /// Look up an entry, memory tier first. Never fails; faults read as misses.
    pub fn get(&self, namespace: &str, key: &str) -> Option<Payload> {
        let Ok(cache_key) = CacheKey::new(namespace, key) else {
            tracing::debug!(namespace, "lookup with malformed key treated as miss");
            self.record_miss(namespace);
            return None;
        };
        let tick = self.tick();

        match self.inner.memory.get(&cache_key, tick) {
            MemoryLookup::Hit(payload) => {
                self.record_hit(namespace);
                return Some(payload);
            }
            MemoryLookup::Expired => {
                self.inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
            }
            MemoryLookup::Absent => {}
        }

        let _key_guard = self.lock_key(&cache_key);
        match self.inner.disk.get(&cache_key, tick) {
            DiskLookup::Hit(hit) => {
                self.record_hit(namespace);
                let config = &self.inner.config;
                if hit.access_count > config.promotion_threshold
                    && hit.size < config.promotion_max_size
                    && hit.size <= self.inner.memory.budget()
                {
                    let entry = MemoryEntry::promoted(
                        hit.payload.clone(),
                        hit.age,
                        hit.ttl,
                        hit.access_count,
                        tick,
                    );
                    let target = self.target(self.inner.memory.budget());
                    let evicted = self.inner.memory.insert(cache_key.clone(), entry, target);
                    self.record_evictions(Tier::Memory, evicted);
                    self.inner.counters.promotions.fetch_add(1, Ordering::Relaxed);
                    telemetry::record_cache_promotion();
                    tracing::debug!(key = %cache_key, size = hit.size, accesses = hit.access_count, "promoted disk entry to memory");
                }
                Some(hit.payload)
            }
            DiskLookup::Expired => {
                self.inner.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.record_miss(namespace);
                None
            }
            DiskLookup::Corrupt => {
                self.inner.counters.corrupt.fetch_add(1, Ordering::Relaxed);
                self.record_miss(namespace);
                None
            }
            DiskLookup::Absent => {
                self.record_miss(namespace);
                None
            }
        }
    }

    /// Return the cached payload or compute, store and return it.
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<Payload, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, E>>,
        E: From<CacheError>,
    {
        CacheKey::new(namespace, key)?;
        if let Some(payload) = self.get(namespace, key) {
            return Ok(payload);
        }
        let payload: Payload = compute().await?.into();
        self.put(namespace, key, payload.clone(), ttl)?;
        Ok(payload)
    }

    /// Remove the entry from whichever tier holds it. Idempotent.
    pub fn invalidate(&self, namespace: &str, key: &str) -> bool {
        let Ok(cache_key) = CacheKey::new(namespace, key) else {
            return false;
        };
        let _key_guard = self.lock_key(&cache_key);
        let in_memory = self.inner.memory.remove(&cache_key);
        let on_disk = self.inner.disk.remove(&cache_key);
        in_memory || on_disk
    }

    /// Empty both tiers and reset all counters.
    pub fn clear(&self) {
        self.inner.memory.clear();
        self.inner.disk.clear();
        self.inner.counters.reset();
        telemetry::record_cache_tiers(0, 0);
        tracing::info!(root = %self.disk_root().display(), "cache cleared");
    }

    /// Tier currently serving the key. Memory wins when both hold a copy.
    pub fn tier_of(&self, namespace: &str, key: &str) -> Option<Tier> {
        let cache_key = CacheKey::new(namespace, key).ok()?;
        if self.inner.memory.contains(&cache_key) {
            Some(Tier::Memory)
        } else if self.inner.disk.contains(&cache_key) {
            Some(Tier::Disk)
        } else {
            None
        }
    }

    /// Evict the memory tier down to its watermark.
    pub fn trim_memory(&self) -> usize {
        let target = self.target(self.inner.memory.budget());
        let evicted = self.inner.memory.trim(target);
        self.record_evictions(Tier::Memory, evicted);
        evicted
    }

    /// Purge expired memory entries and reconcile the disk tier with storage.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let memory_expired = self.inner.memory.purge_expired();
        let disk = self.inner.disk.sweep();
        let report = MaintenanceReport { memory_expired, disk };
        self.inner
            .counters
            .expirations
            .fetch_add((memory_expired + disk.expired) as u64, Ordering::Relaxed);
        self.inner
            .counters
            .corrupt
            .fetch_add(disk.corrupt as u64, Ordering::Relaxed);
        telemetry::record_cache_tiers(self.inner.memory.bytes(), self.inner.disk.bytes());
        tracing::info!(
            cleaned = report.cleaned(),
            memory_expired,
            disk_expired = disk.expired,
            disk_corrupt = disk.corrupt,
            disk_orphaned = disk.orphaned,
            disk_missing = disk.missing,
            disk_bytes = disk.tracked_bytes,
            "cache maintenance complete"
        );
        report
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            memory_bytes: self.inner.memory.bytes(),
            memory_entries: self.inner.memory.len(),
            memory_budget: self.inner.memory.budget(),
            disk_bytes: self.inner.disk.bytes(),
            disk_entries: self.inner.disk.len(),
            disk_budget: self.inner.disk.budget(),
            evictions: c.evictions.load(Ordering::Relaxed),
            promotions: c.promotions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            corrupt_records: c.corrupt.load(Ordering::Relaxed),
        }
    }

    fn record_hit(&self, namespace: &str) {
        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        telemetry::record_cache_lookup(namespace, true);
    }

    fn record_miss(&self, namespace: &str) {
        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        telemetry::record_cache_lookup(namespace, false);
    }

    fn record_evictions(&self, tier: Tier, evicted: usize) {
        if evicted == 0 {
            return;
        }
        self.inner
            .counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        telemetry::record_cache_eviction(tier, evicted);
    }
}
