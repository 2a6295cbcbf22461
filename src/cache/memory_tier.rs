//! Fast in-process tier.
//!
//! Uses DashMap so lookups of unrelated keys never contend on one lock.
//! Inserts and eviction are serialized by `write_lock` to keep the byte
//! counter consistent with the map.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::entry::{CacheKey, MemoryEntry, Payload};
use super::eviction::{select_victims, Candidate};

pub(crate) enum MemoryLookup {
    Hit(Payload),
    Expired,
    Absent,
}

pub(crate) struct MemoryTier {
    entries: DashMap<CacheKey, MemoryEntry>,
    bytes: AtomicU64,
    budget: u64,
    write_lock: Mutex<()>,
}

impl MemoryTier {
    pub fn new(budget: u64) -> Self {
        Self {
            entries: DashMap::new(),
            bytes: AtomicU64::new(0),
            budget,
            write_lock: Mutex::new(()),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Look up an entry, updating its access bookkeeping on a hit.
    pub fn get(&self, key: &CacheKey, tick: u64) -> MemoryLookup {
        let now = Instant::now();
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return MemoryLookup::Absent;
            };
            if !entry.is_expired(now) {
                entry.access_count += 1;
                entry.last_access = tick;
                return MemoryLookup::Hit(entry.payload.clone());
            }
        }
        // Only drop the entry we judged expired, not a fresh overwrite.
        if let Some((_, old)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
            self.bytes.fetch_sub(old.size, Ordering::AcqRel);
        }
        MemoryLookup::Expired
    }

    /// Insert, evicting down to `target` first if the budget would be exceeded.
    /// Returns the number of entries evicted.
    pub fn insert(&self, key: CacheKey, entry: MemoryEntry, target: u64) -> usize {
        let _guard = self.write_lock.lock();
        self.remove(&key);

        let size = entry.size;
        let evicted = if self.bytes() + size > self.budget {
            self.evict_locked(size, target)
        } else {
            0
        };
        self.bytes.fetch_add(size, Ordering::AcqRel);
        self.entries.insert(key, entry);
        evicted
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some((_, old)) => {
                self.bytes.fetch_sub(old.size, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Evict until the tier holds at most `target` bytes.
    pub fn trim(&self, target: u64) -> usize {
        let _guard = self.write_lock.lock();
        if self.bytes() <= target {
            return 0;
        }
        self.evict_locked(0, target)
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                self.bytes.fetch_sub(entry.size, Ordering::AcqRel);
                purged += 1;
                false
            } else {
                true
            }
        });
        purged
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
        self.bytes.store(0, Ordering::Release);
    }

    fn evict_locked(&self, incoming: u64, target: u64) -> usize {
        let candidates: Vec<Candidate<CacheKey>> = self
            .entries
            .iter()
            .map(|e| Candidate {
                key: e.key().clone(),
                last_access: e.last_access,
                access_count: e.access_count,
                size: e.size,
            })
            .collect();

        let victims = select_victims(candidates, self.bytes(), incoming, target);
        let mut evicted = 0;
        for victim in victims {
            if self.remove(&victim.key) {
                tracing::debug!(key = %victim.key, size = victim.size, "evicted from memory tier");
                evicted += 1;
            }
        }
        evicted
    }
}
