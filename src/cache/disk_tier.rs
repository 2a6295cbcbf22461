//! Overflow tier backed by flat files under a root directory.
//!
//! The index mirrors what is on disk so lookups and budget accounting never
//! list directories. A maintenance sweep reconciles the two.
//!
//! No index guard is held across file I/O. Access stats live in the index and
//! reach the sidecars on the next sweep. Removal and the sweep's adoption of
//! records are serialized by `write_lock`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::entry::{CacheKey, Payload};
use super::eviction::{select_victims, Candidate};
use super::record::{
    checksum, decode_meta, read_payload, remove_record, verify_payload, write_meta, write_record,
    RecordError, RecordMeta, RecordPaths, META_SUFFIX, PAYLOAD_EXT, RECORD_VERSION,
};

#[derive(Debug, Clone)]
struct DiskEntry {
    meta: RecordMeta,
    last_access: u64,
    /// Access stats changed since the sidecar was written.
    dirty: bool,
}

impl DiskEntry {
    fn new(meta: RecordMeta, last_access: u64) -> Self {
        Self {
            meta,
            last_access,
            dirty: false,
        }
    }
}

pub(crate) struct DiskHit {
    pub payload: Payload,
    pub size: u64,
    pub access_count: u64,
    pub age: Duration,
    pub ttl: Duration,
}

pub(crate) enum DiskLookup {
    Hit(DiskHit),
    Expired,
    Corrupt,
    Absent,
}

/// Outcome of one reconciliation pass over the disk tier.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSweep {
    pub expired: usize,
    pub corrupt: usize,
    pub orphaned: usize,
    /// Index entries whose files had disappeared.
    pub missing: usize,
    pub tracked_bytes: u64,
}

impl DiskSweep {
    pub fn cleaned(&self) -> usize {
        self.expired + self.corrupt + self.orphaned + self.missing
    }
}

enum Scanned {
    Record { paths: RecordPaths, meta: RecordMeta },
    Broken { paths: RecordPaths, error: RecordError },
    Orphan { path: PathBuf },
}

pub(crate) struct DiskTier {
    root: PathBuf,
    index: DashMap<CacheKey, DiskEntry>,
    bytes: AtomicU64,
    budget: u64,
    write_lock: Mutex<()>,
}

impl DiskTier {
    /// Open the tier, adopting valid records already under `root`.
    ///
    /// Recency order of adopted records follows their persisted last access;
    /// `clock` hands out the logical ticks.
    /// Expired, unreadable and orphaned files are deleted.
    pub fn open(root: PathBuf, budget: u64, clock: &AtomicU64) -> Self {
        if let Err(err) = std::fs::create_dir_all(&root) {
            tracing::warn!(root = %root.display(), error = %err, "cannot create disk cache root");
        }
        Self::load(root, budget, clock, true)
    }

    /// Index the valid records under `root` without touching the filesystem.
    pub fn inspect(root: PathBuf, budget: u64, clock: &AtomicU64) -> Self {
        Self::load(root, budget, clock, false)
    }

    fn load(root: PathBuf, budget: u64, clock: &AtomicU64, prune: bool) -> Self {
        let tier = Self {
            root,
            index: DashMap::new(),
            bytes: AtomicU64::new(0),
            budget,
            write_lock: Mutex::new(()),
        };

        let now = Utc::now();
        let mut adopted = Vec::new();
        let mut discarded = 0usize;
        for scanned in scan_root(&tier.root) {
            match scanned {
                Scanned::Record { paths, meta } if !meta.is_expired(now) => match key_of(&meta) {
                    Some(key) => adopted.push((key, meta)),
                    None => {
                        if prune {
                            remove_record(&paths);
                        }
                        discarded += 1;
                    }
                },
                Scanned::Record { paths, .. } | Scanned::Broken { paths, .. } => {
                    if prune {
                        remove_record(&paths);
                    }
                    discarded += 1;
                }
                Scanned::Orphan { path } => {
                    if prune {
                        remove_file_logged(&path);
                    }
                    discarded += 1;
                }
            }
        }

        adopted.sort_by_key(|(_, meta)| meta.last_access_at);
        let mut tracked = 0u64;
        for (key, meta) in adopted {
            tracked += meta.size;
            let last_access = clock.fetch_add(1, Ordering::Relaxed);
            tier.index.insert(key, DiskEntry::new(meta, last_access));
        }
        tier.bytes.store(tracked, Ordering::Release);

        tracing::info!(
            root = %tier.root.display(),
            entries = tier.index.len(),
            bytes = tracked,
            discarded,
            prune,
            "disk cache tier opened"
        );
        tier
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.index.contains_key(key)
    }

    fn paths(&self, key: &CacheKey) -> RecordPaths {
        RecordPaths::new(&self.root, key.namespace(), key.key())
    }

    /// Read an entry, validating it against its sidecar.
    ///
    /// The sidecar is copied out of the index and the payload read without
    /// any index guard held. Same-key writers are excluded by the caller.
    pub fn get(&self, key: &CacheKey, tick: u64) -> DiskLookup {
        let now = Utc::now();
        let Some(meta) = self.index.get(key).map(|entry| entry.meta.clone()) else {
            return DiskLookup::Absent;
        };
        let paths = self.paths(key);

        if meta.is_expired(now) {
            self.discard(key, &paths, &meta);
            return DiskLookup::Expired;
        }
        let bytes = match read_payload(&paths, &meta) {
            Ok(bytes) => bytes,
            Err(err) => {
                // Eviction may have raced the read; only a record still
                // indexed is corrupt.
                if !self.discard(key, &paths, &meta) {
                    return DiskLookup::Absent;
                }
                tracing::warn!(key = %key, error = %err, "corrupt disk cache record; discarding");
                return DiskLookup::Corrupt;
            }
        };

        let access_count = match self.index.get_mut(key) {
            Some(mut entry) if same_record(&entry.meta, &meta) => {
                entry.meta.access_count += 1;
                entry.meta.last_access_at = now;
                entry.last_access = tick;
                entry.dirty = true;
                entry.meta.access_count
            }
            _ => meta.access_count + 1,
        };
        DiskLookup::Hit(DiskHit {
            size: meta.size,
            access_count,
            age: meta.age(now),
            ttl: meta.ttl(),
            payload: Payload::from(bytes),
        })
    }

    /// Delete the record described by `meta` if the index still holds it.
    fn discard(&self, key: &CacheKey, paths: &RecordPaths, meta: &RecordMeta) -> bool {
        let _guard = self.write_lock.lock();
        match self.index.remove_if(key, |_, e| same_record(&e.meta, meta)) {
            Some((_, old)) => {
                remove_record(paths);
                self.bytes.fetch_sub(old.meta.size, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Write an entry, evicting down to `target` first if over budget.
    /// Returns the number of entries evicted.
    pub fn insert(
        &self,
        key: CacheKey,
        payload: &[u8],
        ttl: Duration,
        tick: u64,
        target: u64,
    ) -> Result<usize, RecordError> {
        let _guard = self.write_lock.lock();
        self.remove_locked(&key);

        let size = payload.len() as u64;
        let evicted = if self.bytes() + size > self.budget {
            self.evict_locked(size, target)
        } else {
            0
        };

        let now = Utc::now();
        let meta = RecordMeta {
            version: RECORD_VERSION,
            namespace: key.namespace().to_string(),
            key: key.key().to_string(),
            size,
            checksum: checksum(payload),
            created_at: now,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            access_count: 0,
            last_access_at: now,
        };
        let paths = self.paths(&key);
        if let Err(err) = write_record(&paths, payload, &meta) {
            remove_record(&paths);
            return Err(err);
        }

        self.bytes.fetch_add(size, Ordering::AcqRel);
        self.index.insert(key, DiskEntry::new(meta, tick));
        Ok(evicted)
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        let _guard = self.write_lock.lock();
        self.remove_locked(key)
    }

    fn remove_locked(&self, key: &CacheKey) -> bool {
        match self.index.remove(key) {
            Some((_, old)) => {
                remove_record(&self.paths(key));
                self.bytes.fetch_sub(old.meta.size, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Reconcile the index with the files under the root.
    ///
    /// Deletes expired, corrupt and orphaned records, adopts valid records
    /// the index did not know about, forgets index entries whose files
    /// vanished, writes back pending access stats and recomputes the tracked
    /// size. Payload checksums are verified before `write_lock` is taken.
    pub fn sweep(&self) -> DiskSweep {
        let now = Utc::now();
        let tampered = self.find_tampered(now);

        let _guard = self.write_lock.lock();
        let mut outcome = DiskSweep::default();
        let mut seen = HashSet::new();
        let mut stale_stats = Vec::new();

        for scanned in scan_root(&self.root) {
            match scanned {
                Scanned::Record { paths, meta } => {
                    let Some(key) = key_of(&meta) else {
                        remove_record(&paths);
                        outcome.corrupt += 1;
                        continue;
                    };
                    if meta.is_expired(now) {
                        remove_record(&paths);
                        self.index.remove(&key);
                        outcome.expired += 1;
                        continue;
                    }
                    if tampered.contains(&fingerprint_of(&paths, &meta)) {
                        tracing::warn!(key = %key, "disk cache payload fails checksum; discarding");
                        remove_record(&paths);
                        self.index.remove(&key);
                        outcome.corrupt += 1;
                        continue;
                    }
                    {
                        let mut entry = self
                            .index
                            .entry(key.clone())
                            .or_insert_with(|| DiskEntry::new(meta, 0));
                        if entry.dirty {
                            entry.dirty = false;
                            stale_stats.push((paths, entry.meta.clone()));
                        }
                    }
                    seen.insert(key);
                }
                Scanned::Broken { paths, error } => {
                    tracing::debug!(path = %paths.meta.display(), error = %error, "discarding unreadable record");
                    remove_record(&paths);
                    outcome.corrupt += 1;
                }
                Scanned::Orphan { path } => {
                    remove_file_logged(&path);
                    outcome.orphaned += 1;
                }
            }
        }

        let before = self.index.len();
        self.index.retain(|key, _| seen.contains(key));
        outcome.missing = before - self.index.len();

        for (paths, meta) in stale_stats {
            if let Err(err) = write_meta(&paths, &meta) {
                tracing::debug!(path = %paths.meta.display(), error = %err, "failed to persist access stats");
            }
        }

        outcome.tracked_bytes = self.index.iter().map(|entry| entry.meta.size).sum();
        let drift = self.bytes().abs_diff(outcome.tracked_bytes);
        if drift > 0 {
            tracing::debug!(drift, "disk tier size resynced from storage");
        }
        self.bytes.store(outcome.tracked_bytes, Ordering::Release);
        outcome
    }

    /// Records whose payload no longer matches its sidecar checksum.
    fn find_tampered(&self, now: DateTime<Utc>) -> HashSet<RecordFingerprint> {
        scan_root(&self.root)
            .into_iter()
            .filter_map(|scanned| match scanned {
                Scanned::Record { paths, meta } if !meta.is_expired(now) => {
                    match verify_payload(&paths, &meta) {
                        Ok(()) => None,
                        Err(err) => {
                            tracing::debug!(path = %paths.payload.display(), error = %err, "payload verification failed");
                            Some(fingerprint_of(&paths, &meta))
                        }
                    }
                }
                _ => None,
            })
            .collect()
    }

    /// Delete every record and reset the tier.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        match std::fs::read_dir(&self.root) {
            Ok(dirs) => {
                for dir in dirs.flatten() {
                    let path = dir.path();
                    if path.is_dir() {
                        if let Err(err) = std::fs::remove_dir_all(&path) {
                            tracing::warn!(path = %path.display(), error = %err, "failed to clear cache namespace");
                        }
                    }
                }
            }
            Err(err) => {
                tracing::debug!(root = %self.root.display(), error = %err, "disk cache root unreadable during clear");
            }
        }
        self.index.clear();
        self.bytes.store(0, Ordering::Release);
    }

    fn evict_locked(&self, incoming: u64, target: u64) -> usize {
        let candidates: Vec<Candidate<CacheKey>> = self
            .index
            .iter()
            .map(|e| Candidate {
                key: e.key().clone(),
                last_access: e.last_access,
                access_count: e.meta.access_count,
                size: e.meta.size,
            })
            .collect();

        let victims = select_victims(candidates, self.bytes(), incoming, target);
        let mut evicted = 0;
        for victim in victims {
            if self.remove_locked(&victim.key) {
                tracing::debug!(key = %victim.key, size = victim.size, "evicted from disk tier");
                evicted += 1;
            }
        }
        evicted
    }
}

/// Identifies one written version of a record.
type RecordFingerprint = (PathBuf, String, DateTime<Utc>);

fn fingerprint_of(paths: &RecordPaths, meta: &RecordMeta) -> RecordFingerprint {
    (paths.meta.clone(), meta.checksum.clone(), meta.created_at)
}

fn same_record(a: &RecordMeta, b: &RecordMeta) -> bool {
    a.checksum == b.checksum && a.created_at == b.created_at
}

fn key_of(meta: &RecordMeta) -> Option<CacheKey> {
    CacheKey::new(&meta.namespace, &meta.key).ok()
}

fn remove_file_logged(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to delete orphaned cache file");
        }
    }
}

/// Enumerate every record under `root/<namespace>/`.
fn scan_root(root: &Path) -> Vec<Scanned> {
    let namespaces = match std::fs::read_dir(root) {
        Ok(dirs) => dirs,
        Err(err) => {
            tracing::debug!(root = %root.display(), error = %err, "disk cache root unreadable");
            return Vec::new();
        }
    };

    let mut scanned = Vec::new();
    for ns_dir in namespaces.flatten() {
        let dir = ns_dir.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(namespace) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        let Ok(files) = std::fs::read_dir(&dir) else {
            continue;
        };

        let mut meta_stems = HashSet::new();
        let mut payloads = Vec::new();
        for file in files.flatten() {
            let name = file.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(META_SUFFIX) {
                meta_stems.insert(stem.to_string());
                let paths = RecordPaths::from_stem(&dir, stem);
                scanned.push(match load_record(&paths, &namespace, stem) {
                    Ok(meta) => Scanned::Record { paths, meta },
                    Err(error) => Scanned::Broken { paths, error },
                });
            } else if let Some(stem) = name.strip_suffix(&format!(".{PAYLOAD_EXT}")) {
                payloads.push((stem.to_string(), file.path()));
            } else if name.starts_with(".tmp") {
                // Leftover from an interrupted atomic write.
                scanned.push(Scanned::Orphan { path: file.path() });
            }
        }
        for (stem, path) in payloads {
            if !meta_stems.contains(&stem) {
                scanned.push(Scanned::Orphan { path });
            }
        }
    }
    scanned
}

/// Load a sidecar and check it belongs at this path and its payload exists.
fn load_record(paths: &RecordPaths, namespace: &str, stem: &str) -> Result<RecordMeta, RecordError> {
    let meta = decode_meta(&std::fs::read(&paths.meta)?)?;
    if meta.namespace != namespace || checksum(meta.key.as_bytes()) != stem {
        return Err(RecordError::Inconsistent("sidecar does not match its location"));
    }
    let len = std::fs::metadata(&paths.payload)?.len();
    if len != meta.size {
        return Err(RecordError::Inconsistent("payload size differs from sidecar"));
    }
    Ok(meta)
}
