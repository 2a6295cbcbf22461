//! On-disk record format for the disk tier.
//!
//! Each entry is two files under `<root>/<namespace>/`:
//! `<sha256(key)>.bin` holds the payload and `<sha256(key)>.meta.json` holds
//! the sidecar below. A record is valid only if the sidecar parses, names the
//! same key, and the payload matches the recorded size and checksum.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const RECORD_VERSION: u32 = 1;
pub const PAYLOAD_EXT: &str = "bin";
pub const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed sidecar: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported record version {0}")]
    Version(u32),

    #[error("Record inconsistent: {0}")]
    Inconsistent(&'static str),
}

/// Sidecar metadata persisted next to each payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub version: u32,
    pub namespace: String,
    pub key: String,
    pub size: u64,
    /// Hex SHA-256 of the payload.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub access_count: u64,
    pub last_access_at: DateTime<Utc>,
}

impl RecordMeta {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Age of the record at `now`; zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) > self.ttl()
    }
}

/// Parse and sanity-check a sidecar.
pub fn decode_meta(bytes: &[u8]) -> Result<RecordMeta, RecordError> {
    let meta: RecordMeta = serde_json::from_slice(bytes)?;
    if meta.version != RECORD_VERSION {
        return Err(RecordError::Version(meta.version));
    }
    if meta.checksum.len() != 64 || !meta.checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(RecordError::Inconsistent("checksum is not a sha256 hex digest"));
    }
    if meta.namespace.is_empty() || meta.key.is_empty() {
        return Err(RecordError::Inconsistent("empty namespace or key"));
    }
    Ok(meta)
}

pub fn encode_meta(meta: &RecordMeta) -> Result<Vec<u8>, RecordError> {
    Ok(serde_json::to_vec_pretty(meta)?)
}

/// Hex SHA-256 of a byte string.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// File locations of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPaths {
    pub dir: PathBuf,
    pub payload: PathBuf,
    pub meta: PathBuf,
}

impl RecordPaths {
    pub fn new(root: &Path, namespace: &str, key: &str) -> Self {
        Self::from_stem(&root.join(namespace), &checksum(key.as_bytes()))
    }

    pub fn from_stem(dir: &Path, stem: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            payload: dir.join(format!("{stem}.{PAYLOAD_EXT}")),
            meta: dir.join(format!("{stem}{META_SUFFIX}")),
        }
    }
}

/// Read and validate a record's payload against its sidecar.
pub fn read_payload(paths: &RecordPaths, meta: &RecordMeta) -> Result<Vec<u8>, RecordError> {
    let bytes = std::fs::read(&paths.payload)?;
    if bytes.len() as u64 != meta.size {
        return Err(RecordError::Inconsistent("payload size differs from sidecar"));
    }
    if checksum(&bytes) != meta.checksum {
        return Err(RecordError::Inconsistent("payload checksum mismatch"));
    }
    Ok(bytes)
}

/// Stream the payload through SHA-256 and check it against the sidecar
/// without loading it into memory.
pub fn verify_payload(paths: &RecordPaths, meta: &RecordMeta) -> Result<(), RecordError> {
    let mut file = std::fs::File::open(&paths.payload)?;
    let mut hasher = Sha256::new();
    let len = std::io::copy(&mut file, &mut hasher)?;
    if len != meta.size {
        return Err(RecordError::Inconsistent("payload size differs from sidecar"));
    }
    if hex::encode(hasher.finalize()) != meta.checksum {
        return Err(RecordError::Inconsistent("payload checksum mismatch"));
    }
    Ok(())
}

/// Write `bytes` to `target` through a temp file in the same directory.
pub fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), RecordError> {
    replace_file(dir, target, bytes, true)
}

/// Rewrite a sidecar in place, e.g. to refresh access stats.
///
/// Not synced: losing a stats update on crash only costs recency accuracy.
pub fn write_meta(paths: &RecordPaths, meta: &RecordMeta) -> Result<(), RecordError> {
    replace_file(&paths.dir, &paths.meta, &encode_meta(meta)?, false)
}

fn replace_file(dir: &Path, target: &Path, bytes: &[u8], sync: bool) -> Result<(), RecordError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if sync {
        tmp.as_file().sync_data()?;
    }
    tmp.persist(target).map_err(|e| RecordError::Io(e.error))?;
    Ok(())
}

/// Write payload then sidecar. The sidecar goes last so a crash mid-write
/// leaves an orphan payload, never a sidecar pointing at missing data.
pub fn write_record(paths: &RecordPaths, payload: &[u8], meta: &RecordMeta) -> Result<(), RecordError> {
    std::fs::create_dir_all(&paths.dir)?;
    write_atomic(&paths.dir, &paths.payload, payload)?;
    write_atomic(&paths.dir, &paths.meta, &encode_meta(meta)?)
}

/// Remove both files, ignoring ones already gone.
pub fn remove_record(paths: &RecordPaths) {
    for path in [&paths.meta, &paths.payload] {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "failed to delete cache record file");
            }
        }
    }
}
