//! Cache keys, tiers and in-memory entry bookkeeping.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::CacheError;

/// Immutable cached artifact. Cloning shares the bytes.
pub type Payload = Arc<[u8]>;

const MAX_NAMESPACE_LEN: usize = 64;
const MAX_KEY_LEN: usize = 512;

/// Storage location of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Disk,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Disk => f.write_str("disk"),
        }
    }
}

/// Validated (namespace, key) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    key: String,
}

impl CacheKey {
    /// Validate and build a key.
    ///
    /// Namespaces become directory names, so they are restricted to
    /// `[A-Za-z0-9._-]` and may not start with a dot.
    pub fn new(namespace: &str, key: &str) -> Result<Self, CacheError> {
        validate_namespace(namespace)?;
        if key.is_empty() {
            return Err(CacheError::InvalidKey { reason: "key is empty" });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(CacheError::InvalidKey { reason: "key longer than 512 bytes" });
        }
        Ok(Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

fn validate_namespace(namespace: &str) -> Result<(), CacheError> {
    let invalid = |reason| CacheError::InvalidNamespace {
        namespace: namespace.to_string(),
        reason,
    };
    if namespace.is_empty() {
        return Err(invalid("namespace is empty"));
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(invalid("namespace longer than 64 bytes"));
    }
    if namespace.starts_with('.') {
        return Err(invalid("namespace may not start with '.'"));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !namespace.chars().all(allowed) {
        return Err(invalid("namespace may only contain [A-Za-z0-9._-]"));
    }
    Ok(())
}

/// Entry resident in the memory tier.
#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    pub payload: Payload,
    pub size: u64,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    /// Logical access tick; larger is more recent.
    pub last_access: u64,
}

impl MemoryEntry {
    pub fn new(payload: Payload, ttl: Duration, tick: u64) -> Self {
        let size = payload.len() as u64;
        Self {
            payload,
            size,
            created_at: Instant::now(),
            ttl,
            access_count: 0,
            last_access: tick,
        }
    }

    /// Entry copied up from disk, keeping its age and access history.
    pub fn promoted(payload: Payload, age: Duration, ttl: Duration, access_count: u64, tick: u64) -> Self {
        let now = Instant::now();
        Self {
            size: payload.len() as u64,
            payload,
            created_at: now.checked_sub(age).unwrap_or(now),
            ttl,
            access_count,
            last_access: tick,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}
