//! Cache error types.

use thiserror::Error;

/// Errors surfaced to cache callers. Storage faults never appear here;
/// they are logged and treated as misses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Invalid cache namespace {namespace:?}: {reason}")]
    InvalidNamespace { namespace: String, reason: &'static str },

    #[error("Invalid cache key: {reason}")]
    InvalidKey { reason: &'static str },

    #[error("Cannot fingerprint source {path}: {reason}")]
    Source { path: String, reason: String },

    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}
