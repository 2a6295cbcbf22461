//! Typed wrappers over the well-known cache namespaces.
//!
//! Values are stored as JSON. A payload that no longer decodes (for example
//! after a struct change) is dropped and reported as a miss.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::entry::Tier;
use super::error::CacheError;
use super::fingerprint::{file_fingerprint, fingerprint, normalize_query};
use super::tiered::TieredCache;

pub const PARSED_DOCUMENTS: &str = "pdf-processing";
pub const SEARCH_RESULTS: &str = "search-results";
pub const COMPILED_OUTPUTS: &str = "compiled-outputs";

#[derive(Debug, Clone)]
struct JsonNamespace {
    cache: TieredCache,
    namespace: &'static str,
}

impl JsonNamespace {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.cache.get(self.namespace, key)?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(namespace = self.namespace, error = %err, "cached value no longer decodes; dropping");
                self.cache.invalidate(self.namespace, key);
                None
            }
        }
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<Tier, CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Encoding(e.to_string()))?;
        self.cache.put_default(self.namespace, key, bytes)
    }
}

/// Parsed document text keyed by source file identity.
#[derive(Debug, Clone)]
pub struct ParsedDocumentCache {
    inner: JsonNamespace,
}

impl ParsedDocumentCache {
    pub fn new(cache: TieredCache) -> Self {
        Self {
            inner: JsonNamespace {
                cache,
                namespace: PARSED_DOCUMENTS,
            },
        }
    }

    /// Cached parse of `path`. A file that cannot be stat'ed is a miss.
    pub fn get<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let key = file_fingerprint(path).ok()?;
        self.inner.get(&key)
    }

    pub fn put<T: Serialize>(&self, path: &Path, value: &T) -> Result<Tier, CacheError> {
        let key = file_fingerprint(path).map_err(|e| CacheError::Source {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.inner.put(&key, value)
    }
}

/// Search results keyed by normalized query and source.
#[derive(Debug, Clone)]
pub struct SearchResultCache {
    inner: JsonNamespace,
}

impl SearchResultCache {
    pub fn new(cache: TieredCache) -> Self {
        Self {
            inner: JsonNamespace {
                cache,
                namespace: SEARCH_RESULTS,
            },
        }
    }

    pub fn key(query: &str, source: &str) -> String {
        fingerprint(&[normalize_query(query).as_bytes(), source.as_bytes()])
    }

    pub fn get<T: DeserializeOwned>(&self, query: &str, source: &str) -> Option<T> {
        self.inner.get(&Self::key(query, source))
    }

    pub fn put<T: Serialize>(&self, query: &str, source: &str, results: &T) -> Result<Tier, CacheError> {
        self.inner.put(&Self::key(query, source), results)
    }
}

/// Compiled document output keyed by source text and output format.
#[derive(Debug, Clone)]
pub struct CompiledOutputCache {
    inner: JsonNamespace,
}

impl CompiledOutputCache {
    pub fn new(cache: TieredCache) -> Self {
        Self {
            inner: JsonNamespace {
                cache,
                namespace: COMPILED_OUTPUTS,
            },
        }
    }

    pub fn key(source: &str, format: &str) -> String {
        fingerprint(&[source.as_bytes(), format.as_bytes()])
    }

    pub fn get<T: DeserializeOwned>(&self, source: &str, format: &str) -> Option<T> {
        self.inner.get(&Self::key(source, format))
    }

    pub fn put<T: Serialize>(&self, source: &str, format: &str, output: &T) -> Result<Tier, CacheError> {
        self.inner.put(&Self::key(source, format), output)
    }
}
