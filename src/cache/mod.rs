//! Tiered artifact cache.
//!
//! - `tiered`: the two-tier cache and its configuration
//! - `namespaces`: typed JSON wrappers for well-known namespaces
//! - `record`: on-disk record format

mod disk_tier;
mod entry;
mod error;
mod eviction;
mod fingerprint;
mod memory_tier;
pub mod namespaces;
pub mod record;
mod tiered;

pub use disk_tier::DiskSweep;
pub use entry::{CacheKey, Payload, Tier};
pub use error::CacheError;
pub use fingerprint::{file_fingerprint, fingerprint, normalize_query};
pub use namespaces::{CompiledOutputCache, ParsedDocumentCache, SearchResultCache};
pub use tiered::{default_namespace_ttls, CacheConfig, CacheStats, MaintenanceReport, TieredCache};
