//! Telemetry for the docforge core.
//!
//! Structured logging through `tracing` and metrics through the `metrics`
//! facade. No exporter is installed here; embedders choose one.

mod logging;
mod metrics;

pub use self::logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_allocator_state, record_cache_eviction, record_cache_lookup,
    record_cache_promotion, record_cache_tiers, record_gc_request, record_process_memory,
    record_reservation_timeout,
};
