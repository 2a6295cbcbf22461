//! Docforge core
//!
//! Memory-budgeted task admission and a tiered artifact cache for a
//! document-processing assistant. Heavy pipeline stages (PDF parsing, OCR,
//! search aggregation, compilation) reserve an estimated working set before
//! they start and memoize their outputs so repeated work is skipped.
//!
//! # Components
//!
//! - [`allocator`]: FIFO admission against a fixed byte budget, with
//!   reservation timeouts and GC hints
//! - [`cache`]: memory and disk tiers behind one get/put interface
//! - [`scheduler`]: periodic sweeps for both
//! - [`DocCore`]: owns the components and their background tasks
//!
//! Everything is in-process. No network access, no IPC.

pub mod allocator;
pub mod cache;
pub mod cli;
pub mod config;
pub mod health;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use allocator::{AllocatorConfig, GcReason, MemoryProbe, ProcessMemoryProbe, ResourceAllocator};
use cache::{CacheConfig, CompiledOutputCache, ParsedDocumentCache, SearchResultCache, TieredCache};
use config::EnvConfig;
use health::{DiagnosticsReport, HealthChecker, HealthInputs};
use shutdown::{ShutdownCoordinator, ShutdownResult};

/// Configuration of a [`DocCore`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub allocator: AllocatorConfig,
    pub cache: CacheConfig,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorConfig::default(),
            cache: CacheConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&EnvConfig> for CoreConfig {
    fn from(env: &EnvConfig) -> Self {
        Self {
            allocator: env.allocator.clone(),
            cache: env.cache.clone(),
            shutdown_timeout: env.shutdown_timeout,
        }
    }
}

/// What [`DocCore::shutdown`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub tasks: ShutdownResult,
    pub released_reservations: usize,
}

/// Shared context owning the allocator, the cache and their maintenance tasks.
pub struct DocCore {
    allocator: ResourceAllocator,
    cache: TieredCache,
    shutdown: ShutdownCoordinator,
    health: HealthChecker,
    shutdown_timeout: Duration,
    started: AtomicBool,
}

impl DocCore {
    /// Open the cache and build the allocator with the process memory probe.
    pub fn new(config: CoreConfig) -> Self {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe))
    }

    /// Like [`new`](Self::new) with a custom memory probe.
    ///
    /// GC hints from the allocator trim the cache's memory tier.
    pub fn with_probe(config: CoreConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let cache = TieredCache::open(config.cache.clone());
        Self::assemble(config, cache, probe)
    }

    /// Build a context for reporting without pruning the disk tier.
    ///
    /// See [`TieredCache::inspect`]. The allocator is new, so its figures
    /// describe this process only.
    pub fn inspect(config: CoreConfig) -> Self {
        let cache = TieredCache::inspect(config.cache.clone());
        Self::assemble(config, cache, Arc::new(ProcessMemoryProbe))
    }

    fn assemble(config: CoreConfig, cache: TieredCache, probe: Arc<dyn MemoryProbe>) -> Self {
        let trim_target = cache.clone();
        let gc_hook = move |reason: GcReason| {
            let evicted = trim_target.trim_memory();
            tracing::info!(%reason, evicted, "gc hint: trimmed cache memory tier");
        };
        let health = HealthChecker::new(&config.allocator);
        let allocator = ResourceAllocator::with_hooks(config.allocator, Arc::new(gc_hook), probe);

        tracing::info!(
            budget = allocator.config().total_budget,
            admission_limit = allocator.config().admission_limit(),
            cache_root = %cache.disk_root().display(),
            "docforge core initialized"
        );

        Self {
            allocator,
            cache,
            shutdown: ShutdownCoordinator::new(),
            health,
            shutdown_timeout: config.shutdown_timeout,
            started: AtomicBool::new(false),
        }
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    pub fn parsed_documents(&self) -> ParsedDocumentCache {
        ParsedDocumentCache::new(self.cache.clone())
    }

    pub fn search_results(&self) -> SearchResultCache {
        SearchResultCache::new(self.cache.clone())
    }

    pub fn compiled_outputs(&self) -> CompiledOutputCache {
        CompiledOutputCache::new(self.cache.clone())
    }

    /// Spawn the expiry sweeper, memory monitor and cache maintenance loops.
    ///
    /// Must be called inside a tokio runtime. Later calls do nothing.
    pub fn start_background(&self) {
        if self.started.swap(true, Ordering::AcqRel) || !self.shutdown.is_running() {
            return;
        }
        let alloc_cfg = self.allocator.config();
        self.shutdown.register(
            "allocator-sweeper",
            scheduler::spawn_allocator_sweeper(
                self.allocator.clone(),
                alloc_cfg.maintenance_interval,
                self.shutdown.token(),
            ),
        );
        self.shutdown.register(
            "memory-monitor",
            scheduler::spawn_memory_monitor(
                self.allocator.clone(),
                alloc_cfg.monitor_interval,
                self.shutdown.token(),
            ),
        );
        self.shutdown.register(
            "cache-maintenance",
            scheduler::spawn_cache_maintenance(
                self.cache.clone(),
                self.cache.config().maintenance_interval,
                self.shutdown.token(),
            ),
        );
        tracing::info!("background maintenance started");
    }

    /// Stop background tasks and release every reservation.
    ///
    /// The disk tier is left in place for the next start.
    pub async fn shutdown(&self) -> ShutdownReport {
        let tasks = self.shutdown.initiate(self.shutdown_timeout).await;
        let released_reservations = self.allocator.release_all();
        tracing::info!(?tasks, released_reservations, "docforge core stopped");
        ShutdownReport {
            tasks,
            released_reservations,
        }
    }

    pub fn diagnostics(&self) -> DiagnosticsReport {
        self.health.report(HealthInputs {
            shutdown_state: self.shutdown.state(),
            allocator: self.allocator.stats(),
            cache: self.cache.stats(),
            process_resident_bytes: self.allocator.resident_bytes(),
            background_tasks: self.shutdown.running_tasks(),
        })
    }
}
