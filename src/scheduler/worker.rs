//! Maintenance loops for the allocator and the cache.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::allocator::ResourceAllocator;
use crate::cache::TieredCache;

/// Force-release reservations past their timeout every `period`.
pub fn spawn_allocator_sweeper(
    allocator: ResourceAllocator,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_periodic("allocator-sweeper", period, shutdown, move || {
        let allocator = allocator.clone();
        async move {
            let released = allocator.sweep_expired();
            if released > 0 {
                tracing::info!(released, "expired reservations reclaimed");
            }
        }
    }))
}

/// Sample process memory every `period`, reacting above the ceiling.
pub fn spawn_memory_monitor(
    allocator: ResourceAllocator,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_periodic("memory-monitor", period, shutdown, move || {
        let allocator = allocator.clone();
        async move {
            if let Some(resident) = allocator.check_process_memory() {
                tracing::trace!(resident, "process memory sampled");
            }
        }
    }))
}

/// Run a cache maintenance pass every `period`.
///
/// The pass touches the filesystem, so it runs on the blocking pool.
pub fn spawn_cache_maintenance(
    cache: TieredCache,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_periodic("cache-maintenance", period, shutdown, move || {
        let cache = cache.clone();
        async move {
            if let Err(err) = tokio::task::spawn_blocking(move || cache.run_maintenance()).await {
                tracing::error!(error = %err, "cache maintenance pass panicked");
            }
        }
    }))
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so work starts one period in.
    interval.tick().await;
    tracing::debug!(task = name, period_ms = period.as_millis() as u64, "background task started");

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::debug!(task = name, "background task stopping");
                break;
            }
            _ = interval.tick() => tick().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{AllocatorConfig, GcReason, MemoryProbe, TaskKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedProbe(u64);

    impl MemoryProbe for FixedProbe {
        fn resident_bytes(&self) -> Option<u64> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn sweeper_reclaims_expired_reservations() {
        let allocator = ResourceAllocator::new(AllocatorConfig::with_budget(1000));
        allocator
            .reserve(TaskKind::Parsing, 100, Some(Duration::from_millis(10)))
            .await
            .unwrap();
        let token = CancellationToken::new();
        let handle = spawn_allocator_sweeper(allocator.clone(), Duration::from_millis(20), token.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(allocator.active_count(), 0);
        assert_eq!(allocator.used_bytes(), 0);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn monitor_requests_gc_above_ceiling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let hook = move |reason: GcReason| {
            assert_eq!(reason, GcReason::ProcessCeiling);
            seen.fetch_add(1, Ordering::SeqCst);
        };
        let mut config = AllocatorConfig::with_budget(1000);
        config.process_ceiling = 1500;
        let allocator = ResourceAllocator::with_hooks(config, Arc::new(hook), Arc::new(FixedProbe(4000)));

        let token = CancellationToken::new();
        let handle = spawn_memory_monitor(allocator, Duration::from_millis(10), token.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn cancelled_task_exits_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::open(crate::cache::CacheConfig::with_root(dir.path()));
        let token = CancellationToken::new();
        let handle = spawn_cache_maintenance(cache, Duration::from_secs(3600), token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task did not stop")
            .unwrap();
    }
}
