//! Lifecycle of the shared `DocCore` context.

use std::sync::Arc;
use std::time::Duration;

use docforge_core::allocator::{AllocatorConfig, AllocatorError, MemoryProbe, TaskKind};
use docforge_core::cache::{CacheConfig, Tier};
use docforge_core::health::HealthState;
use docforge_core::shutdown::{ShutdownResult, ShutdownState};
use docforge_core::{CoreConfig, DocCore};

struct FixedProbe(u64);

impl MemoryProbe for FixedProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.0)
    }
}

fn core_config(root: &std::path::Path) -> CoreConfig {
    let mut allocator = AllocatorConfig::with_budget(1000);
    allocator.maintenance_interval = Duration::from_millis(10);
    allocator.monitor_interval = Duration::from_millis(10);
    CoreConfig {
        allocator,
        cache: CacheConfig {
            memory_budget: 100,
            disk_budget: 1000,
            disk_threshold: 30,
            maintenance_interval: Duration::from_millis(10),
            ..CacheConfig::with_root(root)
        },
        shutdown_timeout: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn shutdown_stops_tasks_and_releases_everything() {
    let dir = tempfile::tempdir().unwrap();
    let core = DocCore::with_probe(core_config(dir.path()), Arc::new(FixedProbe(0)));
    core.start_background();
    core.start_background();
    assert_eq!(core.diagnostics().background_tasks, 3);

    core.allocator().reserve(TaskKind::Parsing, 600, None).await.unwrap();
    let waiter = core.allocator().clone();
    let queued = tokio::spawn(async move { waiter.reserve(TaskKind::Analysis, 600, None).await });
    while core.allocator().queued_count() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    core.cache().put("compiled-outputs", "doc", vec![1; 40], Duration::from_secs(60)).unwrap();

    let report = core.shutdown().await;
    assert_eq!(report.tasks, ShutdownResult::Complete);
    assert_eq!(report.released_reservations, 1);
    assert_eq!(queued.await.unwrap(), Err(AllocatorError::ShuttingDown));
    assert_eq!(core.allocator().used_bytes(), 0);
    assert_eq!(
        core.allocator().reserve(TaskKind::Parsing, 10, None).await,
        Err(AllocatorError::ShuttingDown)
    );

    let diagnostics = core.diagnostics();
    assert_eq!(diagnostics.shutdown_state, ShutdownState::Stopped);
    assert_eq!(diagnostics.background_tasks, 0);
    // Disk tier survives shutdown.
    assert_eq!(core.cache().tier_of("compiled-outputs", "doc"), Some(Tier::Disk));
}

#[tokio::test]
async fn background_sweeper_reclaims_timed_out_reservation() {
    let dir = tempfile::tempdir().unwrap();
    let core = DocCore::with_probe(core_config(dir.path()), Arc::new(FixedProbe(0)));
    core.start_background();

    let id = core
        .allocator()
        .reserve(TaskKind::Recognition, 500, Some(Duration::from_millis(5)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!core.allocator().is_active(id));
    assert_eq!(core.allocator().stats().timed_out, 1);

    core.shutdown().await;
}

#[tokio::test]
async fn gc_hint_trims_cache_memory_tier() {
    let dir = tempfile::tempdir().unwrap();
    let core = DocCore::with_probe(core_config(dir.path()), Arc::new(FixedProbe(0)));
    for i in 0..10 {
        core.cache()
            .put("search-results", &format!("q{i}"), vec![0; 10], Duration::from_secs(60))
            .unwrap();
    }
    assert_eq!(core.cache().stats().memory_bytes, 100);

    // Releasing above the GC threshold (800 of 1000) trims memory to 80%.
    let id = core.allocator().reserve(TaskKind::Compilation, 850, None).await.unwrap();
    core.allocator().release(id);
    assert_eq!(core.cache().stats().memory_bytes, 80);
}

#[tokio::test]
async fn diagnostics_reflect_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let core = DocCore::with_probe(core_config(dir.path()), Arc::new(FixedProbe(100)));
    assert_eq!(core.diagnostics().state, HealthState::Healthy);

    let id = core.allocator().reserve(TaskKind::Parsing, 850, None).await.unwrap();
    let report = core.diagnostics();
    assert_eq!(report.state, HealthState::Degraded);
    assert_eq!(report.allocator.used_bytes, 850);
    core.allocator().release(id);

    let hot = DocCore::with_probe(core_config(dir.path()), Arc::new(FixedProbe(10_000)));
    assert_eq!(hot.diagnostics().state, HealthState::Critical);
    let json = serde_json::to_value(hot.diagnostics()).unwrap();
    assert_eq!(json["state"], "Critical");
}

#[test]
fn namespace_wrappers_share_the_core_cache() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Hit {
        title: String,
        score: f32,
    }

    let dir = tempfile::tempdir().unwrap();
    let core = DocCore::new(CoreConfig {
        cache: CacheConfig::with_root(dir.path()),
        ..CoreConfig::default()
    });
    let results = vec![Hit { title: "Paging".into(), score: 0.5 }];
    core.search_results().put("virtual memory", "arxiv", &results).unwrap();

    let again: Option<Vec<Hit>> = core.search_results().get("  Virtual   Memory", "arxiv");
    assert_eq!(again, Some(results));
    assert_eq!(core.cache().stats().hits, 1);
}
