//! Placement, expiry, eviction, promotion and persistence of the tiered cache.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docforge_core::cache::record::RecordPaths;
use docforge_core::cache::{CacheConfig, CacheError, Payload, Tier, TieredCache};

const NS: &str = "test-artifacts";
const HOUR: Duration = Duration::from_secs(3600);

/// Memory budget 100, disk threshold 30, disk budget 1000.
fn small_config(root: &Path) -> CacheConfig {
    CacheConfig {
        memory_budget: 100,
        disk_budget: 1000,
        disk_threshold: 30,
        promotion_threshold: 5,
        promotion_max_size: 50,
        eviction_watermark: 0.8,
        ..CacheConfig::with_root(root)
    }
}

fn bytes(len: usize, fill: u8) -> Vec<u8> {
    vec![fill; len]
}

#[test]
fn small_payloads_stay_in_memory_and_large_go_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));

    assert_eq!(cache.put(NS, "x", bytes(40, 1), HOUR).unwrap(), Tier::Disk);
    assert_eq!(cache.put(NS, "y", bytes(10, 2), HOUR).unwrap(), Tier::Memory);
    assert_eq!(cache.put(NS, "edge", bytes(30, 3), HOUR).unwrap(), Tier::Disk);

    assert_eq!(cache.tier_of(NS, "x"), Some(Tier::Disk));
    assert_eq!(cache.tier_of(NS, "y"), Some(Tier::Memory));
    assert_eq!(&cache.get(NS, "x").unwrap()[..], &bytes(40, 1)[..]);
    assert_eq!(&cache.get(NS, "y").unwrap()[..], &bytes(10, 2)[..]);

    let stats = cache.stats();
    assert_eq!(stats.memory_bytes, 10);
    assert_eq!(stats.disk_bytes, 70);
}

#[test]
fn overwrite_moves_entry_between_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));

    cache.put(NS, "k", bytes(40, 1), HOUR).unwrap();
    cache.put(NS, "k", bytes(10, 2), HOUR).unwrap();
    assert_eq!(cache.tier_of(NS, "k"), Some(Tier::Memory));
    assert_eq!(cache.stats().disk_bytes, 0);
    assert_eq!(&cache.get(NS, "k").unwrap()[..], &bytes(10, 2)[..]);
}

#[test]
fn memory_eviction_removes_least_recently_accessed_first() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));

    for i in 0..10 {
        cache.put(NS, &format!("y{i}"), bytes(10, i as u8), HOUR).unwrap();
    }
    assert!(cache.get(NS, "y0").is_some());

    cache.put(NS, "y10", bytes(10, 10), HOUR).unwrap();

    let stats = cache.stats();
    assert_eq!(stats.memory_bytes, 80);
    assert_eq!(stats.evictions, 3);
    assert!(cache.get(NS, "y0").is_some(), "recently read entry was evicted");
    for evicted in ["y1", "y2", "y3"] {
        assert!(cache.get(NS, evicted).is_none(), "{evicted} should be evicted");
    }
    for kept in ["y4", "y9", "y10"] {
        assert!(cache.get(NS, kept).is_some(), "{kept} should remain");
    }
}

#[test]
fn disk_eviction_deletes_backing_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        disk_budget: 200,
        ..small_config(dir.path())
    };
    let cache = TieredCache::open(config);

    for i in 0..5 {
        cache.put(NS, &format!("d{i}"), bytes(40, i as u8), HOUR).unwrap();
    }
    cache.put(NS, "d5", bytes(40, 5), HOUR).unwrap();

    assert!(cache.stats().disk_bytes <= 160);
    assert!(cache.get(NS, "d0").is_none());
    assert!(!RecordPaths::new(dir.path(), NS, "d0").payload.exists());
    assert!(cache.get(NS, "d5").is_some());
}

#[test]
fn expired_entries_are_never_returned() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    let ttl = Duration::from_millis(20);

    cache.put(NS, "mem", bytes(10, 1), ttl).unwrap();
    cache.put(NS, "disk", bytes(40, 2), ttl).unwrap();
    std::thread::sleep(Duration::from_millis(40));

    assert!(cache.get(NS, "mem").is_none());
    assert!(cache.get(NS, "disk").is_none());
    assert_eq!(cache.tier_of(NS, "mem"), None);
    assert_eq!(cache.tier_of(NS, "disk"), None);
    assert!(!RecordPaths::new(dir.path(), NS, "disk").meta.exists());

    let stats = cache.stats();
    assert_eq!(stats.expirations, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.memory_bytes + stats.disk_bytes, 0);
}

#[test]
fn frequently_read_disk_entry_is_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    cache.put(NS, "hot", bytes(40, 7), HOUR).unwrap();

    for _ in 0..5 {
        assert!(cache.get(NS, "hot").is_some());
        assert_eq!(cache.tier_of(NS, "hot"), Some(Tier::Disk));
    }
    assert!(cache.get(NS, "hot").is_some());
    assert_eq!(cache.tier_of(NS, "hot"), Some(Tier::Memory));
    assert_eq!(cache.stats().promotions, 1);

    // The disk copy stays as a fallback; removing it leaves the memory copy.
    assert!(RecordPaths::new(dir.path(), NS, "hot").payload.exists());
    std::fs::remove_dir_all(dir.path().join(NS)).unwrap();
    assert_eq!(&cache.get(NS, "hot").unwrap()[..], &bytes(40, 7)[..]);
}

#[test]
fn entries_above_promotion_ceiling_stay_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    cache.put(NS, "bulky", bytes(60, 1), HOUR).unwrap();

    for _ in 0..10 {
        assert!(cache.get(NS, "bulky").is_some());
    }
    assert_eq!(cache.tier_of(NS, "bulky"), Some(Tier::Disk));
    assert_eq!(cache.stats().promotions, 0);
}

#[test]
fn disk_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let cache = TieredCache::open(small_config(dir.path()));
        cache.put(NS, "persisted", bytes(40, 9), HOUR).unwrap();
        cache.put(NS, "volatile", bytes(10, 1), HOUR).unwrap();
    }

    let cache = TieredCache::open(small_config(dir.path()));
    assert_eq!(cache.stats().disk_entries, 1);
    assert_eq!(cache.stats().disk_bytes, 40);
    assert_eq!(&cache.get(NS, "persisted").unwrap()[..], &bytes(40, 9)[..]);
    assert!(cache.get(NS, "volatile").is_none());
}

#[test]
fn corrupt_record_is_a_miss_and_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    cache.put(NS, "doc", bytes(40, 1), HOUR).unwrap();

    let paths = RecordPaths::new(dir.path(), NS, "doc");
    std::fs::write(&paths.payload, bytes(40, 2)).unwrap();

    assert!(cache.get(NS, "doc").is_none());
    assert_eq!(cache.tier_of(NS, "doc"), None);
    assert!(!paths.payload.exists());
    assert_eq!(cache.stats().corrupt_records, 1);
    assert_eq!(cache.stats().disk_bytes, 0);
}

#[test]
fn invalidate_is_idempotent_and_clear_resets_counters() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    cache.put(NS, "a", bytes(10, 1), HOUR).unwrap();
    cache.put(NS, "b", bytes(40, 1), HOUR).unwrap();

    assert!(cache.invalidate(NS, "a"));
    assert!(!cache.invalidate(NS, "a"));
    assert!(cache.invalidate(NS, "b"));
    assert!(cache.get(NS, "a").is_none());

    cache.put(NS, "c", bytes(40, 1), HOUR).unwrap();
    cache.get(NS, "c");
    cache.clear();
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (0, 0));
    assert_eq!((stats.memory_bytes, stats.disk_bytes), (0, 0));
    assert!(cache.get(NS, "c").is_none());
}

#[test]
fn malformed_keys_are_rejected_on_put_and_missed_on_get() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));

    assert!(matches!(
        cache.put("../escape", "k", bytes(1, 0), HOUR),
        Err(CacheError::InvalidNamespace { .. })
    ));
    assert!(matches!(
        cache.put(NS, "", bytes(1, 0), HOUR),
        Err(CacheError::InvalidKey { .. })
    ));
    assert!(cache.get("../escape", "k").is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn payload_larger_than_disk_budget_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    assert_eq!(cache.put(NS, "huge", bytes(2000, 0), HOUR).unwrap(), Tier::Disk);
    assert_eq!(cache.tier_of(NS, "huge"), None);
    assert_eq!(cache.stats().disk_bytes, 0);
}

#[test]
fn namespace_ttl_table_is_used_by_put_default() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path());
    config
        .namespace_ttls
        .insert(NS.to_string(), Duration::from_millis(10));
    let cache = TieredCache::open(config);

    cache.put_default(NS, "short", bytes(5, 1)).unwrap();
    cache.put_default("other", "long", bytes(5, 1)).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert!(cache.get(NS, "short").is_none());
    assert!(cache.get("other", "long").is_some());
}

#[tokio::test]
async fn get_or_insert_with_computes_once() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let calls = calls.clone();
        let value: Payload = cache
            .get_or_insert_with(NS, "compiled", HOUR, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(b"%PDF".to_vec())
            })
            .await
            .unwrap();
        assert_eq!(&value[..], b"%PDF");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().hits, 2);
}

#[test]
fn identical_inputs_hit_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(small_config(dir.path()));
    let clone = cache.clone();
    cache.put(NS, "shared", bytes(8, 4), HOUR).unwrap();
    assert!(clone.get(NS, "shared").is_some());
    assert!((cache.stats().hit_rate - 1.0).abs() < f64::EPSILON);
}

#[test]
fn concurrent_writers_leave_consistent_state() {
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(CacheConfig {
        memory_budget: 10_000,
        disk_budget: 100_000,
        ..small_config(dir.path())
    });

    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..50usize {
                    let key = format!("k{}", i % 10);
                    let len = if i % 2 == 0 { 10 } else { 40 };
                    cache.put(NS, &key, bytes(len, t), HOUR).unwrap();
                    if let Some(payload) = cache.get(NS, &key) {
                        assert!(payload.len() == 10 || payload.len() == 40);
                        assert!(payload.iter().all(|b| *b == payload[0]));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..10 {
        let payload = cache.get(NS, &format!("k{i}")).expect("last write should be readable");
        assert!(payload.iter().all(|b| *b == payload[0]));
    }
    let report = cache.run_maintenance();
    assert_eq!(report.disk.tracked_bytes, cache.stats().disk_bytes);
}
