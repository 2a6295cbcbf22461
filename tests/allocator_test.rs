//! Admission, release and timeout behaviour of the resource allocator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docforge_core::allocator::{
    estimate_pipeline_bytes, AllocatorConfig, AllocatorError, GcReason, Priority,
    ProcessMemoryProbe, ResourceAllocator, TaskKind,
};

fn allocator(budget: u64) -> ResourceAllocator {
    ResourceAllocator::new(AllocatorConfig::with_budget(budget))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within 1s");
}

#[tokio::test]
async fn release_admits_queued_request() {
    let alloc = allocator(100);
    let a = alloc.reserve(TaskKind::Parsing, 60, None).await.unwrap();
    assert_eq!(alloc.used_bytes(), 60);

    let waiter = alloc.clone();
    let b = tokio::spawn(async move { waiter.reserve(TaskKind::Recognition, 50, None).await });
    wait_until(|| alloc.queued_count() == 1).await;
    assert_eq!(alloc.used_bytes(), 60);

    assert!(alloc.release(a));
    let b = b.await.unwrap().unwrap();
    assert_eq!(alloc.used_bytes(), 50);
    assert!(alloc.is_active(b));
    assert_eq!(alloc.queued_count(), 0);
}

#[tokio::test]
async fn admission_is_fifo_even_when_later_requests_fit() {
    let alloc = allocator(100);
    let a = alloc.reserve(TaskKind::Parsing, 80, None).await.unwrap();

    let w1 = alloc.clone();
    let big = tokio::spawn(async move { w1.reserve(TaskKind::Analysis, 50, None).await });
    wait_until(|| alloc.queued_count() == 1).await;

    // 80 + 5 fits under the limit of 90, but the head of the queue does not.
    let w2 = alloc.clone();
    let small = tokio::spawn(async move { w2.reserve(TaskKind::Compilation, 5, None).await });
    wait_until(|| alloc.queued_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(alloc.queued_count(), 2, "small request jumped the queue");
    assert_eq!(alloc.used_bytes(), 80);

    alloc.release(a);
    let big = big.await.unwrap().unwrap();
    let small = small.await.unwrap().unwrap();
    assert!(alloc.is_active(big) && alloc.is_active(small));
    assert_eq!(alloc.used_bytes(), 55);
}

#[tokio::test]
async fn oversized_and_empty_requests_fail_fast() {
    let alloc = allocator(100);
    assert_eq!(
        alloc.reserve(TaskKind::Parsing, 91, None).await,
        Err(AllocatorError::ExceedsBudget {
            requested: 91,
            limit: 90
        })
    );
    assert_eq!(
        alloc.reserve(TaskKind::Parsing, 0, None).await,
        Err(AllocatorError::InvalidSize(0))
    );
    assert!(alloc.reserve(TaskKind::Parsing, 90, None).await.is_ok());
    assert_eq!(alloc.queued_count(), 0);
}

#[tokio::test]
async fn priority_is_recorded_but_does_not_reorder() {
    let alloc = allocator(100);
    let a = alloc.reserve(TaskKind::Parsing, 80, None).await.unwrap();
    assert!(!alloc.can_admit(20));
    assert!(alloc.can_admit(10));

    let w1 = alloc.clone();
    let low = tokio::spawn(async move {
        w1.reserve_with_priority(TaskKind::Analysis, 30, None, Priority::Low).await
    });
    wait_until(|| alloc.queued_count() == 1).await;
    // Waiters exist, so even a small request must queue.
    assert!(!alloc.can_admit(1));

    let w2 = alloc.clone();
    let high = tokio::spawn(async move {
        w2.reserve_with_priority(TaskKind::Analysis, 70, None, Priority::High).await
    });
    wait_until(|| alloc.queued_count() == 2).await;

    alloc.release(a);
    let low = low.await.unwrap().unwrap();
    assert!(alloc.is_active(low));
    assert_eq!(alloc.queued_count(), 1, "high priority request stays behind the head");

    alloc.release(low);
    let high = high.await.unwrap().unwrap();
    assert_eq!(alloc.used_bytes(), 70);
    assert!(alloc.release(high));
}

#[tokio::test]
async fn error_classification() {
    let alloc = allocator(100);
    let oversized = alloc.reserve(TaskKind::Parsing, 500, None).await.unwrap_err();
    assert!(oversized.is_invalid_request());

    alloc.release_all();
    assert!(alloc.is_closed());
    let closed = alloc.reserve(TaskKind::Parsing, 5, None).await.unwrap_err();
    assert_eq!(closed, AllocatorError::ShuttingDown);
    assert!(!closed.is_invalid_request());
}

#[tokio::test]
async fn unknown_and_double_release_are_ignored() {
    let alloc = allocator(100);
    let id = alloc.reserve(TaskKind::Parsing, 10, None).await.unwrap();
    assert!(alloc.release(id));
    assert!(!alloc.release(id));
    assert_eq!(alloc.used_bytes(), 0);
}

#[tokio::test]
async fn cancelled_waiter_leaves_the_queue() {
    let alloc = allocator(100);
    let a = alloc.reserve(TaskKind::Parsing, 80, None).await.unwrap();

    let attempt = tokio::time::timeout(
        Duration::from_millis(20),
        alloc.reserve(TaskKind::Recognition, 50, None),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(alloc.queued_count(), 0);

    alloc.release(a);
    assert_eq!(alloc.used_bytes(), 0);
    assert_eq!(alloc.active_count(), 0);
}

#[tokio::test]
async fn sweep_reclaims_expired_reservations_and_wakes_waiters() {
    let alloc = allocator(100);
    let stale = alloc
        .reserve(TaskKind::Recognition, 80, Some(Duration::from_millis(10)))
        .await
        .unwrap();

    let waiter = alloc.clone();
    let next = tokio::spawn(async move { waiter.reserve(TaskKind::Parsing, 50, None).await });
    wait_until(|| alloc.queued_count() == 1).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(alloc.sweep_expired(), 1);
    assert!(!alloc.is_active(stale));

    let next = next.await.unwrap().unwrap();
    assert!(alloc.is_active(next));
    assert_eq!(alloc.used_bytes(), 50);
    assert_eq!(alloc.stats().timed_out, 1);
    assert!(!alloc.release(stale));
}

#[tokio::test]
async fn time_spent_queued_counts_toward_timeout() {
    let alloc = allocator(100);
    let first = alloc.reserve(TaskKind::Parsing, 80, None).await.unwrap();

    let waiter = alloc.clone();
    let late = tokio::spawn(async move {
        waiter
            .reserve(TaskKind::Recognition, 50, Some(Duration::from_millis(20)))
            .await
    });
    wait_until(|| alloc.queued_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    alloc.release(first);
    let late = late.await.unwrap().unwrap();
    assert!(alloc.is_active(late));

    assert_eq!(alloc.sweep_expired(), 1);
    assert!(!alloc.is_active(late));
    assert_eq!(alloc.used_bytes(), 0);
    assert_eq!(alloc.stats().timed_out, 1);
}

#[tokio::test]
async fn release_above_threshold_requests_gc() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let hook = move |reason: GcReason| {
        assert_eq!(reason, GcReason::ReleaseAboveThreshold);
        seen.fetch_add(1, Ordering::SeqCst);
    };
    let alloc = ResourceAllocator::with_hooks(
        AllocatorConfig::with_budget(1000),
        Arc::new(hook),
        Arc::new(ProcessMemoryProbe),
    );

    let small = alloc.reserve(TaskKind::Parsing, 100, None).await.unwrap();
    alloc.release(small);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let big = alloc.reserve(TaskKind::Parsing, 850, None).await.unwrap();
    alloc.release(big);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(alloc.stats().gc_requests, 1);
}

#[tokio::test]
async fn guard_releases_on_drop() {
    let alloc = allocator(100);
    {
        let guard = alloc.reserve_guard(TaskKind::Analysis, 40, None).await.unwrap();
        assert_eq!(guard.size(), 40);
        assert_eq!(alloc.used_bytes(), 40);
    }
    assert_eq!(alloc.used_bytes(), 0);

    let guard = alloc.reserve_guard(TaskKind::Analysis, 40, None).await.unwrap();
    assert!(guard.release());
    assert_eq!(alloc.active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_exceed_limit() {
    let alloc = allocator(1000);
    let limit = alloc.config().admission_limit();
    let mut tasks = Vec::new();
    for i in 0..32u64 {
        let alloc = alloc.clone();
        tasks.push(tokio::spawn(async move {
            let size = 50 + (i * 37) % 400;
            let guard = alloc.reserve_guard(TaskKind::Parsing, size, None).await.unwrap();
            assert!(alloc.used_bytes() <= limit);
            tokio::time::sleep(Duration::from_millis(2)).await;
            drop(guard);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(alloc.used_bytes(), 0);
    assert_eq!(alloc.queued_count(), 0);
}

#[test]
fn pipeline_estimate_is_three_times_file_size() {
    assert_eq!(estimate_pipeline_bytes(10 * 1024 * 1024), 30 * 1024 * 1024);
}
