//! Memory budget enforcement with FIFO backpressure.
//!
//! Requests that fit are admitted immediately. Requests that do not fit wait
//! in arrival order and are woken through a per-waiter channel whenever usage
//! drops. Nothing is rejected for contention alone.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::error::AllocatorError;
use super::gc::{GcHook, GcReason, LoggingGc};
use super::probe::{MemoryProbe, ProcessMemoryProbe};
use super::reservation::{Priority, Reservation, ReservationId, TaskKind};
use crate::telemetry;

const GIB: u64 = 1024 * 1024 * 1024;

/// Configuration for the resource allocator.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    /// Total memory budget (bytes).
    pub total_budget: u64,
    /// Share of the budget that admissions may fill. The rest is a safety buffer.
    pub admission_fraction: f64,
    /// Share of the budget above which a release requests a GC pass.
    pub gc_threshold: f64,
    /// Timeout applied when a caller does not supply one.
    pub default_timeout: Duration,
    /// Period of the expired-reservation sweep.
    pub maintenance_interval: Duration,
    /// Period of the process memory monitor.
    pub monitor_interval: Duration,
    /// Hard ceiling on sampled process memory (bytes).
    pub process_ceiling: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            total_budget: 2 * GIB,
            admission_fraction: 0.9,
            gc_threshold: 0.8,
            default_timeout: Duration::from_secs(600),
            maintenance_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(60),
            process_ceiling: 3 * GIB,
        }
    }
}

impl AllocatorConfig {
    /// Config with the given budget and every other value at its default.
    pub fn with_budget(total_budget: u64) -> Self {
        Self {
            total_budget,
            process_ceiling: total_budget.saturating_add(total_budget / 2),
            ..Self::default()
        }
    }

    /// Largest total of active reservations that admission allows.
    pub fn admission_limit(&self) -> u64 {
        fraction_of(self.total_budget, self.admission_fraction)
    }

    /// Usage above which a release requests garbage collection.
    pub fn gc_trigger_bytes(&self) -> u64 {
        fraction_of(self.total_budget, self.gc_threshold)
    }
}

fn fraction_of(total: u64, fraction: f64) -> u64 {
    (total as f64 * fraction.clamp(0.0, 1.0)).round() as u64
}

/// Point-in-time allocator diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorStats {
    pub total_budget: u64,
    pub admission_limit: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
    pub active_reservations: usize,
    pub queued_reservations: usize,
    pub gc_requests: u64,
    pub timed_out: u64,
}

struct Waiter {
    reservation: Reservation,
    tx: oneshot::Sender<Result<(), AllocatorError>>,
}

#[derive(Default)]
struct AllocatorState {
    used: u64,
    active: HashMap<ReservationId, Reservation>,
    waiters: VecDeque<Waiter>,
    closed: bool,
}

struct AllocatorInner {
    config: AllocatorConfig,
    limit: u64,
    gc_trigger: u64,
    state: Mutex<AllocatorState>,
    gc: Arc<dyn GcHook>,
    probe: Arc<dyn MemoryProbe>,
    gc_requests: AtomicU64,
    timed_out: AtomicU64,
}

/// Memory-budgeted admission control for heavy operations.
///
/// Cheap to clone; clones share the same budget.
#[derive(Clone)]
pub struct ResourceAllocator {
    inner: Arc<AllocatorInner>,
}

impl std::fmt::Debug for ResourceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("limit", &self.inner.limit)
            .field("used", &self.used_bytes())
            .finish()
    }
}

impl ResourceAllocator {
    /// Create an allocator with the logging GC hook and the process probe.
    pub fn new(config: AllocatorConfig) -> Self {
        Self::with_hooks(config, Arc::new(LoggingGc), Arc::new(ProcessMemoryProbe))
    }

    /// Create an allocator with explicit GC hook and memory probe.
    pub fn with_hooks(
        config: AllocatorConfig,
        gc: Arc<dyn GcHook>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let limit = config.admission_limit();
        let gc_trigger = config.gc_trigger_bytes();
        Self {
            inner: Arc::new(AllocatorInner {
                config,
                limit,
                gc_trigger,
                state: Mutex::new(AllocatorState::default()),
                gc,
                probe,
                gc_requests: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.inner.config
    }

    /// Reserve `size` bytes, waiting in FIFO order until they fit.
    ///
    /// `timeout` bounds how long the reservation may stay active before the
    /// maintenance sweep reclaims it; `None` uses the configured default.
    pub async fn reserve(
        &self,
        kind: TaskKind,
        size: u64,
        timeout: Option<Duration>,
    ) -> Result<ReservationId, AllocatorError> {
        self.reserve_with_priority(kind, size, timeout, Priority::default())
            .await
    }

    /// Like [`reserve`](Self::reserve) with an explicit priority tag.
    pub async fn reserve_with_priority(
        &self,
        kind: TaskKind,
        size: u64,
        timeout: Option<Duration>,
        priority: Priority,
    ) -> Result<ReservationId, AllocatorError> {
        self.check_fits(size)?;
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);
        let reservation = Reservation::new(kind, size, priority, timeout);
        let id = reservation.id;

        let rx = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(AllocatorError::ShuttingDown);
            }
            if state.waiters.is_empty() && state.used + size <= self.inner.limit {
                self.inner.activate(&mut state, reservation);
                return Ok(id);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { reservation, tx });
            tracing::debug!(
                reservation = %id,
                size,
                used = state.used,
                queued = state.waiters.len(),
                "reservation queued for admission"
            );
            telemetry::record_allocator_state(state.used, state.active.len(), state.waiters.len());
            rx
        };

        let mut pending = PendingAdmission {
            inner: &self.inner,
            id,
            settled: false,
        };
        let outcome = rx.await.unwrap_or(Err(AllocatorError::ShuttingDown));
        pending.settled = true;
        outcome.map(|()| id)
    }

    /// Reserve and wrap the result in a guard that releases on drop.
    pub async fn reserve_guard(
        &self,
        kind: TaskKind,
        size: u64,
        timeout: Option<Duration>,
    ) -> Result<ReservationGuard, AllocatorError> {
        let id = self.reserve(kind, size, timeout).await?;
        Ok(ReservationGuard {
            id,
            size,
            allocator: self.clone(),
            released: false,
        })
    }

    /// Release a reservation. Unknown ids are ignored; returns whether one was released.
    pub fn release(&self, id: ReservationId) -> bool {
        let (reservation, before) = {
            let mut state = self.inner.state.lock();
            let Some(reservation) = state.active.remove(&id) else {
                drop(state);
                tracing::warn!(reservation = %id, "release of unknown reservation ignored");
                return false;
            };
            let before = state.used;
            state.used = state.used.saturating_sub(reservation.size);
            self.inner.admit_waiters(&mut state);
            telemetry::record_allocator_state(state.used, state.active.len(), state.waiters.len());
            (reservation, before)
        };

        tracing::debug!(
            reservation = %id,
            kind = %reservation.kind,
            size = reservation.size,
            held_ms = reservation.age(Instant::now()).as_millis() as u64,
            "reservation released"
        );
        if before > self.inner.gc_trigger {
            self.inner.request_gc(GcReason::ReleaseAboveThreshold);
        }
        true
    }

    /// Whether a request for `size` bytes would be admitted without queueing.
    pub fn can_admit(&self, size: u64) -> bool {
        if size == 0 {
            return false;
        }
        let state = self.inner.state.lock();
        !state.closed && state.waiters.is_empty() && state.used + size <= self.inner.limit
    }

    /// Whether `size` bytes could ever be admitted, ignoring current usage.
    pub fn fits_budget(&self, size: u64) -> bool {
        size > 0 && size <= self.inner.limit
    }

    /// Validate a size up front, returning the error a caller should surface.
    pub fn check_fits(&self, size: u64) -> Result<(), AllocatorError> {
        if size == 0 {
            return Err(AllocatorError::InvalidSize(size));
        }
        if size > self.inner.limit {
            return Err(AllocatorError::ExceedsBudget {
                requested: size,
                limit: self.inner.limit,
            });
        }
        Ok(())
    }

    /// Force-release every active reservation that outlived its timeout.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Reservation> = {
            let mut state = self.inner.state.lock();
            let ids: Vec<ReservationId> = state
                .active
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| r.id)
                .collect();
            let mut expired = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(reservation) = state.active.remove(&id) {
                    state.used = state.used.saturating_sub(reservation.size);
                    expired.push(reservation);
                }
            }
            if !expired.is_empty() {
                self.inner.admit_waiters(&mut state);
                telemetry::record_allocator_state(state.used, state.active.len(), state.waiters.len());
            }
            expired
        };

        for reservation in &expired {
            tracing::warn!(
                reservation = %reservation.id,
                kind = %reservation.kind,
                size = reservation.size,
                timeout_ms = reservation.timeout.as_millis() as u64,
                age_ms = reservation.age(now).as_millis() as u64,
                "reservation timed out; force-released"
            );
            telemetry::record_reservation_timeout(&reservation.kind);
        }
        self.inner
            .timed_out
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    /// Sample process memory; above the ceiling, sweep and request GC.
    pub fn check_process_memory(&self) -> Option<u64> {
        let resident = self.inner.probe.resident_bytes()?;
        telemetry::record_process_memory(resident);
        if resident > self.inner.config.process_ceiling {
            tracing::warn!(
                resident,
                ceiling = self.inner.config.process_ceiling,
                tracked = self.used_bytes(),
                "process memory above ceiling"
            );
            self.sweep_expired();
            self.inner.request_gc(GcReason::ProcessCeiling);
        }
        Some(resident)
    }

    /// Sample process memory without acting on it.
    pub fn resident_bytes(&self) -> Option<u64> {
        self.inner.probe.resident_bytes()
    }

    /// Release everything and refuse further requests. Used at shutdown.
    pub fn release_all(&self) -> usize {
        let (released, failed) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let released = state.active.len();
            state.active.clear();
            state.used = 0;
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
            telemetry::record_allocator_state(0, 0, 0);
            (released, waiters)
        };
        let waiting = failed.len();
        for waiter in failed {
            let _ = waiter.tx.send(Err(AllocatorError::ShuttingDown));
        }
        tracing::info!(released, waiting, "allocator closed");
        released
    }

    /// Sum of active reservation sizes.
    pub fn used_bytes(&self) -> u64 {
        self.inner.state.lock().used
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Whether `id` is currently admitted.
    pub fn is_active(&self, id: ReservationId) -> bool {
        self.inner.state.lock().active.contains_key(&id)
    }

    /// Whether `release_all` has closed the allocator.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> AllocatorStats {
        let (used, active, queued) = {
            let state = self.inner.state.lock();
            (state.used, state.active.len(), state.waiters.len())
        };
        let budget = self.inner.config.total_budget;
        AllocatorStats {
            total_budget: budget,
            admission_limit: self.inner.limit,
            used_bytes: used,
            usage_percent: if budget == 0 {
                0.0
            } else {
                used as f64 * 100.0 / budget as f64
            },
            active_reservations: active,
            queued_reservations: queued,
            gc_requests: self.inner.gc_requests.load(Ordering::Relaxed),
            timed_out: self.inner.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl AllocatorInner {
    fn activate(&self, state: &mut AllocatorState, mut reservation: Reservation) {
        reservation.admitted_at = Some(Instant::now());
        state.used += reservation.size;
        tracing::debug!(
            reservation = %reservation.id,
            kind = %reservation.kind,
            size = reservation.size,
            used = state.used,
            "reservation admitted"
        );
        state.active.insert(reservation.id, reservation);
        telemetry::record_allocator_state(state.used, state.active.len(), state.waiters.len());
    }

    /// Admit waiters from the head of the queue while they fit.
    fn admit_waiters(&self, state: &mut AllocatorState) {
        loop {
            let fits = match state.waiters.front() {
                Some(front) => state.used + front.reservation.size <= self.limit,
                None => break,
            };
            if !fits {
                break;
            }
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            let id = waiter.reservation.id;
            let size = waiter.reservation.size;
            self.activate(state, waiter.reservation);
            if waiter.tx.send(Ok(())).is_err() {
                // Caller went away between queueing and admission.
                state.active.remove(&id);
                state.used = state.used.saturating_sub(size);
            }
        }
    }

    fn request_gc(&self, reason: GcReason) {
        self.gc_requests.fetch_add(1, Ordering::Relaxed);
        telemetry::record_gc_request(reason);
        tracing::info!(%reason, "requesting gc pass");
        self.gc.collect(reason);
    }
}

/// Cleans up a queued request whose future is dropped before it settles.
struct PendingAdmission<'a> {
    inner: &'a AllocatorInner,
    id: ReservationId,
    settled: bool,
}

impl Drop for PendingAdmission<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.reservation.id == self.id) {
            state.waiters.remove(pos);
            tracing::debug!(reservation = %self.id, "queued reservation abandoned");
        } else if let Some(reservation) = state.active.remove(&self.id) {
            // Admitted, but the caller never observed the id.
            state.used = state.used.saturating_sub(reservation.size);
            tracing::debug!(reservation = %self.id, "admitted reservation abandoned");
        }
        self.inner.admit_waiters(&mut state);
        telemetry::record_allocator_state(state.used, state.active.len(), state.waiters.len());
    }
}

/// RAII guard that releases its reservation when dropped.
pub struct ReservationGuard {
    id: ReservationId,
    size: u64,
    allocator: ResourceAllocator,
    released: bool,
}

impl ReservationGuard {
    pub fn id(&self) -> ReservationId {
        self.id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Release now instead of at drop.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.allocator.release(self.id)
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.released {
            self.allocator.release(self.id);
        }
    }
}
