//! Metric names and recording helpers.

use metrics::{describe_counter, describe_gauge, Unit};

use crate::allocator::{GcReason, TaskKind};
use crate::cache::Tier;

const ALLOCATOR_USED_BYTES: &str = "docforge_allocator_used_bytes";
const ALLOCATOR_ACTIVE: &str = "docforge_allocator_active_reservations";
const ALLOCATOR_QUEUED: &str = "docforge_allocator_queued_requests";
const RESERVATION_TIMEOUTS: &str = "docforge_reservation_timeouts_total";
const GC_REQUESTS: &str = "docforge_gc_requests_total";
const PROCESS_RESIDENT_BYTES: &str = "docforge_process_resident_bytes";
const CACHE_LOOKUPS: &str = "docforge_cache_lookups_total";
const CACHE_TIER_BYTES: &str = "docforge_cache_tier_bytes";
const CACHE_EVICTIONS: &str = "docforge_cache_evictions_total";
const CACHE_PROMOTIONS: &str = "docforge_cache_promotions_total";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_gauge!(ALLOCATOR_USED_BYTES, Unit::Bytes, "Bytes held by active reservations");
    describe_gauge!(ALLOCATOR_ACTIVE, Unit::Count, "Active reservations");
    describe_gauge!(ALLOCATOR_QUEUED, Unit::Count, "Requests waiting for admission");
    describe_counter!(RESERVATION_TIMEOUTS, Unit::Count, "Reservations released by the expiry sweep");
    describe_counter!(GC_REQUESTS, Unit::Count, "Garbage collection requests by reason");
    describe_gauge!(PROCESS_RESIDENT_BYTES, Unit::Bytes, "Resident set size of the process");
    describe_counter!(CACHE_LOOKUPS, Unit::Count, "Cache lookups by namespace and result");
    describe_gauge!(CACHE_TIER_BYTES, Unit::Bytes, "Bytes tracked per cache tier");
    describe_counter!(CACHE_EVICTIONS, Unit::Count, "Cache entries evicted per tier");
    describe_counter!(CACHE_PROMOTIONS, Unit::Count, "Disk entries promoted to memory");
}

pub fn record_allocator_state(used_bytes: u64, active: usize, queued: usize) {
    metrics::gauge!(ALLOCATOR_USED_BYTES).set(used_bytes as f64);
    metrics::gauge!(ALLOCATOR_ACTIVE).set(active as f64);
    metrics::gauge!(ALLOCATOR_QUEUED).set(queued as f64);
}

pub fn record_reservation_timeout(kind: &TaskKind) {
    metrics::counter!(RESERVATION_TIMEOUTS, "kind" => kind.to_string()).increment(1);
}

pub fn record_gc_request(reason: GcReason) {
    metrics::counter!(GC_REQUESTS, "reason" => reason.to_string()).increment(1);
}

pub fn record_process_memory(resident_bytes: u64) {
    metrics::gauge!(PROCESS_RESIDENT_BYTES).set(resident_bytes as f64);
}

pub fn record_cache_lookup(namespace: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!(CACHE_LOOKUPS, "namespace" => namespace.to_string(), "result" => result)
        .increment(1);
}

pub fn record_cache_tiers(memory_bytes: u64, disk_bytes: u64) {
    metrics::gauge!(CACHE_TIER_BYTES, "tier" => "memory").set(memory_bytes as f64);
    metrics::gauge!(CACHE_TIER_BYTES, "tier" => "disk").set(disk_bytes as f64);
}

pub fn record_cache_eviction(tier: Tier, count: usize) {
    metrics::counter!(CACHE_EVICTIONS, "tier" => tier.to_string()).increment(count as u64);
}

pub fn record_cache_promotion() {
    metrics::counter!(CACHE_PROMOTIONS).increment(1);
}
