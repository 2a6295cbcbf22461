//! Periodic background work.
//!
//! Each task runs on a tokio interval and stops when its
//! `CancellationToken` is cancelled.

mod worker;

pub use worker::{spawn_allocator_sweeper, spawn_cache_maintenance, spawn_memory_monitor};
