//! Memory-budgeted task allocation.
//!
//! Collaborators reserve an estimated footprint before heavy work (parsing,
//! recognition, aggregation) and release it afterwards. Requests that do not
//! fit wait in FIFO order; stale reservations are reclaimed by a periodic
//! sweep.

mod budget;
mod error;
mod gc;
mod probe;
mod reservation;

pub use budget::{AllocatorConfig, AllocatorStats, ReservationGuard, ResourceAllocator};
pub use error::AllocatorError;
pub use gc::{GcHook, GcReason, LoggingGc};
pub use probe::{MemoryProbe, ProcessMemoryProbe};
pub use reservation::{
    estimate_pipeline_bytes, Priority, Reservation, ReservationId, TaskKind,
    PIPELINE_OVERHEAD_FACTOR,
};
