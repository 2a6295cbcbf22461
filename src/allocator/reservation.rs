//! Reservation records tracked against the memory budget.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intermediate buffers of a parse-and-recognize pipeline are roughly
/// twice the input, so callers reserve three times the file size.
pub const PIPELINE_OVERHEAD_FACTOR: u64 = 3;

/// Best-effort reservation size for a parse/OCR pipeline over a file.
pub fn estimate_pipeline_bytes(file_size: u64) -> u64 {
    file_size.saturating_mul(PIPELINE_OVERHEAD_FACTOR)
}

/// Opaque identifier handed to the collaborator that requested a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Nature of the work holding a reservation. Used only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Parsing,
    Recognition,
    Analysis,
    Compilation,
    Custom(String),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsing => f.write_str("parsing"),
            Self::Recognition => f.write_str("recognition"),
            Self::Analysis => f.write_str("analysis"),
            Self::Compilation => f.write_str("compilation"),
            Self::Custom(label) => f.write_str(label),
        }
    }
}

/// Priority level for reservation requests.
///
/// Stored with every reservation but admission stays strictly FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
    Low = 0,
    #[default]
    Medium = 1,
    High = 2,
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }
}

/// A pending or active claim on the memory budget.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: ReservationId,
    pub kind: TaskKind,
    pub size: u64,
    pub priority: Priority,
    pub created_at: Instant,
    /// Set when the reservation leaves the wait queue.
    pub admitted_at: Option<Instant>,
    pub timeout: Duration,
}

impl Reservation {
    pub(crate) fn new(kind: TaskKind, size: u64, priority: Priority, timeout: Duration) -> Self {
        Self {
            id: ReservationId::new(),
            kind,
            size,
            priority,
            created_at: Instant::now(),
            admitted_at: None,
            timeout,
        }
    }

    /// Whether this reservation has outlived its timeout.
    ///
    /// The clock starts when the request arrives, so time spent queued counts.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.age(now) > self.timeout
    }

    /// Time since the request arrived.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}
