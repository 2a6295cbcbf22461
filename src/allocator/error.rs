//! Allocator error types.
//!
//! Only malformed or unsatisfiable requests surface here. Contention is
//! expressed as waiting, never as an error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error("Invalid reservation size: {0} bytes (must be positive)")]
    InvalidSize(u64),

    #[error("Operation exceeds available memory budget: requested {requested} bytes, limit {limit} bytes")]
    ExceedsBudget { requested: u64, limit: u64 },

    #[error("Allocator is shutting down")]
    ShuttingDown,
}

impl AllocatorError {
    /// Returns true if the caller supplied input that can never succeed.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidSize(_) | Self::ExceedsBudget { .. })
    }
}
