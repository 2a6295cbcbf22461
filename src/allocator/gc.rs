//! Best-effort garbage collection hints.
//!
//! Rust has no collector to force, so a hook gets the chance to drop
//! whatever it can (trim caches, reset arenas). Correctness never depends
//! on a hook doing anything.

use std::fmt;

/// Why the allocator asked for a collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    /// Usage was above the GC threshold right before a release.
    ReleaseAboveThreshold,
    /// Sampled process memory exceeded the hard ceiling.
    ProcessCeiling,
}

impl fmt::Display for GcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReleaseAboveThreshold => f.write_str("release_above_threshold"),
            Self::ProcessCeiling => f.write_str("process_ceiling"),
        }
    }
}

/// Receiver of collection hints.
pub trait GcHook: Send + Sync {
    fn collect(&self, reason: GcReason);
}

impl<F> GcHook for F
where
    F: Fn(GcReason) + Send + Sync,
{
    fn collect(&self, reason: GcReason) {
        self(reason)
    }
}

/// Default hook: records the request and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingGc;

impl GcHook for LoggingGc {
    fn collect(&self, reason: GcReason) {
        tracing::debug!(%reason, "gc hint received; no collector installed");
    }
}
