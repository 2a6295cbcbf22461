//! Health and diagnostics reporting.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::allocator::{AllocatorConfig, AllocatorStats};
use crate::cache::CacheStats;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    /// Usage above the GC threshold, requests queued, or shutting down.
    Degraded,
    /// Process memory above the hard ceiling.
    Critical,
}

/// Full diagnostics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub state: HealthState,
    pub reasons: Vec<String>,
    pub shutdown_state: ShutdownState,
    pub allocator: AllocatorStats,
    pub cache: CacheStats,
    pub process_resident_bytes: Option<u64>,
    pub process_ceiling: u64,
    pub background_tasks: usize,
    pub uptime_secs: u64,
}

/// Inputs gathered from the running components.
#[derive(Debug, Clone)]
pub struct HealthInputs {
    pub shutdown_state: ShutdownState,
    pub allocator: AllocatorStats,
    pub cache: CacheStats,
    pub process_resident_bytes: Option<u64>,
    pub background_tasks: usize,
}

/// Turns component snapshots into a [`DiagnosticsReport`].
pub struct HealthChecker {
    gc_trigger_bytes: u64,
    process_ceiling: u64,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            gc_trigger_bytes: config.gc_trigger_bytes(),
            process_ceiling: config.process_ceiling,
            start_time: Instant::now(),
        }
    }

    pub fn report(&self, inputs: HealthInputs) -> DiagnosticsReport {
        let (state, reasons) = self.compute_state(&inputs);
        DiagnosticsReport {
            state,
            reasons,
            shutdown_state: inputs.shutdown_state,
            allocator: inputs.allocator,
            cache: inputs.cache,
            process_resident_bytes: inputs.process_resident_bytes,
            process_ceiling: self.process_ceiling,
            background_tasks: inputs.background_tasks,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, inputs: &HealthInputs) -> (HealthState, Vec<String>) {
        let mut reasons = Vec::new();
        let mut state = HealthState::Healthy;

        if let Some(resident) = inputs.process_resident_bytes {
            if resident > self.process_ceiling {
                reasons.push(format!(
                    "process memory {resident} bytes above ceiling {}",
                    self.process_ceiling
                ));
                state = HealthState::Critical;
            }
        }
        if inputs.shutdown_state != ShutdownState::Running {
            reasons.push(format!("shutdown state is {:?}", inputs.shutdown_state));
        }
        if inputs.allocator.used_bytes > self.gc_trigger_bytes {
            reasons.push(format!(
                "reserved {} bytes above GC threshold {}",
                inputs.allocator.used_bytes, self.gc_trigger_bytes
            ));
        }
        if inputs.allocator.queued_reservations > 0 {
            reasons.push(format!(
                "{} reservations waiting for admission",
                inputs.allocator.queued_reservations
            ));
        }
        if state == HealthState::Healthy && !reasons.is_empty() {
            state = HealthState::Degraded;
        }
        (state, reasons)
    }
}
