//! Process memory sampling for the allocator's monitor.

/// Source of process-level resident memory samples.
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes, or `None` when the platform cannot tell.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads `VmRSS` from `/proc/self/status` on Linux.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        current_rss_bytes()
    }
}

#[cfg(target_os = "linux")]
fn current_rss_bytes() -> Option<u64> {
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => status,
        Err(err) => {
            // `/proc` may be hidden in sandboxes.
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(error = %err, "failed to read /proc/self/status");
            }
            return None;
        }
    };
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn current_rss_bytes() -> Option<u64> {
    None
}

/// Extract `VmRSS` (reported in kB) from a `/proc/<pid>/status` body.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status
        .lines()
        .map(str::trim_start)
        .find(|line| line.starts_with("VmRSS:"))?;
    let kb = line.strip_prefix("VmRSS:")?.split_whitespace().next()?;
    match kb.parse::<u64>() {
        Ok(kb) => Some(kb.saturating_mul(1024)),
        Err(err) => {
            tracing::debug!(value = kb, error = %err, "unparseable VmRSS");
            None
        }
    }
}
