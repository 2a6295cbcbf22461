// Copyright 2024-2026 Docforge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Status and sweep subcommands.
//!
//! `status` indexes the disk tier read-only; `sweep` opens it normally, which
//! prunes stale records. Neither starts background tasks.

use crate::config;
use crate::health::{DiagnosticsReport, HealthState};
use crate::{CoreConfig, DocCore};

use super::{EXIT_CRITICAL, EXIT_OK, EXIT_WARN};

/// Print diagnostics. Exit code follows the health state.
///
/// Leaves the disk tier untouched. Allocator figures come from a fresh
/// allocator, not from a running service.
pub fn run_status(json: bool) -> i32 {
    let env = config::load();
    let core = DocCore::inspect(CoreConfig::from(&env));
    let report = core.diagnostics();

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                eprintln!("Failed to encode status: {err}");
                return EXIT_CRITICAL;
            }
        }
    } else {
        print!("{}", render(&report));
    }
    exit_code(report.state)
}

/// Run one cache maintenance pass and print what it cleaned.
pub fn run_sweep() -> i32 {
    let env = config::load();
    let core = DocCore::new(CoreConfig::from(&env));
    let report = core.cache().run_maintenance();
    println!("Cleaned {} entries", report.cleaned());
    println!("  memory expired:   {}", report.memory_expired);
    println!("  disk expired:     {}", report.disk.expired);
    println!("  disk corrupt:     {}", report.disk.corrupt);
    println!("  disk orphaned:    {}", report.disk.orphaned);
    println!("  disk missing:     {}", report.disk.missing);
    println!("  disk bytes:       {}", report.disk.tracked_bytes);
    EXIT_OK
}

fn exit_code(state: HealthState) -> i32 {
    match state {
        HealthState::Healthy => EXIT_OK,
        HealthState::Degraded => EXIT_WARN,
        HealthState::Critical => EXIT_CRITICAL,
    }
}

fn render(report: &DiagnosticsReport) -> String {
    let a = &report.allocator;
    let c = &report.cache;
    let mut out = format!(
        "Docforge Status\n\
         ===============\n\
         Health:        {:?}\n\
         Uptime:        {}s\n\
         \n\
         Allocator (this process)\n\
         \x20 Budget:        {} bytes (admission limit {})\n\
         \x20 Reserved:      {} bytes ({:.1}%)\n\
         \x20 Active:        {}\n\
         \x20 Queued:        {}\n\
         \x20 Timed out:     {}\n\
         \x20 GC requests:   {}\n\
         \n\
         Cache\n\
         \x20 Memory tier:   {} entries, {} / {} bytes\n\
         \x20 Disk tier:     {} entries, {} / {} bytes\n\
         \x20 Hit rate:      {:.1}% ({} hits, {} misses)\n\
         \x20 Evictions:     {}\n\
         \x20 Promotions:    {}\n",
        report.state,
        report.uptime_secs,
        a.total_budget,
        a.admission_limit,
        a.used_bytes,
        a.usage_percent,
        a.active_reservations,
        a.queued_reservations,
        a.timed_out,
        a.gc_requests,
        c.memory_entries,
        c.memory_bytes,
        c.memory_budget,
        c.disk_entries,
        c.disk_bytes,
        c.disk_budget,
        c.hit_rate * 100.0,
        c.hits,
        c.misses,
        c.evictions,
        c.promotions,
    );
    match report.process_resident_bytes {
        Some(rss) => out.push_str(&format!(
            "\nProcess\n  Resident:      {rss} bytes (ceiling {})\n",
            report.process_ceiling
        )),
        None => out.push_str("\nProcess\n  Resident:      unavailable\n"),
    }
    for reason in &report.reasons {
        out.push_str(&format!("\n! {reason}"));
    }
    if !report.reasons.is_empty() {
        out.push('\n');
    }
    out
}
