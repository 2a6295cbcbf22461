// Copyright 2024-2026 Docforge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config subcommands: show, defaults, validate.

use crate::config::{self, EffectiveConfig, EnvConfig};

use super::{EXIT_OK, EXIT_WARN};

/// Print the effective config as key-value pairs.
pub fn run_show() {
    let cfg = config::load().effective_config();
    print!("{}", render(&cfg));
}

/// Print default values, ignoring the environment and any config file.
pub fn run_defaults() {
    print!("{}", render(&EnvConfig::default().effective_config()));
}

/// Report suspicious settings. Returns 0 if none are found.
pub fn run_validate() -> i32 {
    validate(&config::load())
}

fn validate(cfg: &EnvConfig) -> i32 {
    let warnings = cfg.warnings();
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        EXIT_OK
    } else {
        EXIT_WARN
    }
}

fn render(cfg: &EffectiveConfig) -> String {
    let mut out = String::new();
    let mut line = |key: &str, value: String| {
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    };
    if let Some(path) = &cfg.config_file {
        line("DOCFORGE_CONFIG", path.display().to_string());
    }
    line("DOCFORGE_MEMORY_BUDGET", cfg.memory_budget.to_string());
    line("DOCFORGE_ADMISSION_FRACTION", cfg.admission_fraction.to_string());
    line("DOCFORGE_GC_THRESHOLD", cfg.gc_threshold.to_string());
    line("DOCFORGE_TASK_TIMEOUT", cfg.task_timeout_secs.to_string());
    line("DOCFORGE_ALLOCATOR_SWEEP_INTERVAL", cfg.allocator_sweep_interval_secs.to_string());
    line("DOCFORGE_MEMORY_MONITOR_INTERVAL", cfg.memory_monitor_interval_secs.to_string());
    line("DOCFORGE_PROCESS_CEILING", cfg.process_ceiling.to_string());
    line("DOCFORGE_CACHE_MEMORY_BUDGET", cfg.cache_memory_budget.to_string());
    line("DOCFORGE_CACHE_DISK_BUDGET", cfg.cache_disk_budget.to_string());
    line("DOCFORGE_CACHE_DISK_THRESHOLD", cfg.cache_disk_threshold.to_string());
    line("DOCFORGE_CACHE_PROMOTION_THRESHOLD", cfg.cache_promotion_threshold.to_string());
    line("DOCFORGE_CACHE_PROMOTION_MAX_SIZE", cfg.cache_promotion_max_size.to_string());
    line("DOCFORGE_CACHE_EVICTION_WATERMARK", cfg.cache_eviction_watermark.to_string());
    line("DOCFORGE_CACHE_DIR", cfg.cache_dir.display().to_string());
    line("DOCFORGE_CACHE_DEFAULT_TTL", cfg.cache_default_ttl_secs.to_string());
    line("DOCFORGE_CACHE_MAINTENANCE_INTERVAL", cfg.cache_maintenance_interval_secs.to_string());
    line("DOCFORGE_SHUTDOWN_TIMEOUT", cfg.shutdown_timeout_secs.to_string());
    line("DOCFORGE_LOG_LEVEL", cfg.log_level.clone());
    line("DOCFORGE_LOG_FORMAT", cfg.log_format.clone());

    let mut ttls: Vec<_> = cfg.cache_namespace_ttls.iter().collect();
    ttls.sort();
    for (namespace, secs) in ttls {
        line(&format!("cache.namespace_ttls.{namespace}"), secs.to_string());
    }
    out
}
