//! Configuration loading from a TOML file and environment variables.
//!
//! Values start at their defaults, are overridden by the file named in
//! `DOCFORGE_CONFIG` (if any), then by `DOCFORGE_*` environment variables.
//! Invalid values fall back to the previous layer without crashing, and
//! floors are applied last.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `DOCFORGE_CONFIG` | unset | Path of a TOML config file |
//! | `DOCFORGE_MEMORY_BUDGET` | 2147483648 | Allocator budget (bytes) |
//! | `DOCFORGE_ADMISSION_FRACTION` | 0.9 | Share of the budget admissions may fill |
//! | `DOCFORGE_GC_THRESHOLD` | 0.8 | Usage share that triggers GC on release |
//! | `DOCFORGE_TASK_TIMEOUT` | 600 | Default reservation timeout (secs) |
//! | `DOCFORGE_ALLOCATOR_SWEEP_INTERVAL` | 30 | Expiry sweep period (secs) |
//! | `DOCFORGE_MEMORY_MONITOR_INTERVAL` | 60 | Process memory sampling period (secs) |
//! | `DOCFORGE_PROCESS_CEILING` | 3221225472 | Process memory ceiling (bytes) |
//! | `DOCFORGE_CACHE_MEMORY_BUDGET` | 536870912 | Memory tier budget (bytes) |
//! | `DOCFORGE_CACHE_DISK_BUDGET` | 5368709120 | Disk tier budget (bytes) |
//! | `DOCFORGE_CACHE_DISK_THRESHOLD` | 10485760 | Size routed to disk (bytes) |
//! | `DOCFORGE_CACHE_PROMOTION_THRESHOLD` | 5 | Disk accesses before promotion |
//! | `DOCFORGE_CACHE_PROMOTION_MAX_SIZE` | 52428800 | Largest promotable entry (bytes) |
//! | `DOCFORGE_CACHE_EVICTION_WATERMARK` | 0.8 | Eviction target share |
//! | `DOCFORGE_CACHE_DIR` | ./cache | Disk tier root |
//! | `DOCFORGE_CACHE_DEFAULT_TTL` | 3600 | TTL for unlisted namespaces (secs) |
//! | `DOCFORGE_CACHE_MAINTENANCE_INTERVAL` | 900 | Cache sweep period (secs) |
//! | `DOCFORGE_SHUTDOWN_TIMEOUT` | 30 | Background task drain timeout (secs) |
//! | `DOCFORGE_LOG_LEVEL` | info | Log filter directive |
//! | `DOCFORGE_LOG_FORMAT` | json | `json` or `pretty` |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::allocator::AllocatorConfig;
use crate::cache::CacheConfig;
use crate::telemetry::{LogConfig, LogFormat};

const MIB: u64 = 1024 * 1024;

pub const CONFIG_PATH_VAR: &str = "DOCFORGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub config_file: Option<PathBuf>,
    pub memory_budget: u64,
    pub admission_fraction: f64,
    pub gc_threshold: f64,
    pub task_timeout_secs: u64,
    pub allocator_sweep_interval_secs: u64,
    pub memory_monitor_interval_secs: u64,
    pub process_ceiling: u64,
    pub cache_memory_budget: u64,
    pub cache_disk_budget: u64,
    pub cache_disk_threshold: u64,
    pub cache_promotion_threshold: u64,
    pub cache_promotion_max_size: u64,
    pub cache_eviction_watermark: f64,
    pub cache_dir: PathBuf,
    pub cache_default_ttl_secs: u64,
    pub cache_maintenance_interval_secs: u64,
    pub cache_namespace_ttls: HashMap<String, u64>,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: String,
}

/// All configuration after layering.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub allocator: AllocatorConfig,
    pub cache: CacheConfig,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
    /// File that was layered in, if one loaded successfully.
    pub config_file: Option<PathBuf>,
    /// Set when `DOCFORGE_CONFIG` named a file that could not be used.
    pub file_error: Option<String>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            allocator: AllocatorConfig::default(),
            cache: CacheConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            log: LogConfig::default(),
            config_file: None,
            file_error: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AllocatorSection {
    total_budget: Option<u64>,
    admission_fraction: Option<f64>,
    gc_threshold: Option<f64>,
    default_timeout_secs: Option<u64>,
    maintenance_interval_secs: Option<u64>,
    monitor_interval_secs: Option<u64>,
    process_ceiling: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    memory_budget: Option<u64>,
    disk_budget: Option<u64>,
    disk_threshold: Option<u64>,
    promotion_threshold: Option<u64>,
    promotion_max_size: Option<u64>,
    eviction_watermark: Option<f64>,
    disk_root: Option<PathBuf>,
    default_ttl_secs: Option<u64>,
    maintenance_interval_secs: Option<u64>,
    namespace_ttls: HashMap<String, u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
    format: Option<String>,
    file: Option<PathBuf>,
}

/// Shape of the TOML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    allocator: AllocatorSection,
    cache: CacheSection,
    log: LogSection,
    shutdown_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    fn apply(self, cfg: &mut EnvConfig) {
        let a = self.allocator;
        let alloc = &mut cfg.allocator;
        set(&mut alloc.total_budget, a.total_budget);
        set(&mut alloc.admission_fraction, a.admission_fraction);
        set(&mut alloc.gc_threshold, a.gc_threshold);
        set_secs(&mut alloc.default_timeout, a.default_timeout_secs);
        set_secs(&mut alloc.maintenance_interval, a.maintenance_interval_secs);
        set_secs(&mut alloc.monitor_interval, a.monitor_interval_secs);
        set(&mut alloc.process_ceiling, a.process_ceiling);

        let c = self.cache;
        let cache = &mut cfg.cache;
        set(&mut cache.memory_budget, c.memory_budget);
        set(&mut cache.disk_budget, c.disk_budget);
        set(&mut cache.disk_threshold, c.disk_threshold);
        set(&mut cache.promotion_threshold, c.promotion_threshold);
        set(&mut cache.promotion_max_size, c.promotion_max_size);
        set(&mut cache.eviction_watermark, c.eviction_watermark);
        set(&mut cache.disk_root, c.disk_root);
        set_secs(&mut cache.default_ttl, c.default_ttl_secs);
        set_secs(&mut cache.maintenance_interval, c.maintenance_interval_secs);
        for (namespace, secs) in c.namespace_ttls {
            cache.namespace_ttls.insert(namespace, Duration::from_secs(secs));
        }

        set(&mut cfg.log.level, self.log.level);
        if let Some(format) = self.log.format.as_deref().and_then(LogFormat::parse) {
            cfg.log.format = format;
        }
        cfg.log.output_path = self.log.file.or(cfg.log.output_path.take());
        set_secs(&mut cfg.shutdown_timeout, self.shutdown_timeout_secs);
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_secs(slot: &mut Duration, secs: Option<u64>) {
    if let Some(secs) = secs {
        *slot = Duration::from_secs(secs);
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse an `f64` env var, returning `default` on missing or invalid.
fn parse_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<f64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_u64(key, default.as_secs()))
}

/// Keep `value` if it is a share in (0, 1], otherwise `default`.
fn fraction_or(value: f64, default: f64) -> f64 {
    if value > 0.0 && value <= 1.0 {
        value
    } else {
        default
    }
}

fn apply_env(cfg: &mut EnvConfig) {
    let alloc = &mut cfg.allocator;
    alloc.total_budget = parse_u64("DOCFORGE_MEMORY_BUDGET", alloc.total_budget);
    alloc.admission_fraction = parse_f64("DOCFORGE_ADMISSION_FRACTION", alloc.admission_fraction);
    alloc.gc_threshold = parse_f64("DOCFORGE_GC_THRESHOLD", alloc.gc_threshold);
    alloc.default_timeout = parse_secs("DOCFORGE_TASK_TIMEOUT", alloc.default_timeout);
    alloc.maintenance_interval =
        parse_secs("DOCFORGE_ALLOCATOR_SWEEP_INTERVAL", alloc.maintenance_interval);
    alloc.monitor_interval = parse_secs("DOCFORGE_MEMORY_MONITOR_INTERVAL", alloc.monitor_interval);
    alloc.process_ceiling = parse_u64("DOCFORGE_PROCESS_CEILING", alloc.process_ceiling);

    let cache = &mut cfg.cache;
    cache.memory_budget = parse_u64("DOCFORGE_CACHE_MEMORY_BUDGET", cache.memory_budget);
    cache.disk_budget = parse_u64("DOCFORGE_CACHE_DISK_BUDGET", cache.disk_budget);
    cache.disk_threshold = parse_u64("DOCFORGE_CACHE_DISK_THRESHOLD", cache.disk_threshold);
    cache.promotion_threshold =
        parse_u64("DOCFORGE_CACHE_PROMOTION_THRESHOLD", cache.promotion_threshold);
    cache.promotion_max_size =
        parse_u64("DOCFORGE_CACHE_PROMOTION_MAX_SIZE", cache.promotion_max_size);
    cache.eviction_watermark =
        parse_f64("DOCFORGE_CACHE_EVICTION_WATERMARK", cache.eviction_watermark);
    if let Ok(dir) = std::env::var("DOCFORGE_CACHE_DIR") {
        if !dir.trim().is_empty() {
            cache.disk_root = PathBuf::from(dir);
        }
    }
    cache.default_ttl = parse_secs("DOCFORGE_CACHE_DEFAULT_TTL", cache.default_ttl);
    cache.maintenance_interval =
        parse_secs("DOCFORGE_CACHE_MAINTENANCE_INTERVAL", cache.maintenance_interval);

    cfg.shutdown_timeout = parse_secs("DOCFORGE_SHUTDOWN_TIMEOUT", cfg.shutdown_timeout);
    if let Ok(level) = std::env::var("DOCFORGE_LOG_LEVEL") {
        if !level.trim().is_empty() {
            cfg.log.level = level;
        }
    }
    if let Some(format) = std::env::var("DOCFORGE_LOG_FORMAT")
        .ok()
        .as_deref()
        .and_then(LogFormat::parse)
    {
        cfg.log.format = format;
    }
}

/// Apply floors and replace out-of-range shares with defaults.
fn apply_floors(cfg: &mut EnvConfig) {
    let defaults = AllocatorConfig::default();
    let alloc = &mut cfg.allocator;
    alloc.total_budget = alloc.total_budget.max(MIB); // floor: 1 MiB
    alloc.admission_fraction = fraction_or(alloc.admission_fraction, defaults.admission_fraction);
    alloc.gc_threshold = fraction_or(alloc.gc_threshold, defaults.gc_threshold);
    alloc.default_timeout = alloc.default_timeout.max(Duration::from_secs(1));
    alloc.maintenance_interval = alloc.maintenance_interval.max(Duration::from_secs(1));
    alloc.monitor_interval = alloc.monitor_interval.max(Duration::from_secs(1));
    alloc.process_ceiling = alloc.process_ceiling.max(alloc.total_budget);

    let cache_defaults = CacheConfig::default();
    let cache = &mut cfg.cache;
    cache.memory_budget = cache.memory_budget.max(MIB);
    cache.disk_budget = cache.disk_budget.max(MIB);
    cache.disk_threshold = cache.disk_threshold.max(1);
    cache.eviction_watermark =
        fraction_or(cache.eviction_watermark, cache_defaults.eviction_watermark);
    cache.default_ttl = cache.default_ttl.max(Duration::from_secs(1));
    cache.maintenance_interval = cache.maintenance_interval.max(Duration::from_secs(1));

    cfg.shutdown_timeout = cfg.shutdown_timeout.max(Duration::from_secs(1));
}

/// Load configuration from the file named by `DOCFORGE_CONFIG` and the environment.
///
/// An unusable config file is logged and skipped.
pub fn load() -> EnvConfig {
    let path = std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from);
    load_with_file(path.as_deref())
}

/// Like [`load`] with an explicit config file.
pub fn load_with_file(path: Option<&Path>) -> EnvConfig {
    let mut cfg = EnvConfig::default();
    if let Some(path) = path {
        match FileConfig::read(path) {
            Ok(file) => {
                file.apply(&mut cfg);
                cfg.config_file = Some(path.to_path_buf());
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring config file");
                cfg.file_error = Some(err.to_string());
            }
        }
    }
    apply_env(&mut cfg);
    apply_floors(&mut cfg);
    cfg
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let a = &self.allocator;
        let c = &self.cache;
        EffectiveConfig {
            config_file: self.config_file.clone(),
            memory_budget: a.total_budget,
            admission_fraction: a.admission_fraction,
            gc_threshold: a.gc_threshold,
            task_timeout_secs: a.default_timeout.as_secs(),
            allocator_sweep_interval_secs: a.maintenance_interval.as_secs(),
            memory_monitor_interval_secs: a.monitor_interval.as_secs(),
            process_ceiling: a.process_ceiling,
            cache_memory_budget: c.memory_budget,
            cache_disk_budget: c.disk_budget,
            cache_disk_threshold: c.disk_threshold,
            cache_promotion_threshold: c.promotion_threshold,
            cache_promotion_max_size: c.promotion_max_size,
            cache_eviction_watermark: c.eviction_watermark,
            cache_dir: c.disk_root.clone(),
            cache_default_ttl_secs: c.default_ttl.as_secs(),
            cache_maintenance_interval_secs: c.maintenance_interval.as_secs(),
            cache_namespace_ttls: c
                .namespace_ttls
                .iter()
                .map(|(ns, ttl)| (ns.clone(), ttl.as_secs()))
                .collect(),
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_level: self.log.level.clone(),
            log_format: self.log.format.as_str().to_string(),
        }
    }

    /// Combinations that load fine but are probably mistakes.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(err) = &self.file_error {
            warnings.push(err.clone());
        }
        let a = &self.allocator;
        let c = &self.cache;
        if c.memory_budget > a.total_budget {
            warnings.push(format!(
                "cache memory budget ({}) exceeds allocator budget ({})",
                c.memory_budget, a.total_budget
            ));
        }
        if a.gc_threshold > a.admission_fraction {
            warnings.push(format!(
                "GC threshold ({}) is above the admission fraction ({}); GC will never trigger on release",
                a.gc_threshold, a.admission_fraction
            ));
        }
        if c.promotion_max_size > c.memory_budget {
            warnings.push(format!(
                "promotion ceiling ({}) exceeds cache memory budget ({})",
                c.promotion_max_size, c.memory_budget
            ));
        }
        if c.disk_threshold > c.disk_budget {
            warnings.push(format!(
                "disk threshold ({}) exceeds disk budget ({}); large payloads cannot be cached",
                c.disk_threshold, c.disk_budget
            ));
        }
        warnings
    }
}
