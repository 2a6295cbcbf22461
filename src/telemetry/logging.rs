//! Tracing subscriber setup for the library and the CLI.
//!
//! Records go to stderr unless a log file is configured. Library code only
//! emits events; installing a subscriber is left to the binary.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human output.
    Pretty,
}

impl LogFormat {
    /// Accepts `json`, `pretty` or `text`, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `warn,docforge_core::cache=debug`.
    pub level: String,
    /// Appended to when set.
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("bad log filter {directive:?}: {reason}")]
    InvalidFilter { directive: String, reason: String },
    #[error("cannot open log file {}: {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Install the process-wide subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| LogError::InvalidFilter {
        directive: config.level.clone(),
        reason: e.to_string(),
    })?;
    let writer = match &config.output_path {
        Some(path) => file_writer(path)?,
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(fmt::layer().json().with_writer(writer)).try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(false).with_writer(writer))
            .try_init(),
    };
    installed.map_err(|_| LogError::AlreadyInitialized)
}

fn file_writer(path: &Path) -> Result<BoxMakeWriter, LogError> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
        assert_eq!(LogFormat::Pretty.as_str(), "pretty");
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").join("core.log");
        let config = LogConfig {
            output_path: Some(missing.clone()),
            ..LogConfig::default()
        };
        match init_logging(&config) {
            Err(LogError::FileOpen { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected FileOpen, got {other:?}"),
        }
    }

    #[test]
    fn bad_filter_names_the_directive() {
        let config = LogConfig {
            level: "docforge_core=verbose".to_string(),
            ..LogConfig::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(err.to_string().contains("docforge_core=verbose"));
    }
}
