// Copyright 2024-2026 Docforge Contributors
// SPDX-License-Identifier: Apache-2.0

//! `docforge-cli` entry point.
//!
//! ## Subcommands
//!
//! - `docforge-cli config show|defaults|validate` - configuration
//! - `docforge-cli status [--json]` - diagnostics (exit 0/1/2)
//! - `docforge-cli sweep` - one cache maintenance pass
//! - `docforge-cli version` / `help`

use std::process::ExitCode;

use docforge_core::cli::{config_cmd, run_status, run_sweep};
use docforge_core::config;
use docforge_core::telemetry::{self, LogFormat};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    init_logging();
    telemetry::init_metrics();

    let code = match command {
        "status" => {
            let json_output = args.iter().skip(2).any(|a| a == "--json");
            run_status(json_output)
        }
        "sweep" => run_sweep(),
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    0
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    0
                }
                "validate" => config_cmd::run_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {subcommand}");
                    print_usage();
                    2
                }
            }
        }
        "version" | "--version" | "-V" => {
            println!("docforge-cli {}", env!("CARGO_PKG_VERSION"));
            0
        }
        "help" | "--help" | "-h" => {
            print_usage();
            0
        }
        _ => {
            eprintln!("Unknown command: {command}");
            print_usage();
            2
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(2))
}

/// Logs go to stderr so command output on stdout stays parseable.
fn init_logging() {
    let mut log = config::load().log;
    if std::env::var_os("DOCFORGE_LOG_FORMAT").is_none() {
        log.format = LogFormat::Pretty;
        log.level = std::env::var("DOCFORGE_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
    }
    if let Err(e) = telemetry::init_logging(&log) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

fn print_usage() {
    eprintln!(
        "docforge-cli v{}

USAGE:
    docforge-cli <COMMAND> [OPTIONS]

COMMANDS:
    status [--json]     Show cache diagnostics; reads the disk tier without
                        deleting anything. Allocator figures are for this
                        process only
    sweep               Run one cache maintenance pass; deletes expired,
                        corrupt and orphaned disk records
    config show         Print effective configuration
    config defaults     Print default configuration
    config validate     Check configuration for likely mistakes
    version             Show version information
    help                Show this help message

ENVIRONMENT:
    DOCFORGE_CONFIG     Path of a TOML config file
    DOCFORGE_CACHE_DIR  Disk cache root (default: ./cache)
    DOCFORGE_LOG_LEVEL  Log filter (default: warn for the CLI)
    DOCFORGE_LOG_FORMAT json or pretty

EXIT CODES:
    0  Success / Healthy
    1  Warnings / Degraded
    2  Usage error / Critical
",
        env!("CARGO_PKG_VERSION")
    );
}
