// Copyright 2024-2026 Docforge Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for `docforge-cli`.
//!
//! Every command works in-process against the configured cache directory;
//! there is no daemon to connect to.
//!
//! ## Usage
//!
//! ```bash
//! docforge-cli config show      # Effective configuration
//! docforge-cli status --json    # Diagnostics as JSON
//! docforge-cli sweep            # One cache maintenance pass
//! ```

pub mod config_cmd;
pub mod status;

pub use status::{run_status, run_sweep};

/// Exit code for a healthy result.
pub const EXIT_OK: i32 = 0;
/// Exit code for warnings or a degraded state.
pub const EXIT_WARN: i32 = 1;
/// Exit code for a critical state.
pub const EXIT_CRITICAL: i32 = 2;
