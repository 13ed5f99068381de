//! Command-line interface and orchestration for gh-inventory
//!
//! This module parses the command line, loads the configuration profile, and wires the
//! engine, platform client and report orchestrators together.
//!
//! # Implementation Model
//!
//! ## Commands
//!
//! - **report**: Produce one or more CSV reports for an enterprise. The requested reports
//!   run concurrently in one process, sharing a single cache and rate governor, while a
//!   monitor task polls the quota pools. Ctrl-C cancels the run.
//! - **rate-limits**: Print the current state of every quota pool
//! - **init**: Generate a default configuration file
//!
//! ## Execution Flow
//!
//! The `run` function parses command-line arguments using clap and routes to the
//! appropriate handler. Handlers initialize logging, select a profile from the TOML
//! configuration, merge command-line overrides into it, and only then touch the network.
//!
//! Logging goes through `env_logger` when `--log-level` asks for it. Otherwise a delayed
//! progress bar shows per-report item counts, and important notices such as rate-limit
//! waits are printed above it.

mod common;
mod config;
mod host;
mod init;
mod progress_reporter;
mod rate_limits;
mod report;
mod run;

#[cfg(debug_assertions)]
pub use config::{Config, Profile};

pub use host::Host;
pub use init::{InitArgs, init_config};
pub use progress_reporter::ProgressReporter;
pub use rate_limits::{RateLimitsArgs, show_rate_limits};
pub use report::{ReportArgs, ReportOutcome, generate_reports, run_reports};
pub use run::run;
