//! Arguments and setup shared by every command.

use super::ProgressReporter;
use super::config::{Config, Profile};
use crate::Result;
use crate::engine::Progress;
use camino::Utf8PathBuf;
use clap::{Args, ValueEnum};
use core::time::Duration;
use ohno::app_err;
use std::io::{IsTerminal, stderr};
use std::sync::Arc;

/// Color mode configuration for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Always use colors
    Always,

    /// Never use colors
    Never,

    /// Use colors if the output is a terminal, otherwise don't use colors
    Auto,
}

impl ColorMode {
    fn use_colors(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => stderr().is_terminal(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    None,

    /// Only error messages
    Error,

    /// Warning and error messages
    Warn,

    /// Info, warning, and error messages
    Info,

    /// Debug, info, warning, and error messages
    Debug,

    /// Trace, debug, info, warning, and error messages
    Trace,
}

/// Options accepted by every command
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to the configuration file (default is `<config dir>/gh-inventory/config.toml`)
    #[arg(long, short = 'c', value_name = "PATH", global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Configuration profile to use (default is the file's `default_profile`)
    #[arg(long, short = 'p', value_name = "NAME", global = true)]
    pub profile: Option<String>,

    /// Set the logging level for diagnostic output
    #[arg(long, value_name = "LEVEL", default_value = "none", global = true)]
    pub log_level: LogLevel,

    /// Control when to use colored output
    #[arg(long, value_name = "WHEN", default_value = "auto", global = true)]
    pub color: ColorMode,
}

/// Token argument shared by the commands that talk to GitHub
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// GitHub personal access token
    #[arg(long, value_name = "TOKEN", env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl TokenArgs {
    pub fn require(&self) -> Result<&str> {
        self.token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| app_err!("no GitHub token supplied: pass --token or set GITHUB_TOKEN"))
    }
}

impl GlobalArgs {
    /// Load the configuration and select the requested profile
    pub fn load_profile(&self) -> Result<(String, Profile)> {
        let config = Config::load(self.config.as_deref())?;
        config.profile(self.profile.as_deref())
    }

    /// Initialize logger based on log level
    ///
    /// Only the first call has any effect.
    pub fn init_logging(&self) {
        let level = match self.log_level {
            LogLevel::None => return,
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        let env = env_logger::Env::default().filter_or("RUST_LOG", level);

        let _ = env_logger::Builder::from_env(env)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(matches!(self.log_level, LogLevel::Debug | LogLevel::Trace))
            .try_init();
    }

    /// The progress display for long-running commands.
    ///
    /// The bar stays hidden for a short while so quick runs print nothing, and never shows
    /// when log output is enabled since the two would interleave.
    pub fn progress(&self) -> Arc<dyn Progress> {
        let delay = if self.log_level == LogLevel::None {
            Duration::from_millis(300)
        } else {
            Duration::from_hours(365 * 24)
        };

        Arc::new(ProgressReporter::new(delay, self.color.use_colors()))
    }
}
