//! Command dispatch logic for gh-inventory

use super::common::GlobalArgs;
use super::{InitArgs, RateLimitsArgs, ReportArgs, generate_reports, init_config, show_rate_limits};
use crate::{Host, Result};
use clap::builder::Styles;
use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand};

const CLAP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

#[derive(Parser, Debug)]
#[command(name = "gh-inventory", version, author, long_about = None)]
#[command(about = "Inventory a GitHub enterprise account into CSV reports")]
#[command(styles = CLAP_STYLES)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce CSV reports for an enterprise
    Report(Box<ReportArgs>),
    /// Show the current state of the API quota pools
    RateLimits(RateLimitsArgs),
    /// Generate a default configuration file
    Init(InitArgs),
}

/// Dispatch command-line arguments to the appropriate handler
///
/// # Arguments
///
/// * `args` - An iterator of command-line arguments (typically from `std::env::args()`)
///
/// # Errors
///
/// Returns an error if command parsing fails or if the executed command fails
pub async fn run<I, T, H>(host: &mut H, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
    H: Host,
{
    let cli = Cli::parse_from(args);

    match &cli.command {
        Command::Report(report_args) => generate_reports(host, &cli.global, report_args).await,
        Command::RateLimits(rate_args) => show_rate_limits(host, &cli.global, rate_args).await,
        Command::Init(init_args) => init_config(host, init_args),
    }
}
