use super::Host;
use super::common::{GlobalArgs, TokenArgs};
use super::config::Profile;
use crate::Result;
use crate::engine::{
    InventoryError, RateGovernor, ReportSummary, RequestTracker, RunContext, TopicStatus, ensure_rate_limits, monitor_rate_limits,
};
use crate::platform::{GitHubClient, Platform};
use crate::reports::{Inventory, InventorySettings, ReportKind};
use camino::Utf8PathBuf;
use clap::Parser;
use core::num::{NonZeroU32, NonZeroUsize};
use core::str::FromStr;
use core::time::Duration;
use futures_util::future::join_all;
use ohno::{app_err, bail};
use std::io::Write;
use std::sync::Arc;
use strum::IntoEnumIterator;

const LOG_TARGET: &str = "    report";

const ALL: &str = "all";

#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Reports to produce (organizations, repositories, teams, collaborators, users), or `all`
    #[arg(value_name = "KIND", required = true)]
    pub reports: Vec<String>,

    /// Enterprise slug (overrides the profile)
    #[arg(long, value_name = "SLUG")]
    pub enterprise: Option<String>,

    #[command(flatten)]
    pub token: TokenArgs,

    /// Directory that receives the CSV reports (overrides the profile)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<Utf8PathBuf>,

    /// Concurrent workers per pipeline stage (overrides the profile)
    #[arg(long, value_name = "N")]
    pub workers: Option<NonZeroUsize>,

    /// Items admitted per second per report (overrides the profile)
    #[arg(long, value_name = "N")]
    pub requests_per_second: Option<NonZeroU32>,
}

/// Outcome of one report in a run.
pub type ReportOutcome = (ReportKind, core::result::Result<ReportSummary, InventoryError>);

pub async fn generate_reports<H: Host>(host: &mut H, global: &GlobalArgs, args: &ReportArgs) -> Result<()> {
    global.init_logging();

    let kinds = selected_kinds(&args.reports)?;
    let (profile_name, profile) = global.load_profile()?;
    let settings = inventory_settings(&profile, args)?;
    let output_dir = settings.output_dir.clone();

    log::info!(
        target: LOG_TARGET,
        "Inventorying enterprise '{}' with profile '{profile_name}' into '{output_dir}'",
        settings.enterprise
    );

    let client = Arc::new(GitHubClient::new(args.token.require()?, &profile.api_url, &profile.graphql_url)?);

    let progress = global.progress();
    progress.set_phase("Inventory");
    let topics: Vec<&'static str> = kinds.iter().map(|kind| kind.name()).collect();
    let tracker = RequestTracker::new(&progress, &topics);

    let governor = Arc::new(RateGovernor::new(Arc::clone(&client), profile.governor_settings()).with_tracker(tracker.clone()));
    let ctx = RunContext::new().with_tracker(tracker);
    let inventory = Inventory::new(client, governor, settings);

    ensure_rate_limits(ctx.token(), inventory.governor()).await;

    let (outcomes, interrupted) = run_reports(&inventory, &ctx, &kinds, profile.monitor_interval).await;
    progress.done();

    let incomplete = ctx.is_cancelled();
    let mut failed = 0usize;
    for (kind, outcome) in &outcomes {
        match outcome {
            Ok(summary) => {
                let _ = writeln!(
                    host.output(),
                    "{kind}: {} row(s) written to '{}', {} item(s) skipped{}",
                    summary.rows_written,
                    output_dir.join(kind.file_name()),
                    summary.items_failed,
                    if incomplete { " (incomplete)" } else { "" }
                );
            }
            Err(e) => {
                failed += 1;
                let _ = writeln!(host.error(), "{kind}: failed: {e}");
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} report(s) failed", outcomes.len());
    }

    if interrupted {
        bail!("interrupted, reports are incomplete");
    }

    Ok(())
}

/// Run `kinds` side by side, sharing the inventory's cache and governor.
///
/// The quota monitor runs alongside the reports and stops when they are done. Ctrl-C
/// cancels the run; the second return value tells whether that happened.
pub async fn run_reports<P: Platform>(
    inventory: &Inventory<P>,
    ctx: &RunContext,
    kinds: &[ReportKind],
    monitor_interval: Duration,
) -> (Vec<ReportOutcome>, bool) {
    let finished = ctx.token().child_token();

    let reports = async {
        let outcomes = join_all(kinds.iter().map(|&kind| async move {
            let outcome = inventory.run_report(kind, ctx).await;
            if let Some(tracker) = ctx.tracker() {
                tracker.set_topic_status(kind.name(), TopicStatus::Done);
            }
            (kind, outcome)
        }))
        .await;

        finished.cancel();
        outcomes
    };

    let interrupt = async {
        tokio::select! {
            biased;
            () = finished.cancelled() => false,
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    log::warn!(target: LOG_TARGET, "Interrupted, stopping");
                    if let Some(tracker) = ctx.tracker() {
                        tracker.println("Interrupted, stopping...");
                    }
                    ctx.cancel();
                    true
                }
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Could not listen for Ctrl-C: {e}");
                    finished.cancelled().await;
                    false
                }
            },
        }
    };

    let (outcomes, (), interrupted) = tokio::join!(reports, monitor_rate_limits(&finished, inventory.governor(), monitor_interval), interrupt);
    (outcomes, interrupted)
}

/// Resolve report names, expanding `all`. Duplicates are dropped, order is kept.
fn selected_kinds(names: &[String]) -> Result<Vec<ReportKind>> {
    let mut kinds = Vec::new();
    for name in names {
        let requested: Vec<ReportKind> = if name.eq_ignore_ascii_case(ALL) {
            ReportKind::iter().collect()
        } else {
            let Ok(kind) = ReportKind::from_str(&name.to_ascii_lowercase()) else {
                let known: Vec<&str> = ReportKind::iter().map(ReportKind::name).collect();
                bail!("unknown report '{name}', expected one of: {}, or {ALL}", known.join(", "));
            };
            vec![kind]
        };

        for kind in requested {
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }

    Ok(kinds)
}

/// Merge the profile with command-line overrides.
fn inventory_settings(profile: &Profile, args: &ReportArgs) -> Result<InventorySettings> {
    let enterprise = args
        .enterprise
        .clone()
        .or_else(|| profile.enterprise.clone())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| app_err!("no enterprise given: pass --enterprise or set `enterprise` in the profile"))?;

    let workers = match args.workers {
        Some(workers) => workers,
        None => NonZeroUsize::new(profile.workers).ok_or_else(|| app_err!("workers must be at least 1"))?,
    };

    let requests_per_second = match args.requests_per_second {
        Some(rate) => rate,
        None => NonZeroU32::new(profile.requests_per_second).ok_or_else(|| app_err!("requests_per_second must be at least 1"))?,
    };

    Ok(InventorySettings {
        enterprise,
        output_dir: args.output_dir.clone().unwrap_or_else(|| profile.output_dir.clone()),
        workers,
        requests_per_second,
        retry: profile.retry_policy(),
        dormant_after: profile.dormant_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(reports: &[&str]) -> ReportArgs {
        ReportArgs {
            reports: reports.iter().map(ToString::to_string).collect(),
            enterprise: None,
            token: TokenArgs { token: None },
            output_dir: None,
            workers: None,
            requests_per_second: None,
        }
    }

    #[test]
    fn all_expands_in_declaration_order() {
        let kinds = selected_kinds(&["all".to_string()]).unwrap();
        assert_eq!(kinds, ReportKind::iter().collect::<Vec<_>>());
    }

    #[test]
    fn duplicates_are_dropped() {
        let kinds = selected_kinds(&["Teams".to_string(), "users".to_string(), "teams".to_string()]).unwrap();
        assert_eq!(kinds, [ReportKind::Teams, ReportKind::Users]);
    }

    #[test]
    fn unknown_report_is_rejected() {
        let err = selected_kinds(&["wikis".to_string()]).unwrap_err();
        assert!(err.to_string().contains("wikis"));
    }

    #[test]
    fn flags_override_profile() {
        let profile = Profile {
            enterprise: Some("acme".into()),
            ..Profile::default()
        };

        let settings = inventory_settings(&profile, &args(&["all"])).unwrap();
        assert_eq!(settings.enterprise, "acme");
        assert_eq!(settings.workers.get(), 8);
        assert_eq!(settings.output_dir, "inventory");

        let mut overridden = args(&["all"]);
        overridden.enterprise = Some("globex".into());
        overridden.workers = NonZeroUsize::new(2);
        overridden.output_dir = Some("out".into());

        let settings = inventory_settings(&profile, &overridden).unwrap();
        assert_eq!(settings.enterprise, "globex");
        assert_eq!(settings.workers.get(), 2);
        assert_eq!(settings.output_dir, "out");
    }

    #[test]
    fn enterprise_is_required() {
        assert!(inventory_settings(&Profile::default(), &args(&["users"])).is_err());
    }
}
