use super::Host;
use super::common::{GlobalArgs, TokenArgs};
use crate::Result;
use crate::engine::{BudgetKind, RateGovernor, RateSnapshot};
use crate::platform::GitHubClient;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
pub struct RateLimitsArgs {
    #[command(flatten)]
    pub token: TokenArgs,
}

/// Print the current state of every quota pool.
pub async fn show_rate_limits<H: Host>(host: &mut H, global: &GlobalArgs, args: &RateLimitsArgs) -> Result<()> {
    global.init_logging();
    let (_, profile) = global.load_profile()?;

    let client = Arc::new(GitHubClient::new(args.token.require()?, &profile.api_url, &profile.graphql_url)?);
    let governor = RateGovernor::new(client, profile.governor_settings());
    let snapshot = governor.check_budgets(&CancellationToken::new()).await?;

    let _ = write!(host.output(), "{}", format_snapshot(&snapshot, Utc::now()));
    Ok(())
}

fn format_snapshot(snapshot: &RateSnapshot, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    for kind in BudgetKind::all() {
        let line = match snapshot.get(kind) {
            Some(budget) => {
                let reset_in = (budget.reset_at - now).num_seconds().max(0);
                format!(
                    "{:>13}  {:>6} / {:<6} remaining, resets in {}m {:02}s\n",
                    kind.to_string(),
                    budget.remaining,
                    budget.limit,
                    reset_in / 60,
                    reset_in % 60
                )
            }
            None => format!("{:>13}  not reported\n", kind.to_string()),
        };
        out.push_str(&line);
    }
    out
}
