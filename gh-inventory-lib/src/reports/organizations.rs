//! One row per enterprise organization.

use super::{Inventory, ReportKind, format_date, optional, render, text, top_level};
use crate::engine::{InventoryError, ReportSummary, Row, RunContext};
use crate::platform::{Organization, Platform};

pub(super) const HEADER: &[&str] = &["Organization", "Display Name", "Description", "Created", "Repositories", "Members", "Teams"];

struct OrgRecord {
    org: Organization,
    repositories: Option<usize>,
    members: Option<usize>,
    teams: Option<usize>,
}

pub(super) async fn run<P: Platform>(inv: &Inventory<P>, ctx: &RunContext) -> Result<ReportSummary, InventoryError> {
    let kind = ReportKind::Organizations;
    let sink = inv.open_sink(kind)?;
    let pipeline = inv.pipeline(kind, ctx);
    let orgs = top_level(pipeline.context(), inv.organizations(pipeline.context().token())).await?;

    let process = {
        let inv = inv.clone();
        let cancel = pipeline.context().token().clone();
        move |org: Organization| {
            let inv = inv.clone();
            let cancel = cancel.clone();
            async move {
                let login = org.login.as_str();
                let repositories = optional(inv.org_repositories(&cancel, login).await, login)?.map(|r| r.len());
                let members = optional(inv.org_members(&cancel, login).await, login)?.map(|m| m.len());
                let teams = optional(inv.org_teams(&cancel, login).await, login)?.map(|t| t.len());

                Ok::<_, InventoryError>(OrgRecord {
                    org,
                    repositories,
                    members,
                    teams,
                })
            }
        }
    };

    let results = pipeline.fan_out(pipeline.feed(orgs.to_vec()), process);
    pipeline.drain_into(results, |record| vec![format(&record)], sink).await
}

fn format(record: &OrgRecord) -> Row {
    vec![
        record.org.login.clone(),
        text(record.org.name.as_deref()),
        text(record.org.description.as_deref()),
        format_date(record.org.created_at),
        render(record.repositories.as_ref(), ToString::to_string),
        render(record.members.as_ref(), ToString::to_string),
        render(record.teams.as_ref(), ToString::to_string),
    ]
}
