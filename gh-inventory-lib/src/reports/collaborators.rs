//! One row per grantee (team or user) of every repository.

use super::{Inventory, OrgRepo, ReportKind, UNAVAILABLE, optional, repositories_stage, top_level};
use crate::engine::{InventoryError, ReportSummary, Row, RunContext};
use crate::platform::{Collaborator, Platform, Team};
use std::sync::Arc;

pub(super) const HEADER: &[&str] = &["Organization", "Repository", "Grantee Type", "Grantee", "Permission"];

const TEAM: &str = "Team";
const USER: &str = "User";

struct AccessRecord {
    item: OrgRepo,
    teams: Option<Arc<Vec<Team>>>,
    collaborators: Option<Arc<Vec<Collaborator>>>,
}

pub(super) async fn run<P: Platform>(inv: &Inventory<P>, ctx: &RunContext) -> Result<ReportSummary, InventoryError> {
    let kind = ReportKind::Collaborators;
    let sink = inv.open_sink(kind)?;
    let pipeline = inv.pipeline(kind, ctx);
    let orgs = top_level(pipeline.context(), inv.organizations(pipeline.context().token())).await?;

    let repos = pipeline.flatten(repositories_stage(inv, &pipeline, &orgs));

    let process = {
        let inv = inv.clone();
        let cancel = pipeline.context().token().clone();
        move |item: OrgRepo| {
            let inv = inv.clone();
            let cancel = cancel.clone();
            async move {
                let key = item.to_string();
                let (org, repo) = (item.org.as_str(), item.repo.name.as_str());

                let teams = optional(inv.repo_teams(&cancel, org, repo).await, &key)?;
                let collaborators = optional(inv.repo_collaborators(&cancel, org, repo).await, &key)?;

                Ok::<_, InventoryError>(AccessRecord {
                    item,
                    teams,
                    collaborators,
                })
            }
        }
    };

    let results = pipeline.fan_out(repos, process);
    pipeline.drain_into(results, |record| format(&record), sink).await
}

fn format(record: &AccessRecord) -> Vec<Row> {
    let row = |grantee_type: &str, grantee: &str, permission: &str| {
        vec![
            record.item.org.clone(),
            record.item.repo.name.clone(),
            grantee_type.to_string(),
            grantee.to_string(),
            permission.to_string(),
        ]
    };

    let mut rows = Vec::new();

    match &record.teams {
        Some(teams) => rows.extend(
            teams
                .iter()
                .map(|team| row(TEAM, &team.slug, team.permission.as_deref().unwrap_or_default())),
        ),
        None => rows.push(row(TEAM, UNAVAILABLE, UNAVAILABLE)),
    }

    match &record.collaborators {
        Some(collaborators) => rows.extend(collaborators.iter().map(|c| row(USER, &c.login, c.permission()))),
        None => rows.push(row(USER, UNAVAILABLE, UNAVAILABLE)),
    }

    rows
}
