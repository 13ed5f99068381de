//! One row per team, across every organization.

use super::{Inventory, ReportKind, optional, render, text, top_level};
use crate::engine::{InventoryError, ReportSummary, Row, RunContext};
use crate::platform::{ExternalGroup, Organization, Platform, Team};

pub(super) const HEADER: &[&str] = &["Organization", "Team", "Slug", "Privacy", "Parent", "Members", "External Groups"];

#[derive(Debug, Clone)]
struct OrgTeam {
    org: String,
    team: Team,
}

impl core::fmt::Display for OrgTeam {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.org, self.team.slug)
    }
}

struct TeamRecord {
    item: OrgTeam,
    members: Option<usize>,
    groups: Option<Vec<ExternalGroup>>,
}

pub(super) async fn run<P: Platform>(inv: &Inventory<P>, ctx: &RunContext) -> Result<ReportSummary, InventoryError> {
    let kind = ReportKind::Teams;
    let sink = inv.open_sink(kind)?;
    let pipeline = inv.pipeline(kind, ctx);
    let orgs = top_level(pipeline.context(), inv.organizations(pipeline.context().token())).await?;

    let list_teams = {
        let inv = inv.clone();
        let cancel = pipeline.context().token().clone();
        move |org: Organization| {
            let inv = inv.clone();
            let cancel = cancel.clone();
            async move {
                let teams = inv.org_teams(&cancel, &org.login).await?;
                Ok::<_, InventoryError>(
                    teams
                        .iter()
                        .map(|team| OrgTeam {
                            org: org.login.clone(),
                            team: team.clone(),
                        })
                        .collect::<Vec<_>>(),
                )
            }
        }
    };

    let describe_team = {
        let inv = inv.clone();
        let cancel = pipeline.context().token().clone();
        move |item: OrgTeam| {
            let inv = inv.clone();
            let cancel = cancel.clone();
            async move {
                let key = item.to_string();
                let (org, slug) = (item.org.as_str(), item.team.slug.as_str());

                let members = optional(inv.team_members(&cancel, org, slug).await, &key)?.map(|m| m.len());
                let groups = optional(inv.team_external_groups(&cancel, org, slug).await, &key)?;

                Ok::<_, InventoryError>(TeamRecord { item, members, groups })
            }
        }
    };

    let teams = pipeline.flatten(pipeline.fan_out(pipeline.feed(orgs.to_vec()), list_teams));
    let results = pipeline.fan_out(teams, describe_team);
    pipeline.drain_into(results, |record| vec![format(&record)], sink).await
}

fn format(record: &TeamRecord) -> Row {
    let team = &record.item.team;
    vec![
        record.item.org.clone(),
        team.name.clone(),
        team.slug.clone(),
        text(team.privacy.as_deref()),
        text(team.parent.as_ref().map(|p| p.slug.as_str())),
        render(record.members.as_ref(), ToString::to_string),
        render(record.groups.as_ref(), |groups| {
            groups.iter().map(|g| g.group_name.as_str()).collect::<Vec<_>>().join("; ")
        }),
    ]
}
