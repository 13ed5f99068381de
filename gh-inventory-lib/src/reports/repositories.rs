//! One row per repository, across every organization.

use super::{Inventory, OrgRepo, ReportKind, format_bool, format_date, optional, render, repositories_stage, text, top_level};
use crate::engine::{InventoryError, ReportSummary, Row, RunContext};
use crate::platform::{Collaborator, CustomProperty, Platform, Team};
use std::sync::Arc;

pub(super) const HEADER: &[&str] = &[
    "Organization",
    "Repository",
    "Visibility",
    "Archived",
    "Fork",
    "Default Branch",
    "Language",
    "Size (KB)",
    "Created",
    "Last Push",
    "Teams",
    "Collaborators",
    "Custom Properties",
];

struct RepoRecord {
    item: OrgRepo,
    teams: Option<Arc<Vec<Team>>>,
    collaborators: Option<Arc<Vec<Collaborator>>>,
    properties: Option<Vec<CustomProperty>>,
}

pub(super) async fn run<P: Platform>(inv: &Inventory<P>, ctx: &RunContext) -> Result<ReportSummary, InventoryError> {
    let kind = ReportKind::Repositories;
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
                let properties = optional(inv.repo_custom_properties(&cancel, org, repo).await, &key)?;

                Ok::<_, InventoryError>(RepoRecord {
                    item,
                    teams,
                    collaborators,
                    properties,
                })
            }
        }
    };

    let results = pipeline.fan_out(repos, process);
    pipeline.drain_into(results, |record| vec![format(&record)], sink).await
}

fn format(record: &RepoRecord) -> Row {
    let repo = &record.item.repo;
    vec![
        record.item.org.clone(),
        repo.name.clone(),
        repo.visibility().to_string(),
        format_bool(repo.archived).to_string(),
        format_bool(repo.fork).to_string(),
        text(repo.default_branch.as_deref()),
        text(repo.language.as_deref()),
        repo.size.to_string(),
        format_date(repo.created_at),
        format_date(repo.pushed_at),
        render(record.teams.as_deref(), |teams| join(teams.iter().map(|t| t.slug.as_str()))),
        render(record.collaborators.as_deref(), |collaborators| {
            join(collaborators.iter().map(|c| c.login.as_str()))
        }),
        render(record.properties.as_ref(), |properties| format_properties(properties)),
    ]
}

fn format_properties(properties: &[CustomProperty]) -> String {
    properties
        .iter()
        .map(|p| match &p.value {
            Some(value) => format!("{}={value}", p.property_name),
            None => format!("{}=", p.property_name),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn join<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PropertyValue, Repository};

    fn repository() -> Repository {
        Repository {
            name: "widgets".into(),
            visibility: Some("internal".into()),
            private: true,
            archived: false,
            fork: true,
            default_branch: Some("main".into()),
            language: Some("Rust".into()),
            size: 2048,
            created_at: None,
            pushed_at: None,
        }
    }

    #[test]
    fn full_row() {
        let record = RepoRecord {
            item: OrgRepo {
                org: "acme".into(),
                repo: repository(),
            },
            teams: Some(Arc::new(vec![Team {
                name: "Core".into(),
                slug: "core".into(),
                privacy: None,
                permission: Some("push".into()),
                parent: None,
            }])),
            collaborators: None,
            properties: Some(vec![
                CustomProperty {
                    property_name: "tier".into(),
                    value: Some(PropertyValue::Single("gold".into())),
                },
                CustomProperty {
                    property_name: "tags".into(),
                    value: Some(PropertyValue::Multiple(vec!["a".into(), "b".into()])),
                },
            ]),
        };

        let row = format(&record);
        assert_eq!(row.len(), HEADER.len());
        assert_eq!(row[2], "internal");
        assert_eq!(row[4], "yes");
        assert_eq!(row[7], "2048");
        assert_eq!(row[10], "core");
        assert_eq!(row[11], "unavailable");
        assert_eq!(row[12], "tier=gold; tags=a|b");
    }

    #[test]
    fn empty_lists_are_blank_not_unavailable() {
        let record = RepoRecord {
            item: OrgRepo {
                org: "acme".into(),
                repo: repository(),
            },
            teams: Some(Arc::new(Vec::new())),
            collaborators: Some(Arc::new(Vec::new())),
            properties: Some(Vec::new()),
        };

        let row = format(&record);
        assert_eq!(&row[10..], ["", "", ""]);
    }
}
