//! In-process platform used by the end-to-end tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use chrono::{DateTime, TimeDelta, Utc};
use core::num::{NonZeroU32, NonZeroUsize};
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use gh_inventory_lib::engine::{
    BudgetKind, GovernorSettings, InventoryError, QuotaSource, RateBudget, RateGovernor, RateSnapshot, RetryPolicy,
};
use gh_inventory_lib::platform::{
    AuditLogEntry, Collaborator, Cursor, CustomProperty, EnterpriseUser, ExternalGroup, Member, Organization, Page, PageResult, Platform,
    PropertyValue, Repository, Team,
};
use gh_inventory_lib::reports::{Inventory, InventorySettings};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A synthetic enterprise: `orgs` organizations with `repos_per_org` repositories each,
/// two teams per organization, and `users` enterprise users spread over the organizations.
#[derive(Debug)]
pub struct MockPlatform {
    pub orgs: usize,
    pub repos_per_org: usize,
    pub users: usize,
    pub page_size: usize,

    /// Probability that a per-organization or per-repository call fails with a server error.
    pub failure_rate: f64,

    /// Calls whose key (method plus arguments, e.g. `repo_custom_properties org1/repo0`) always fail.
    pub fail_keys: Mutex<HashMap<String, ErrorSpec>>,

    calls: Mutex<HashMap<&'static str, u64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Clone, Copy)]
pub enum ErrorSpec {
    Server,
    Auth,
}

impl MockPlatform {
    pub fn new(orgs: usize, repos_per_org: usize, users: usize) -> Self {
        Self {
            orgs,
            repos_per_org,
            users,
            page_size: 50,
            failure_rate: 0.0,
            fail_keys: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    pub fn fail(&self, key: &str, spec: ErrorSpec) {
        let _ = self.fail_keys.lock().unwrap().insert(key.to_string(), spec);
    }

    pub fn calls(&self, method: &str) -> u64 {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn org_name(index: usize) -> String {
        format!("org{index:03}")
    }

    pub fn user_login(index: usize) -> String {
        format!("user{index:03}")
    }

    /// Record a call, simulate latency, and decide whether it fails.
    async fn enter(&self, method: &'static str, key: &str, flaky: bool) -> Result<(), InventoryError> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let forced = self.fail_keys.lock().unwrap().get(&format!("{method} {key}")).copied();
        match forced {
            Some(ErrorSpec::Auth) => return Err(InventoryError::auth("credential rejected")),
            Some(ErrorSpec::Server) => return Err(InventoryError::remote_api("502 Bad Gateway")),
            None => {}
        }

        let roll_failed = flaky && self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate);
        if roll_failed {
            return Err(InventoryError::remote_api("503 Service Unavailable"));
        }

        Ok(())
    }

    fn page<T>(&self, all: Vec<T>, cursor: Option<&Cursor>) -> Page<T> {
        let start: usize = cursor.and_then(|c| c.as_str().parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(all.len());
        let next = (end < all.len()).then(|| Cursor::new(end.to_string()));
        let items = all.into_iter().skip(start).take(end.saturating_sub(start)).collect();

        Page {
            items,
            next,
            receipt: Some(RateBudget {
                kind: BudgetKind::Primary,
                remaining: 4_000,
                limit: 5_000,
                reset_at: Utc::now() + TimeDelta::minutes(30),
            }),
        }
    }

    fn org_index(org: &str) -> usize {
        org.trim_start_matches("org").parse().unwrap_or(0)
    }

    fn user_index(login: &str) -> usize {
        login.trim_start_matches("user").parse().unwrap_or(0)
    }

    fn created(days_ago: i64) -> Option<DateTime<Utc>> {
        Some(Utc::now() - TimeDelta::days(days_ago))
    }
}

impl QuotaSource for MockPlatform {
    async fn rate_limits(&self) -> Result<RateSnapshot, InventoryError> {
        self.enter("rate_limits", "", false).await?;
        let reset_at = Utc::now() + TimeDelta::minutes(30);
        Ok(RateSnapshot::new(BudgetKind::all().map(|kind| RateBudget {
            kind,
            remaining: 4_000,
            limit: 5_000,
            reset_at,
        })))
    }
}

impl Platform for MockPlatform {
    async fn enterprise_organizations(&self, enterprise: &str, cursor: Option<Cursor>) -> PageResult<Organization> {
        self.enter("enterprise_organizations", enterprise, false).await?;
        let orgs = (0..self.orgs)
            .map(|i| Organization {
                login: Self::org_name(i),
                name: Some(format!("Organization {i}")),
                description: None,
                created_at: Self::created(1_000),
            })
            .collect();
        Ok(self.page(orgs, cursor.as_ref()))
    }

    async fn enterprise_users(&self, enterprise: &str, cursor: Option<Cursor>) -> PageResult<EnterpriseUser> {
        self.enter("enterprise_users", enterprise, false).await?;
        let users = (0..self.users)
            .map(|i| EnterpriseUser {
                login: Self::user_login(i),
                name: Some(format!("User {i}")),
                email: Some(format!("user{i}@example.com")),
                created_at: Self::created(1_000),
            })
            .collect();
        Ok(self.page(users, cursor.as_ref()))
    }

    async fn org_repositories(&self, org: &str, cursor: Option<Cursor>) -> PageResult<Repository> {
        self.enter("org_repositories", org, true).await?;
        let repos = (0..self.repos_per_org)
            .map(|i| Repository {
                name: format!("repo{i}"),
                visibility: Some(if i % 2 == 0 { "private" } else { "internal" }.to_string()),
                private: true,
                archived: i == 2,
                fork: false,
                default_branch: Some("main".to_string()),
                language: Some("Rust".to_string()),
                size: 100 * (i as u64 + 1),
                created_at: Self::created(500),
                pushed_at: Self::created(5),
            })
            .collect();
        Ok(self.page(repos, cursor.as_ref()))
    }

    /// Users are assigned round-robin: user `u` belongs to organization `u % orgs`.
    async fn org_members(&self, org: &str, cursor: Option<Cursor>) -> PageResult<Member> {
        self.enter("org_members", org, true).await?;
        let index = Self::org_index(org);
        let members = (0..self.users)
            .filter(|u| self.orgs > 0 && u % self.orgs == index)
            .map(|u| Member { login: Self::user_login(u) })
            .collect();
        Ok(self.page(members, cursor.as_ref()))
    }

    async fn org_teams(&self, org: &str, cursor: Option<Cursor>) -> PageResult<Team> {
        self.enter("org_teams", org, true).await?;
        let teams = ["admins", "developers"]
            .into_iter()
            .map(|slug| Team {
                name: slug.to_uppercase(),
                slug: slug.to_string(),
                privacy: Some("closed".to_string()),
                permission: None,
                parent: None,
            })
            .collect();
        Ok(self.page(teams, cursor.as_ref()))
    }

    async fn repo_teams(&self, org: &str, repo: &str, cursor: Option<Cursor>) -> PageResult<Team> {
        self.enter("repo_teams", &format!("{org}/{repo}"), true).await?;
        let teams = vec![Team {
            name: "Developers".to_string(),
            slug: "developers".to_string(),
            privacy: Some("closed".to_string()),
            permission: Some("push".to_string()),
            parent: None,
        }];
        Ok(self.page(teams, cursor.as_ref()))
    }

    async fn repo_collaborators(&self, org: &str, repo: &str, cursor: Option<Cursor>) -> PageResult<Collaborator> {
        self.enter("repo_collaborators", &format!("{org}/{repo}"), true).await?;
        let collaborators = vec![Collaborator {
            login: "outside-contributor".to_string(),
            role_name: Some("triage".to_string()),
            permissions: None,
        }];
        Ok(self.page(collaborators, cursor.as_ref()))
    }

    async fn repo_custom_properties(&self, org: &str, repo: &str) -> PageResult<CustomProperty> {
        self.enter("repo_custom_properties", &format!("{org}/{repo}"), true).await?;
        Ok(Page::last(vec![CustomProperty {
            property_name: "tier".to_string(),
            value: Some(PropertyValue::Single("gold".to_string())),
        }]))
    }

    async fn team_members(&self, org: &str, team_slug: &str, cursor: Option<Cursor>) -> PageResult<Member> {
        self.enter("team_members", &format!("{org}/{team_slug}"), true).await?;
        let members = vec![Member {
            login: "maintainer".to_string(),
        }];
        Ok(self.page(members, cursor.as_ref()))
    }

    async fn team_external_groups(&self, org: &str, team_slug: &str) -> PageResult<ExternalGroup> {
        self.enter("team_external_groups", &format!("{org}/{team_slug}"), true).await?;
        Ok(Page::last(vec![ExternalGroup {
            group_id: 7,
            group_name: format!("{team_slug}-idp"),
        }]))
    }

    /// Even-numbered users were active yesterday; odd-numbered users have no events.
    async fn audit_log(&self, _enterprise: &str, phrase: &str, cursor: Option<Cursor>) -> PageResult<AuditLogEntry> {
        let login = phrase.trim_start_matches("actor:");
        self.enter("audit_log", login, true).await?;

        let entries = if Self::user_index(login) % 2 == 0 {
            vec![AuditLogEntry {
                action: Some("repo.create".to_string()),
                actor: Some(login.to_string()),
                timestamp: (Utc::now() - TimeDelta::days(1)).timestamp_millis(),
            }]
        } else {
            Vec::new()
        };
        Ok(self.page(entries, cursor.as_ref()))
    }
}

/// An inventory over `platform` that writes to `output_dir`, with retries disabled so that
/// injected failures surface immediately.
pub fn inventory(platform: &Arc<MockPlatform>, output_dir: &camino::Utf8Path, workers: usize) -> Inventory<MockPlatform> {
    inventory_with_retry(platform, output_dir, workers, RetryPolicy::new(0, Duration::from_millis(1)))
}

/// An inventory over `platform` that retries remote failures according to `retry`.
pub fn inventory_with_retry(
    platform: &Arc<MockPlatform>,
    output_dir: &camino::Utf8Path,
    workers: usize,
    retry: RetryPolicy,
) -> Inventory<MockPlatform> {
    let governor = Arc::new(RateGovernor::new(Arc::clone(platform), GovernorSettings::default()));
    let settings = InventorySettings {
        enterprise: "acme".to_string(),
        output_dir: output_dir.to_path_buf(),
        workers: NonZeroUsize::new(workers).unwrap(),
        requests_per_second: NonZeroU32::new(100_000).unwrap(),
        retry,
        dormant_after: Duration::from_hours(24 * 90),
    };

    Inventory::new(Arc::clone(platform), governor, settings)
}

/// Read a CSV file into its header and data rows.
pub fn read_csv(path: &camino::Utf8Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(ToString::to_string).collect();
    let rows = reader
        .records()
        .map(|record| record.unwrap().iter().map(ToString::to_string).collect())
        .collect();
    (header, rows)
}

pub fn temp_output() -> (tempfile::TempDir, camino::Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    (dir, path)
}
