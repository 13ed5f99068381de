//! Per-report orchestrators
//!
//! Each report lists its candidate entities through the shared [`Inventory`], then hands
//! processing and formatting closures to a [`Pipeline`]. Reports that walk a tree (for
//! example organizations, then each organization's repositories) compose two pipeline stages.
//!
//! # Implementation Model
//!
//! Every remote listing goes through the same path: the [`RateGovernor`] is asked for
//! headroom in the pools the call draws from, the call is retried with backoff, and the
//! quota receipt that comes back with each page is folded into the governor's snapshot.
//! Listings that several reports need (organizations, repositories, teams, members) are
//! memoized in an [`InventoryCache`] so that reports running side by side fetch each of
//! them once.
//!
//! A sub-fetch that fails for one entity does not drop the entity: the affected cell reads
//! `unavailable` and the failure is logged. Fatal failures still abort the run.

mod collaborators;
mod organizations;
mod repositories;
mod teams;
mod users;

use crate::engine::{
    BudgetKind, CsvSink, FanOut, InventoryError, Pipeline, RateGovernor, ReportSummary, RetryPolicy, RowSink, RunContext, SharedCache,
    retry_with_backoff,
};
use crate::platform::{
    Collaborator, Cursor, CustomProperty, EnterpriseUser, ExternalGroup, Member, Organization, Page, PageResult, Platform, Repository,
    Team,
};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use core::num::{NonZeroU32, NonZeroUsize};
use core::time::Duration;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "   reports";

/// Placeholder for a cell whose data could not be fetched.
pub const UNAVAILABLE: &str = "unavailable";

const GRAPH: &[BudgetKind] = &[BudgetKind::CostWeighted];
const REST: &[BudgetKind] = &[BudgetKind::Primary];
const AUDIT: &[BudgetKind] = &[BudgetKind::Primary, BudgetKind::AuditLog];

/// The reports this tool can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString, strum::EnumIter, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum ReportKind {
    Organizations,
    Repositories,
    Teams,
    Collaborators,
    Users,
}

impl ReportKind {
    /// Stable lowercase name, used for file names and progress topics.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.csv", self.name())
    }

    #[must_use]
    pub fn header(self) -> &'static [&'static str] {
        match self {
            Self::Organizations => organizations::HEADER,
            Self::Repositories => repositories::HEADER,
            Self::Teams => teams::HEADER,
            Self::Collaborators => collaborators::HEADER,
            Self::Users => users::HEADER,
        }
    }
}

/// Settings that shape a run.
#[derive(Debug, Clone)]
pub struct InventorySettings {
    /// Enterprise slug.
    pub enterprise: String,
    pub output_dir: Utf8PathBuf,
    pub workers: NonZeroUsize,
    pub requests_per_second: NonZeroU32,

    /// Retry policy for every remote call.
    pub retry: RetryPolicy,

    /// Users without audit-log activity for this long are reported as dormant.
    pub dormant_after: Duration,
}

/// Memoized listings shared by every report of a run.
#[derive(Debug)]
pub struct InventoryCache {
    pub enterprise_organizations: SharedCache<Vec<Organization>>,
    pub enterprise_users: SharedCache<Vec<EnterpriseUser>>,
    pub org_repositories: SharedCache<Vec<Repository>>,
    pub org_members: SharedCache<Vec<Member>>,
    pub org_teams: SharedCache<Vec<Team>>,
    pub repo_teams: SharedCache<Vec<Team>>,
    pub repo_collaborators: SharedCache<Vec<Collaborator>>,
    pub team_members: SharedCache<Vec<Member>>,
}

impl Default for InventoryCache {
    fn default() -> Self {
        Self {
            enterprise_organizations: SharedCache::new("enterprise organizations"),
            enterprise_users: SharedCache::new("enterprise users"),
            org_repositories: SharedCache::new("org repositories"),
            org_members: SharedCache::new("org members"),
            org_teams: SharedCache::new("org teams"),
            repo_teams: SharedCache::new("repo teams"),
            repo_collaborators: SharedCache::new("repo collaborators"),
            team_members: SharedCache::new("team members"),
        }
    }
}

/// Everything a report needs to reach the platform.
///
/// Clones share the platform client, governor and cache.
pub struct Inventory<P> {
    platform: Arc<P>,
    governor: Arc<RateGovernor<P>>,
    cache: Arc<InventoryCache>,
    settings: Arc<InventorySettings>,
}

impl<P> Clone for Inventory<P> {
    fn clone(&self) -> Self {
        Self {
            platform: Arc::clone(&self.platform),
            governor: Arc::clone(&self.governor),
            cache: Arc::clone(&self.cache),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<P> core::fmt::Debug for Inventory<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inventory")
            .field("governor", &self.governor)
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<P: Platform> Inventory<P> {
    #[must_use]
    pub fn new(platform: Arc<P>, governor: Arc<RateGovernor<P>>, settings: InventorySettings) -> Self {
        Self {
            platform,
            governor,
            cache: Arc::new(InventoryCache::default()),
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &InventorySettings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &InventoryCache {
        &self.cache
    }

    #[must_use]
    pub fn governor(&self) -> &RateGovernor<P> {
        &self.governor
    }

    /// Produce one report, writing `<output_dir>/<kind>.csv`.
    pub async fn run_report(&self, kind: ReportKind, ctx: &RunContext) -> Result<ReportSummary, InventoryError> {
        log::info!(target: LOG_TARGET, "Starting {kind} report");
        match kind {
            ReportKind::Organizations => organizations::run(self, ctx).await,
            ReportKind::Repositories => repositories::run(self, ctx).await,
            ReportKind::Teams => teams::run(self, ctx).await,
            ReportKind::Collaborators => collaborators::run(self, ctx).await,
            ReportKind::Users => users::run(self, ctx).await,
        }
    }

    fn pipeline(&self, kind: ReportKind, ctx: &RunContext) -> Pipeline {
        Pipeline::new(kind.name(), ctx, self.settings.workers, self.settings.requests_per_second)
    }

    /// Create the report's output file and write its header.
    fn open_sink(&self, kind: ReportKind) -> Result<CsvSink, InventoryError> {
        let path = self.settings.output_dir.join(kind.file_name());
        let mut sink = CsvSink::create(&path)?;
        let header: Vec<String> = kind.header().iter().map(ToString::to_string).collect();
        sink.write_row(&header)?;
        log::debug!(target: LOG_TARGET, "Writing {kind} report to '{path}'");
        Ok(sink)
    }

    /// Fetch one page after securing headroom in `kinds`, retrying retryable failures.
    async fn fetch_page<T, F, Fut>(&self, cancel: &CancellationToken, kinds: &[BudgetKind], what: &str, mut fetch: F) -> PageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PageResult<T>>,
    {
        self.governor.ensure_headroom(cancel, kinds).await;
        if cancel.is_cancelled() {
            return Err(InventoryError::general("run cancelled").context(what));
        }

        let page = retry_with_backoff(&self.settings.retry, cancel, &mut fetch).await.map_err(|e| e.context(what))?;
        self.governor.observe(page.receipt);
        Ok(page)
    }

    /// Fetch every page of a listing.
    async fn paginate<T, F, Fut>(&self, cancel: &CancellationToken, kinds: &[BudgetKind], what: &str, mut fetch: F) -> Result<Vec<T>, InventoryError>
    where
        F: FnMut(Option<Cursor>) -> Fut,
        Fut: Future<Output = PageResult<T>>,
    {
        let mut items = Vec::new();
        let mut cursor: Option<Cursor> = None;

        loop {
            let page: Page<T> = self.fetch_page(cancel, kinds, what, || fetch(cursor.clone())).await?;
            items.extend(page.items);

            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(items),
            }
        }
    }

    pub async fn organizations(&self, cancel: &CancellationToken) -> Result<Arc<Vec<Organization>>, InventoryError> {
        let enterprise = self.settings.enterprise.as_str();
        let what = format!("listing organizations of enterprise '{enterprise}'");
        self.cache
            .enterprise_organizations
            .get_or_fetch(enterprise, || {
                self.paginate(cancel, GRAPH, &what, |cursor| {
                    self.platform.enterprise_organizations(enterprise, cursor)
                })
            })
            .await
    }

    pub async fn enterprise_users(&self, cancel: &CancellationToken) -> Result<Arc<Vec<EnterpriseUser>>, InventoryError> {
        let enterprise = self.settings.enterprise.as_str();
        let what = format!("listing users of enterprise '{enterprise}'");
        self.cache
            .enterprise_users
            .get_or_fetch(enterprise, || {
                self.paginate(cancel, GRAPH, &what, |cursor| {
                    self.platform.enterprise_users(enterprise, cursor)
                })
            })
            .await
    }

    pub async fn org_repositories(&self, cancel: &CancellationToken, org: &str) -> Result<Arc<Vec<Repository>>, InventoryError> {
        let what = format!("listing repositories of '{org}'");
        self.cache
            .org_repositories
            .get_or_fetch(org, || {
                self.paginate(cancel, REST, &what, |cursor| {
                    self.platform.org_repositories(org, cursor)
                })
            })
            .await
    }

    pub async fn org_members(&self, cancel: &CancellationToken, org: &str) -> Result<Arc<Vec<Member>>, InventoryError> {
        let what = format!("listing members of '{org}'");
        self.cache
            .org_members
            .get_or_fetch(org, || {
                self.paginate(cancel, REST, &what, |cursor| self.platform.org_members(org, cursor))
            })
            .await
    }

    pub async fn org_teams(&self, cancel: &CancellationToken, org: &str) -> Result<Arc<Vec<Team>>, InventoryError> {
        let what = format!("listing teams of '{org}'");
        self.cache
            .org_teams
            .get_or_fetch(org, || {
                self.paginate(cancel, REST, &what, |cursor| self.platform.org_teams(org, cursor))
            })
            .await
    }

    pub async fn repo_teams(&self, cancel: &CancellationToken, org: &str, repo: &str) -> Result<Arc<Vec<Team>>, InventoryError> {
        let key = format!("{org}/{repo}");
        let what = format!("listing teams of '{key}'");
        self.cache
            .repo_teams
            .get_or_fetch(&key, || {
                self.paginate(cancel, REST, &what, |cursor| {
                    self.platform.repo_teams(org, repo, cursor)
                })
            })
            .await
    }

    pub async fn repo_collaborators(&self, cancel: &CancellationToken, org: &str, repo: &str) -> Result<Arc<Vec<Collaborator>>, InventoryError> {
        let key = format!("{org}/{repo}");
        let what = format!("listing collaborators of '{key}'");
        self.cache
            .repo_collaborators
            .get_or_fetch(&key, || {
                self.paginate(cancel, REST, &what, |cursor| {
                    self.platform.repo_collaborators(org, repo, cursor)
                })
            })
            .await
    }

    pub async fn team_members(&self, cancel: &CancellationToken, org: &str, team_slug: &str) -> Result<Arc<Vec<Member>>, InventoryError> {
        let key = format!("{org}/{team_slug}");
        let what = format!("listing members of team '{key}'");
        self.cache
            .team_members
            .get_or_fetch(&key, || {
                self.paginate(cancel, REST, &what, |cursor| {
                    self.platform.team_members(org, team_slug, cursor)
                })
            })
            .await
    }

    pub async fn repo_custom_properties(&self, cancel: &CancellationToken, org: &str, repo: &str) -> Result<Vec<CustomProperty>, InventoryError> {
        let what = format!("reading custom properties of '{org}/{repo}'");
        let page = self
            .fetch_page(cancel, REST, &what, || self.platform.repo_custom_properties(org, repo))
            .await?;
        Ok(page.items)
    }

    pub async fn team_external_groups(&self, cancel: &CancellationToken, org: &str, team_slug: &str) -> Result<Vec<ExternalGroup>, InventoryError> {
        let what = format!("reading external groups of team '{org}/{team_slug}'");
        let page = self
            .fetch_page(cancel, REST, &what, || self.platform.team_external_groups(org, team_slug))
            .await?;
        Ok(page.items)
    }

    /// The most recent audit-log event attributed to `login`.
    pub async fn last_activity(&self, cancel: &CancellationToken, login: &str) -> Result<Option<DateTime<Utc>>, InventoryError> {
        let enterprise = self.settings.enterprise.as_str();
        let phrase = format!("actor:{login}");
        let what = format!("reading audit log for '{login}'");
        let page = self
            .fetch_page(cancel, AUDIT, &what, || self.platform.audit_log(enterprise, &phrase, None))
            .await?;
        Ok(page.items.iter().filter_map(|entry| entry.occurred_at()).max())
    }
}

/// A repository together with the organization that owns it.
#[derive(Debug, Clone)]
struct OrgRepo {
    org: String,
    repo: Repository,
}

impl core::fmt::Display for OrgRepo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.org, self.repo.name)
    }
}

/// Stage that expands each organization into its repositories.
fn repositories_stage<P: Platform>(inv: &Inventory<P>, pipeline: &Pipeline, orgs: &[Organization]) -> FanOut<Vec<OrgRepo>> {
    let inv = inv.clone();
    let cancel = pipeline.context().token().clone();

    pipeline.fan_out(pipeline.feed(orgs.to_vec()), move |org: Organization| {
        let inv = inv.clone();
        let cancel = cancel.clone();
        async move {
            let repos = inv.org_repositories(&cancel, &org.login).await?;
            Ok::<_, InventoryError>(repos
                .iter()
                .map(|repo| OrgRepo {
                    org: org.login.clone(),
                    repo: repo.clone(),
                })
                .collect::<Vec<_>>())
        }
    })
}

/// Await one of a report's top-level listings. A fatal failure cancels the whole run
/// before it is returned.
async fn top_level<T>(ctx: &RunContext, listing: impl Future<Output = Result<T, InventoryError>>) -> Result<T, InventoryError> {
    match listing.await {
        Err(e) if e.kind().is_fatal() => Err(ctx.escalate(e)),
        other => other,
    }
}

/// Turn a sub-fetch result into an optional value.
///
/// A fatal failure is propagated so that it aborts the run; any other failure is logged
/// and yields `None`, which renders as [`UNAVAILABLE`].
fn optional<T>(result: Result<T, InventoryError>, entity: &str) -> Result<Option<T>, InventoryError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind().is_fatal() => Err(e),
        Err(e) => {
            log::warn!(target: LOG_TARGET, "'{entity}': {} error, reporting as {UNAVAILABLE}: {e}", e.kind());
            Ok(None)
        }
    }
}

fn render<T>(value: Option<&T>, f: impl FnOnce(&T) -> String) -> String {
    value.map_or_else(|| UNAVAILABLE.to_string(), f)
}

fn format_date(value: Option<DateTime<Utc>>) -> String {
    value.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
}

const fn format_bool(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn text(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}
