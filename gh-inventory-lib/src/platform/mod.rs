//! The remote platform abstraction
//!
//! [`Platform`] is the set of paginated listings the reports consume plus the quota status
//! query inherited from [`QuotaSource`]. Every listing returns one [`Page`] at a time; the
//! caller passes the page's continuation [`Cursor`] back in to get the next one.
//!
//! [`GitHubClient`] implements the trait against the GitHub REST and GraphQL endpoints.

mod github;
mod models;

pub use github::GitHubClient;
pub use models::{
    AuditLogEntry, Collaborator, CustomProperty, EnterpriseUser, ExternalGroup, Member, Organization, Permissions, PropertyValue,
    Repository, Team, TeamRef,
};

use crate::engine::{InventoryError, QuotaSource, RateBudget};

/// Opaque continuation token returned with a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Present when more pages follow.
    pub next: Option<Cursor>,

    /// Quota state reported alongside the page.
    pub receipt: Option<RateBudget>,
}

impl<T> Page<T> {
    /// A page with no continuation and no receipt.
    #[must_use]
    pub const fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next: None,
            receipt: None,
        }
    }
}

/// Result of one remote listing call.
pub type PageResult<T> = Result<Page<T>, InventoryError>;

/// Paginated listings over an enterprise account.
pub trait Platform: QuotaSource + 'static {
    fn enterprise_organizations(&self, enterprise: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Organization>> + Send;

    fn enterprise_users(&self, enterprise: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<EnterpriseUser>> + Send;

    fn org_repositories(&self, org: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Repository>> + Send;

    fn org_members(&self, org: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Member>> + Send;

    fn org_teams(&self, org: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Team>> + Send;

    fn repo_teams(&self, org: &str, repo: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Team>> + Send;

    /// Users with direct access to a repository.
    fn repo_collaborators(&self, org: &str, repo: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Collaborator>> + Send;

    /// Custom property values. Not paginated.
    fn repo_custom_properties(&self, org: &str, repo: &str) -> impl Future<Output = PageResult<CustomProperty>> + Send;

    fn team_members(&self, org: &str, team_slug: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<Member>> + Send;

    /// Identity-provider groups linked to a team. Not paginated.
    fn team_external_groups(&self, org: &str, team_slug: &str) -> impl Future<Output = PageResult<ExternalGroup>> + Send;

    /// Enterprise audit-log entries matching `phrase`, newest first.
    fn audit_log(&self, enterprise: &str, phrase: &str, cursor: Option<Cursor>) -> impl Future<Output = PageResult<AuditLogEntry>> + Send;
}
