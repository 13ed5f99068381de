//! GitHub REST and GraphQL client
//!
//! REST listings follow the `Link: <...>; rel="next"` header, enterprise listings follow the
//! GraphQL `pageInfo.endCursor`. Every response's `x-ratelimit-*` headers are turned into a
//! quota receipt, and every failure status is classified into an [`InventoryError`] kind.

use super::models::{
    AuditLogEntry, Collaborator, CustomProperty, EnterpriseUser, ExternalGroup, Member, Organization, Repository, Team,
};
use super::{Cursor, Page, PageResult, Platform};
use crate::engine::{BudgetKind, InventoryError, QuotaSource, RateBudget, RateSnapshot};
use chrono::{DateTime, Utc};
use core::time::Duration;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::LazyLock;
use url::Url;

const LOG_TARGET: &str = "    github";

const PAGE_SIZE: &str = "100";
const API_VERSION: &str = "2022-11-28";

/// Wait applied to secondary rate limits that do not say how long to back off.
const SECONDARY_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

static NEXT_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"<([^>]+)>;\s*rel="next""#).expect("invalid regex"));

const ENTERPRISE_ORGANIZATIONS_QUERY: &str = r"
query($slug: String!, $after: String) {
  enterprise(slug: $slug) {
    listing: organizations(first: 100, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes { login name description createdAt }
    }
  }
}";

const ENTERPRISE_USERS_QUERY: &str = r"
query($slug: String!, $after: String) {
  enterprise(slug: $slug) {
    listing: members(first: 100, after: $after) {
      pageInfo { hasNextPage endCursor }
      nodes {
        ... on EnterpriseUserAccount { login name createdAt user { email } }
        ... on User { login name createdAt email }
      }
    }
  }
}";

/// Platform implementation backed by the GitHub API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    graphql_url: Url,
}

impl GitHubClient {
    /// Create a client for the given REST and GraphQL endpoints.
    pub fn new(token: &str, api_url: &str, graphql_url: &str) -> Result<Self, InventoryError> {
        let api_url = Url::parse(api_url).map_err(|e| InventoryError::config(format!("invalid API URL '{api_url}': {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(InventoryError::config(format!("API URL '{api_url}' cannot be used as a base URL")));
        }

        let graphql_url =
            Url::parse(graphql_url).map_err(|e| InventoryError::config(format!("invalid GraphQL URL '{graphql_url}': {e}")))?;

        let mut auth_val = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| InventoryError::config("the token contains characters that are not valid in an HTTP header").with_source(e))?;
        auth_val.set_sensitive(true);

        let mut headers = HeaderMap::new();
        let _ = headers.insert(AUTHORIZATION, auth_val);
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert(HeaderName::from_static("x-github-api-version"), HeaderValue::from_static(API_VERSION));

        let http = reqwest::Client::builder()
            .user_agent(concat!("gh-inventory/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self { http, api_url, graphql_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            let _ = path.pop_if_empty().extend(segments);
        }
        url
    }

    fn listing(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.endpoint(segments);
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                let _ = pairs.append_pair(key, value);
            }
            let _ = pairs.append_pair("per_page", PAGE_SIZE);
        }
        url
    }

    async fn get(&self, url: Url) -> Result<(Response, Option<RateBudget>), InventoryError> {
        log::trace!(target: LOG_TARGET, "GET {url}");
        let path = url.path().to_string();
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| InventoryError::from(e).context(format!("GET {path}")))?;
        check_response(resp).await
    }

    async fn rest_page<T: DeserializeOwned>(&self, first: Url, cursor: Option<Cursor>) -> PageResult<T> {
        self.rest_page_with(first, cursor, |items: Vec<T>| items).await
    }

    async fn rest_page_with<W, T>(&self, first: Url, cursor: Option<Cursor>, extract: impl FnOnce(W) -> Vec<T> + Send) -> PageResult<T>
    where
        W: DeserializeOwned,
    {
        let url = match cursor {
            Some(cursor) => {
                Url::parse(cursor.as_str()).map_err(|e| InventoryError::general(format!("invalid page cursor '{}': {e}", cursor.as_str())))?
            }
            None => first,
        };

        let (resp, receipt) = self.get(url).await?;
        let next = next_link(resp.headers()).map(Cursor::new);
        let body: W = resp.json().await?;

        Ok(Page {
            items: extract(body),
            next,
            receipt,
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &'static str, variables: serde_json::Value) -> Result<(T, Option<RateBudget>), InventoryError> {
        log::trace!(target: LOG_TARGET, "POST {} {variables}", self.graphql_url);
        let resp = self
            .http
            .post(self.graphql_url.clone())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| InventoryError::from(e).context("GraphQL query"))?;

        let (resp, receipt) = check_response(resp).await?;
        let body: GraphResponse<T> = resp.json().await?;

        if let Some(errors) = body.errors
            && !errors.is_empty()
        {
            return Err(graph_error(&errors, receipt.as_ref(), Utc::now()));
        }

        body.data
            .map(|data| (data, receipt))
            .ok_or_else(|| InventoryError::remote_api("GraphQL response carried neither data nor errors"))
    }

    async fn enterprise_page<N: DeserializeOwned>(&self, query: &'static str, enterprise: &str, cursor: Option<Cursor>) -> PageResult<N> {
        let variables = json!({ "slug": enterprise, "after": cursor.as_ref().map(Cursor::as_str) });
        let (data, receipt): (EnterpriseData<N>, _) = self.graphql(query, variables).await?;

        let listing = data
            .enterprise
            .ok_or_else(|| InventoryError::config(format!("enterprise '{enterprise}' does not exist or is not accessible with this token")))?
            .listing;

        let next = if listing.page_info.has_next_page {
            listing.page_info.end_cursor.map(Cursor::new)
        } else {
            None
        };

        Ok(Page {
            items: listing.nodes.into_iter().flatten().collect(),
            next,
            receipt,
        })
    }
}

impl QuotaSource for GitHubClient {
    async fn rate_limits(&self) -> Result<RateSnapshot, InventoryError> {
        let (resp, _) = self.get(self.endpoint(&["rate_limit"])).await?;
        let body: RateLimitResponse = resp.json().await?;

        let resources = body.resources;
        let budgets = [
            (BudgetKind::Primary, resources.core),
            (BudgetKind::CostWeighted, resources.graphql),
            (BudgetKind::AuditLog, resources.audit_log),
        ];

        Ok(RateSnapshot::new(budgets.into_iter().filter_map(|(kind, raw)| {
            let raw = raw?;
            Some(RateBudget {
                kind,
                remaining: raw.remaining,
                limit: raw.limit,
                reset_at: DateTime::from_timestamp(raw.reset, 0)?,
            })
        })))
    }
}

impl Platform for GitHubClient {
    async fn enterprise_organizations(&self, enterprise: &str, cursor: Option<Cursor>) -> PageResult<Organization> {
        self.enterprise_page(ENTERPRISE_ORGANIZATIONS_QUERY, enterprise, cursor).await
    }

    async fn enterprise_users(&self, enterprise: &str, cursor: Option<Cursor>) -> PageResult<EnterpriseUser> {
        let page: Page<RawEnterpriseMember> = self.enterprise_page(ENTERPRISE_USERS_QUERY, enterprise, cursor).await?;
        Ok(Page {
            items: page.items.into_iter().filter_map(RawEnterpriseMember::into_user).collect(),
            next: page.next,
            receipt: page.receipt,
        })
    }

    async fn org_repositories(&self, org: &str, cursor: Option<Cursor>) -> PageResult<Repository> {
        self.rest_page(self.listing(&["orgs", org, "repos"], &[("type", "all")]), cursor).await
    }

    async fn org_members(&self, org: &str, cursor: Option<Cursor>) -> PageResult<Member> {
        self.rest_page(self.listing(&["orgs", org, "members"], &[]), cursor).await
    }

    async fn org_teams(&self, org: &str, cursor: Option<Cursor>) -> PageResult<Team> {
        self.rest_page(self.listing(&["orgs", org, "teams"], &[]), cursor).await
    }

    async fn repo_teams(&self, org: &str, repo: &str, cursor: Option<Cursor>) -> PageResult<Team> {
        self.rest_page(self.listing(&["repos", org, repo, "teams"], &[]), cursor).await
    }

    async fn repo_collaborators(&self, org: &str, repo: &str, cursor: Option<Cursor>) -> PageResult<Collaborator> {
        self.rest_page(self.listing(&["repos", org, repo, "collaborators"], &[("affiliation", "direct")]), cursor)
            .await
    }

    async fn repo_custom_properties(&self, org: &str, repo: &str) -> PageResult<CustomProperty> {
        let page: Page<CustomProperty> = self.rest_page(self.endpoint(&["repos", org, repo, "properties", "values"]), None).await?;
        Ok(Page { next: None, ..page })
    }

    async fn team_members(&self, org: &str, team_slug: &str, cursor: Option<Cursor>) -> PageResult<Member> {
        self.rest_page(self.listing(&["orgs", org, "teams", team_slug, "members"], &[]), cursor).await
    }

    async fn team_external_groups(&self, org: &str, team_slug: &str) -> PageResult<ExternalGroup> {
        let page = self
            .rest_page_with(
                self.endpoint(&["orgs", org, "teams", team_slug, "external-groups"]),
                None,
                |body: ExternalGroups| body.groups,
            )
            .await?;
        Ok(Page { next: None, ..page })
    }

    async fn audit_log(&self, enterprise: &str, phrase: &str, cursor: Option<Cursor>) -> PageResult<AuditLogEntry> {
        self.rest_page(self.listing(&["enterprises", enterprise, "audit-log"], &[("phrase", phrase), ("order", "desc")]), cursor)
            .await
    }
}

async fn check_response(resp: Response) -> Result<(Response, Option<RateBudget>), InventoryError> {
    let receipt = receipt_from_headers(resp.headers());
    let status = resp.status();
    if status.is_success() {
        return Ok((resp, receipt));
    }

    let headers = resp.headers().clone();
    let path = resp.url().path().to_string();
    let body = resp.text().await.unwrap_or_default();

    let err = error_for_status(status, &headers, &body, Utc::now()).context(format!("{status} from {path}"));
    log::debug!(target: LOG_TARGET, "{err}");
    Err(err)
}

/// Classify a failed response.
fn error_for_status(status: StatusCode, headers: &HeaderMap, body: &str, now: DateTime<Utc>) -> InventoryError {
    let message = api_message(body);

    match status {
        StatusCode::UNAUTHORIZED => InventoryError::auth(format!("credential rejected: {message}")),

        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            if let Some(after) = retry_after(headers) {
                return InventoryError::rate_limited(message, Some(after));
            }

            if header_u64(headers, "x-ratelimit-remaining") == Some(0) {
                let wait = header_i64(headers, "x-ratelimit-reset")
                    .and_then(|reset| DateTime::from_timestamp(reset, 0))
                    .and_then(|reset_at| (reset_at - now).to_std().ok());
                return InventoryError::rate_limited(message, wait);
            }

            if status == StatusCode::TOO_MANY_REQUESTS || message.to_ascii_lowercase().contains("rate limit") {
                return InventoryError::rate_limited(message, Some(SECONDARY_LIMIT_BACKOFF));
            }

            InventoryError::general(message)
        }

        s if s.is_server_error() => InventoryError::remote_api(message),

        _ => InventoryError::general(message),
    }
}

fn graph_error(errors: &[GraphError], receipt: Option<&RateBudget>, now: DateTime<Utc>) -> InventoryError {
    let message = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("; ");

    if errors.iter().any(|e| e.kind.as_deref() == Some("RATE_LIMITED")) {
        let wait = receipt.and_then(|r| (r.reset_at - now).to_std().ok());
        return InventoryError::rate_limited(message, wait.or(Some(SECONDARY_LIMIT_BACKOFF)));
    }

    InventoryError::general(format!("GraphQL error: {message}"))
}

/// The `message` field of an error payload, or the raw body.
fn api_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    serde_json::from_str::<ErrorBody>(body).map_or_else(|_| body.trim().chars().take(200).collect(), |b| b.message)
}

fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;
    NEXT_LINK_REGEX.captures(link).map(|c| c[1].to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Extract the quota receipt carried by a response.
fn receipt_from_headers(headers: &HeaderMap) -> Option<RateBudget> {
    let kind = match headers.get("x-ratelimit-resource")?.to_str().ok()? {
        "core" => BudgetKind::Primary,
        "graphql" => BudgetKind::CostWeighted,
        "audit_log" => BudgetKind::AuditLog,
        _ => return None,
    };

    Some(RateBudget {
        kind,
        remaining: header_u64(headers, "x-ratelimit-remaining")?,
        limit: header_u64(headers, "x-ratelimit-limit")?,
        reset_at: DateTime::from_timestamp(header_i64(headers, "x-ratelimit-reset")?, 0)?,
    })
}

#[derive(Debug, Deserialize)]
struct GraphResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphError>>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct EnterpriseData<N> {
    enterprise: Option<EnterpriseListing<N>>,
}

#[derive(Debug, Deserialize)]
struct EnterpriseListing<N> {
    listing: Connection<N>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<N> {
    page_info: PageInfo,
    nodes: Vec<Option<N>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnterpriseMember {
    login: Option<String>,
    name: Option<String>,
    created_at: Option<DateTime<Utc>>,
    email: Option<String>,
    user: Option<UserEmail>,
}

#[derive(Debug, Deserialize)]
struct UserEmail {
    email: Option<String>,
}

impl RawEnterpriseMember {
    fn into_user(self) -> Option<EnterpriseUser> {
        let email = self
            .email
            .or_else(|| self.user.and_then(|u| u.email))
            .filter(|e| !e.is_empty());

        Some(EnterpriseUser {
            login: self.login?,
            name: self.name.filter(|n| !n.is_empty()),
            email,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExternalGroups {
    #[serde(default)]
    groups: Vec<ExternalGroup>,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: Option<RawBudget>,
    graphql: Option<RawBudget>,
    audit_log: Option<RawBudget>,
}

#[derive(Debug, Deserialize)]
struct RawBudget {
    limit: u64,
    remaining: u64,
    reset: i64,
}
