//! One row per enterprise user, with organization memberships and dormancy.
//!
//! The first stage lists the members of every organization and folds them into a
//! membership index. The second stage looks up each user's most recent audit-log event.
//! A user is dormant when the later of that event and the account creation is older
//! than the configured threshold, or when neither is known.

use super::{Inventory, ReportKind, UNAVAILABLE, format_bool, format_date, optional, text, top_level};
use crate::engine::{InventoryError, ReportSummary, Row, RunContext};
use crate::platform::{EnterpriseUser, Member, Organization, Platform};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(super) const HEADER: &[&str] = &["Login", "Name", "Email", "Created", "Organizations", "Last Activity", "Dormant"];

/// Organizations each login belongs to.
#[derive(Debug, Default)]
struct Memberships {
    orgs: BTreeMap<String, Vec<String>>,

    /// Set when the member listing of at least one organization failed.
    incomplete: bool,
}

impl Memberships {
    fn build(listings: impl IntoIterator<Item = (String, Option<Arc<Vec<Member>>>)>) -> Self {
        let mut index = Self::default();
        for (org, members) in listings {
            let Some(members) = members else {
                index.incomplete = true;
                continue;
            };

            for member in members.iter() {
                index.orgs.entry(member.login.clone()).or_default().push(org.clone());
            }
        }

        for orgs in index.orgs.values_mut() {
            orgs.sort_unstable();
        }

        index
    }

    fn render(&self, login: &str) -> String {
        if self.incomplete {
            return UNAVAILABLE.to_string();
        }

        self.orgs.get(login).map(|orgs| orgs.join("; ")).unwrap_or_default()
    }
}

struct UserRecord {
    user: EnterpriseUser,

    /// `None` when the audit log could not be read, `Some(None)` when it has no events.
    last_activity: Option<Option<DateTime<Utc>>>,
}

pub(super) async fn run<P: Platform>(inv: &Inventory<P>, ctx: &RunContext) -> Result<ReportSummary, InventoryError> {
    let kind = ReportKind::Users;
    let sink = inv.open_sink(kind)?;
    let pipeline = inv.pipeline(kind, ctx);
    let cancel = pipeline.context().token().clone();

    let orgs = top_level(pipeline.context(), inv.organizations(&cancel)).await?;

    let list_members = {
        let inv = inv.clone();
        let cancel = cancel.clone();
        move |org: Organization| {
            let inv = inv.clone();
            let cancel = cancel.clone();
            async move {
                let members = optional(inv.org_members(&cancel, &org.login).await, &org.login)?;
                Ok::<_, InventoryError>((org.login, members))
            }
        }
    };

    let listings = pipeline.fan_out(pipeline.feed(orgs.to_vec()), list_members).collect().await;
    if let Some(fatal) = pipeline.context().take_fatal() {
        return Err(fatal);
    }

    let memberships = Memberships::build(listings);
    log::debug!(target: super::LOG_TARGET, "Indexed {} organization member(s)", memberships.orgs.len());

    let users = top_level(pipeline.context(), inv.enterprise_users(&cancel)).await?;

    let lookup_activity = {
        let inv = inv.clone();
        move |user: EnterpriseUser| {
            let inv = inv.clone();
            let cancel = cancel.clone();
            async move {
                let last_activity = optional(inv.last_activity(&cancel, &user.login).await, &user.login)?;
                Ok::<_, InventoryError>(UserRecord { user, last_activity })
            }
        }
    };

    let dormant_after = TimeDelta::from_std(inv.settings().dormant_after).unwrap_or(TimeDelta::MAX);
    let now = Utc::now();

    let results = pipeline.fan_out(pipeline.feed(users.to_vec()), lookup_activity);
    pipeline
        .drain_into(results, |record| vec![format(&record, &memberships, now, dormant_after)], sink)
        .await
}

fn format(record: &UserRecord, memberships: &Memberships, now: DateTime<Utc>, dormant_after: TimeDelta) -> Row {
    let user = &record.user;

    let (last_activity, dormant) = match record.last_activity {
        Some(last) => {
            let reference = last.max(user.created_at);
            let dormant = reference.is_none_or(|at| now.signed_duration_since(at) > dormant_after);
            (format_date(last), format_bool(dormant))
        }
        None => (UNAVAILABLE.to_string(), UNAVAILABLE),
    };

    vec![
        user.login.clone(),
        text(user.name.as_deref()),
        text(user.email.as_deref()),
        format_date(user.created_at),
        memberships.render(&user.login),
        last_activity,
        dormant.to_string(),
    ]
}
