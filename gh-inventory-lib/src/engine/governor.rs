//! Dual-budget rate governor.
//!
//! The platform enforces several quota pools that are exhausted independently: a plain
//! call count for REST requests, a cost-weighted pool for GraphQL queries, and (on some plan
//! tiers) a separate pool for audit-log queries. Each has its own reset horizon. Every call
//! site asks the governor for headroom in the pools it is about to draw from, and the
//! governor parks it until the pool resets when the remaining quota is below threshold.

use super::{InventoryError, RequestTracker, RetryPolicy, retry_with_backoff};
use chrono::{DateTime, Utc};
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::sync::{Arc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "  governor";

/// One of the independently tracked remote quota pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum BudgetKind {
    /// Plain call count (REST).
    Primary,

    /// Point-weighted pool consumed by graph queries.
    CostWeighted,

    /// Audit-log query pool. Absent on some plan tiers.
    AuditLog,
}

impl BudgetKind {
    /// All budget kinds in a consistent order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Primary, Self::CostWeighted, Self::AuditLog]
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Quota state of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub kind: BudgetKind,
    pub remaining: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

/// Quota state of every pool the platform reported.
///
/// A pool that is missing from the snapshot imposes no constraint.
#[derive(Debug, Clone, Default)]
pub struct RateSnapshot {
    budgets: [Option<RateBudget>; 3],
    refreshed_at: Option<Instant>,
}

impl RateSnapshot {
    #[must_use]
    pub fn new(budgets: impl IntoIterator<Item = RateBudget>) -> Self {
        let mut snapshot = Self::default();
        for budget in budgets {
            snapshot.set(budget);
        }
        snapshot
    }

    #[must_use]
    pub const fn get(&self, kind: BudgetKind) -> Option<&RateBudget> {
        self.budgets[kind.index()].as_ref()
    }

    /// Iterate over the pools that are present.
    pub fn budgets(&self) -> impl Iterator<Item = &RateBudget> {
        self.budgets.iter().flatten()
    }

    const fn set(&mut self, budget: RateBudget) {
        self.budgets[budget.kind.index()] = Some(budget);
    }
}

/// Something that can report the current quota state.
pub trait QuotaSource: Send + Sync {
    fn rate_limits(&self) -> impl Future<Output = Result<RateSnapshot, InventoryError>> + Send;
}

/// Tuning knobs for [`RateGovernor`].
#[derive(Debug, Clone, Copy)]
pub struct GovernorSettings {
    pub primary_threshold: u64,
    pub cost_weighted_threshold: u64,
    pub audit_log_threshold: u64,

    /// Extra time to wait past the reported reset instant.
    pub cushion: Duration,

    /// How long a snapshot is trusted before it is fetched again.
    pub snapshot_max_age: Duration,

    /// Retry policy for quota status queries.
    pub check_retry: RetryPolicy,
}

impl GovernorSettings {
    const fn threshold(&self, kind: BudgetKind) -> u64 {
        match kind {
            BudgetKind::Primary => self.primary_threshold,
            BudgetKind::CostWeighted => self.cost_weighted_threshold,
            BudgetKind::AuditLog => self.audit_log_threshold,
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            primary_threshold: 100,
            cost_weighted_threshold: 100,
            audit_log_threshold: 10,
            cushion: Duration::from_secs(5),
            snapshot_max_age: Duration::from_secs(30),
            check_retry: RetryPolicy::new(2, Duration::from_millis(250)),
        }
    }
}

/// Tracks the platform's quota pools and blocks callers when a pool runs low.
pub struct RateGovernor<Q> {
    source: Arc<Q>,
    settings: GovernorSettings,
    snapshot: RwLock<RateSnapshot>,
    refreshing: tokio::sync::Mutex<()>,
    waiters: AtomicUsize,
    tracker: Option<RequestTracker>,
}

impl<Q> core::fmt::Debug for RateGovernor<Q> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RateGovernor")
            .field("settings", &self.settings)
            .field("snapshot", &self.snapshot)
            .field("waiters", &self.waiters)
            .finish_non_exhaustive()
    }
}

impl<Q: QuotaSource> RateGovernor<Q> {
    #[must_use]
    pub fn new(source: Arc<Q>, settings: GovernorSettings) -> Self {
        Self {
            source,
            settings,
            snapshot: RwLock::new(RateSnapshot::default()),
            refreshing: tokio::sync::Mutex::new(()),
            waiters: AtomicUsize::new(0),
            tracker: None,
        }
    }

    /// Report waits through the given tracker.
    #[must_use]
    pub fn with_tracker(mut self, tracker: RequestTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// A copy of the most recent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RateSnapshot {
        self.snapshot.read().expect("lock poisoned").clone()
    }

    /// Query the platform for the current quota state and remember it.
    ///
    /// Transient failures are retried a few times before the error is surfaced.
    /// If `cancel` fires first, the last known snapshot is returned.
    pub async fn check_budgets(&self, cancel: &CancellationToken) -> Result<RateSnapshot, InventoryError> {
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(self.snapshot()),
            result = retry_with_backoff(&self.settings.check_retry, cancel, || self.source.rate_limits()) => result?,
        };

        let mut snapshot = fetched;
        snapshot.refreshed_at = Some(Instant::now());
        *self.snapshot.write().expect("lock poisoned") = snapshot.clone();
        Ok(snapshot)
    }

    /// Fold a quota receipt returned alongside a page into the snapshot.
    pub fn observe(&self, receipt: Option<RateBudget>) {
        if let Some(budget) = receipt {
            self.snapshot.write().expect("lock poisoned").set(budget);
        }
    }

    /// Block until every pool in `kinds` has headroom, or until `cancel` fires.
    ///
    /// A pool below its threshold is waited out until its reset instant plus a cushion.
    /// A failure to read the quota state is logged and treated as "no need to wait".
    pub async fn ensure_headroom(&self, cancel: &CancellationToken, kinds: &[BudgetKind]) {
        if cancel.is_cancelled() {
            return;
        }

        if self.is_stale() {
            self.refresh(cancel).await;
        }

        let Some((budget, wait)) = self.longest_required_wait(kinds, Utc::now()) else {
            return;
        };

        let first_waiter = self.waiters.fetch_add(1, Ordering::AcqRel) == 0;
        if first_waiter {
            let resume_at = (Utc::now() + wait).with_timezone(&chrono::Local).format("%T");
            log::warn!(
                target: LOG_TARGET,
                "{} budget low ({}/{} remaining), waiting until {resume_at}",
                budget.kind,
                budget.remaining,
                budget.limit
            );
            if let Some(tracker) = &self.tracker {
                tracker.set_blocked(true);
                if !log::log_enabled!(log::Level::Warn) {
                    tracker.println(&format!("{} rate limit low: waiting until {resume_at}...", budget.kind));
                }
            }
        } else {
            log::debug!(target: LOG_TARGET, "{} budget low, waiting {}s", budget.kind, wait.as_secs());
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(wait) => {}
        }

        let last_waiter = self.waiters.fetch_sub(1, Ordering::AcqRel) == 1;
        if last_waiter && let Some(tracker) = &self.tracker {
            tracker.set_blocked(false);
        }

        self.mark_stale();
    }

    /// Periodically log every pool's state until `cancel` fires.
    pub async fn monitor(&self, cancel: &CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.check_budgets(cancel).await {
                Ok(snapshot) => {
                    for budget in snapshot.budgets() {
                        log::info!(
                            target: LOG_TARGET,
                            "{} budget: {}/{} remaining, resets at {}",
                            budget.kind,
                            budget.remaining,
                            budget.limit,
                            budget.reset_at.with_timezone(&chrono::Local).format("%T")
                        );
                    }
                }
                Err(e) => log::warn!(target: LOG_TARGET, "Could not read rate limit status: {e:#}"),
            }
        }

        log::debug!(target: LOG_TARGET, "Rate limit monitor stopped");
    }

    /// Refresh a stale snapshot. Concurrent callers share a single query.
    ///
    /// A failed query still counts as a refresh so that callers do not pile up behind it;
    /// the next attempt happens once the snapshot ages out again.
    async fn refresh(&self, cancel: &CancellationToken) {
        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            guard = self.refreshing.lock() => guard,
        };

        if !self.is_stale() {
            return;
        }

        if let Err(e) = self.check_budgets(cancel).await {
            log::warn!(target: LOG_TARGET, "Could not read rate limit status, proceeding without waiting: {e:#}");
            self.snapshot.write().expect("lock poisoned").refreshed_at = Some(Instant::now());
        }
    }

    fn is_stale(&self) -> bool {
        self.snapshot
            .read()
            .expect("lock poisoned")
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= self.settings.snapshot_max_age)
    }

    fn mark_stale(&self) {
        self.snapshot.write().expect("lock poisoned").refreshed_at = None;
    }

    /// Among the requested pools that are below threshold, find the one with the longest wait.
    fn longest_required_wait(&self, kinds: &[BudgetKind], now: DateTime<Utc>) -> Option<(RateBudget, Duration)> {
        let snapshot = self.snapshot.read().expect("lock poisoned");
        kinds
            .iter()
            .filter_map(|&kind| snapshot.get(kind).copied())
            .filter(|budget| budget.remaining < self.settings.threshold(budget.kind))
            .map(|budget| {
                let until_reset = (budget.reset_at - now).to_std().unwrap_or(Duration::ZERO);
                (budget, until_reset + self.settings.cushion)
            })
            .max_by_key(|(_, wait)| *wait)
    }
}

/// Wait until every quota pool has headroom. Failures are logged, never returned.
pub async fn ensure_rate_limits<Q: QuotaSource>(cancel: &CancellationToken, governor: &RateGovernor<Q>) {
    governor.ensure_headroom(cancel, &BudgetKind::all()).await;
}

/// Log quota state every `interval` until `cancel` fires. Failures are logged, never returned.
pub async fn monitor_rate_limits<Q: QuotaSource>(cancel: &CancellationToken, governor: &RateGovernor<Q>, interval: Duration) {
    governor.monitor(cancel, interval).await;
}
