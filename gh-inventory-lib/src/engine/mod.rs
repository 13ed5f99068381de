//! Data acquisition machinery shared by every report
//!
//! This module turns many independent, paginated remote queries into safely written
//! output rows under the platform's consumption quotas, while tolerating partial failure.
//!
//! # Implementation Model
//!
//! - [`InventoryError`] classifies failures into an [`ErrorKind`] that decides whether a
//!   failure is retried, skipped, or aborts the run. [`retry_with_backoff`] retries the
//!   retryable ones with exponential backoff and jitter.
//! - [`RateGovernor`] tracks the independent quota pools reported by the platform and parks
//!   callers until a pool that is running low resets.
//! - [`SharedCache`] holds immutable snapshots of remote listings so that reports running
//!   side by side fetch each common entity set at most once.
//! - [`Pipeline`] fans items out to a bounded set of workers, gates each item through an
//!   [`ItemLimiter`], and funnels results to a single consumer that owns the [`RowSink`].
//!
//! A [`RunContext`] carries the cancellation token and fatal-error slot for one run. Every
//! blocking point in this module observes its cancellation.

mod cache;
mod context;
mod error;
mod governor;
mod limiter;
mod pipeline;
mod progress;
mod request_tracker;
mod retry;
mod sink;

pub use cache::SharedCache;
pub use context::RunContext;
pub use error::{ErrorKind, InventoryError, classify};
pub use governor::{
    BudgetKind, GovernorSettings, QuotaSource, RateBudget, RateGovernor, RateSnapshot, ensure_rate_limits, monitor_rate_limits,
};
pub use limiter::ItemLimiter;
pub use pipeline::{FanOut, Pipeline, ReportSummary, Row};
pub use progress::{NoProgress, Progress};
pub use request_tracker::{RequestTracker, TopicStatus};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use sink::{CsvSink, RowSink};
