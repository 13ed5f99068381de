//! Error classification.
//!
//! Every failure that crosses the engine boundary is an [`InventoryError`] tagged with an
//! [`ErrorKind`]. The kind alone decides what happens next: retryable kinds go back through
//! [`retry_with_backoff`](super::retry_with_backoff), fatal kinds abort the run, and the rest
//! degrade to a skipped item or a placeholder cell.

use core::time::Duration;
use core::error::Error as StdError;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// Anything that could not be classified more precisely.
    General,

    /// A remote call failed in a way that may succeed if repeated.
    RemoteApi,

    /// A remote quota pool is exhausted.
    RateLimit,

    /// The credential was rejected. No retry can fix this.
    Auth,

    /// The configuration is invalid. Detected before any remote call.
    Config,

    /// Local filesystem failure.
    Io,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth repeating.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RemoteApi | Self::RateLimit)
    }

    /// Whether a failure of this kind must abort the entire run.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Auth | Self::Config)
    }
}

/// A classified failure.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct InventoryError {
    kind: ErrorKind,
    message: String,
    retry_after: Option<Duration>,
    #[source]
    source: Option<BoxError>,
}

impl InventoryError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::General, message)
    }

    pub fn remote_api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteApi, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// A quota exhaustion, optionally with the delay the server asked for.
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ErrorKind::RateLimit, message)
        }
    }

    /// Wrap the last cause of an operation that kept failing.
    ///
    /// The wrapper keeps the cause's kind so that callers further up still see why the
    /// entity was unavailable.
    #[must_use]
    pub fn max_retries(attempts: u32, last: Self) -> Self {
        Self {
            kind: last.kind,
            message: format!("max retries reached after {attempts} attempt(s): {last}"),
            retry_after: None,
            source: Some(Box::new(last)),
        }
    }

    /// Classify an arbitrary error.
    ///
    /// An error that already is an [`InventoryError`] is returned untouched. Anything else is
    /// classified by walking its source chain with [`classify`].
    pub fn classified(err: impl Into<BoxError>) -> Self {
        let err: BoxError = err.into();
        match err.downcast::<Self>() {
            Ok(inner) => *inner,
            Err(err) => Self {
                kind: classify(err.as_ref()),
                message: err.to_string(),
                retry_after: None,
                source: Some(err),
            },
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Prefix the message with what was being attempted.
    #[must_use]
    pub fn context(mut self, what: impl core::fmt::Display) -> Self {
        self.message = format!("{what}: {}", self.message);
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Delay requested by the server before the next attempt, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl From<reqwest::Error> for InventoryError {
    fn from(err: reqwest::Error) -> Self {
        Self::classified(err)
    }
}

impl From<std::io::Error> for InventoryError {
    fn from(err: std::io::Error) -> Self {
        Self::classified(err)
    }
}

impl From<csv::Error> for InventoryError {
    fn from(err: csv::Error) -> Self {
        Self::classified(err)
    }
}

impl From<serde_json::Error> for InventoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::classified(err)
    }
}

/// Determine the kind of an arbitrary error by walking its source chain.
///
/// The first recognized error in the chain wins. Unrecognized chains are [`ErrorKind::General`].
#[must_use]
pub fn classify(err: &(dyn StdError + 'static)) -> ErrorKind {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(e) = e.downcast_ref::<InventoryError>() {
            return e.kind;
        }

        if let Some(e) = e.downcast_ref::<reqwest::Error>() {
            return classify_reqwest(e);
        }

        if e.is::<std::io::Error>() {
            return ErrorKind::Io;
        }

        if let Some(e) = e.downcast_ref::<csv::Error>() {
            return if e.is_io_error() { ErrorKind::Io } else { ErrorKind::General };
        }

        // A truncated or garbled response body
        if e.is::<serde_json::Error>() {
            return ErrorKind::RemoteApi;
        }

        current = e.source();
    }

    ErrorKind::General
}

fn classify_reqwest(err: &reqwest::Error) -> ErrorKind {
    match err.status() {
        Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => ErrorKind::Auth,
        Some(status) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimit,
        Some(status) if status.is_server_error() => ErrorKind::RemoteApi,
        Some(_) => ErrorKind::General,
        None if err.is_builder() => ErrorKind::General,
        None => ErrorKind::RemoteApi,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failure")]
    struct Outer(#[source] io::Error);

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::RemoteApi.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::General.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::Config.is_retryable());
        assert!(!ErrorKind::Io.is_retryable());
    }

    #[test]
    fn fatal_kinds() {
        assert!(ErrorKind::Auth.is_fatal());
        assert!(ErrorKind::Config.is_fatal());
        assert!(!ErrorKind::RemoteApi.is_fatal());
        assert!(!ErrorKind::Io.is_fatal());
    }

    #[test]
    fn kind_display_is_kebab_case() {
        assert_eq!(ErrorKind::RemoteApi.to_string(), "remote-api");
        assert_eq!(ErrorKind::RateLimit.to_string(), "rate-limit");
        assert_eq!(ErrorKind::Io.to_string(), "io");
    }

    #[test]
    fn io_errors_classify_as_io() {
        let err = InventoryError::from(io::Error::other("disk full"));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn classify_walks_source_chain() {
        let err = Outer(io::Error::other("nested"));
        assert_eq!(classify(&err), ErrorKind::Io);
    }

    #[test]
    fn classify_unknown_is_general() {
        let err = core::fmt::Error;
        assert_eq!(classify(&err), ErrorKind::General);
    }

    #[test]
    fn classified_keeps_existing_inventory_error() {
        let original = InventoryError::auth("bad credentials");
        let err = InventoryError::classified(original);
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert_eq!(err.to_string(), "bad credentials");
    }

    #[test]
    fn classified_json_error_is_retryable() {
        let parse_err = serde_json::from_str::<u32>("{").unwrap_err();
        let err = InventoryError::from(parse_err);
        assert_eq!(err.kind(), ErrorKind::RemoteApi);
        assert!(err.is_retryable());
    }

    #[test]
    fn max_retries_keeps_cause_kind() {
        let err = InventoryError::max_retries(4, InventoryError::remote_api("502 bad gateway"));
        assert_eq!(err.kind(), ErrorKind::RemoteApi);
        assert!(err.to_string().starts_with("max retries reached after 4 attempt(s)"));
        assert!(err.source().is_some());
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = InventoryError::rate_limited("slow down", Some(Duration::from_secs(30)));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn context_prefixes_message() {
        let err = InventoryError::remote_api("timed out").context("listing repositories for 'acme'");
        assert_eq!(err.to_string(), "listing repositories for 'acme': timed out");
    }
}
