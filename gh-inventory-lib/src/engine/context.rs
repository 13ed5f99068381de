use super::{InventoryError, RequestTracker};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "   context";

/// Cancellation and fatal-error state for one run.
///
/// Clones share state. A [`child`](Self::child) context has its own cancellation token
/// (cancelled whenever the parent's is) but still aborts the whole run on a fatal error.
#[derive(Debug, Clone)]
pub struct RunContext {
    root: CancellationToken,
    cancel: CancellationToken,
    fatal: Arc<Mutex<Option<InventoryError>>>,
    tracker: Option<RequestTracker>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        let root = CancellationToken::new();
        Self {
            cancel: root.clone(),
            root,
            fatal: Arc::new(Mutex::new(None)),
            tracker: None,
        }
    }

    #[must_use]
    pub fn with_tracker(mut self, tracker: RequestTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// A context whose token can be cancelled without affecting this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            root: self.root.clone(),
            cancel: self.cancel.child_token(),
            fatal: Arc::clone(&self.fatal),
            tracker: self.tracker.clone(),
        }
    }

    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel this context and its children.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub const fn tracker(&self) -> Option<&RequestTracker> {
        self.tracker.as_ref()
    }

    /// Record a fatal error and cancel the whole run. Only the first error is kept.
    pub fn abort(&self, err: InventoryError) {
        log::error!(target: LOG_TARGET, "Aborting run after {} error: {err}", err.kind());
        {
            let mut slot = self.fatal.lock().expect("lock poisoned");
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.root.cancel();
    }

    /// Cancel the whole run because of `err` and hand the error back.
    ///
    /// Unlike [`abort`](Self::abort) the error is not recorded: the caller returns it itself,
    /// and sibling pipelines finish with what they have written.
    #[must_use]
    pub fn escalate(&self, err: InventoryError) -> InventoryError {
        log::error!(target: LOG_TARGET, "Aborting run after {} error: {err}", err.kind());
        self.root.cancel();
        err
    }

    /// Take the recorded fatal error, if any.
    #[must_use]
    pub fn take_fatal(&self) -> Option<InventoryError> {
        self.fatal.lock().expect("lock poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ErrorKind;

    #[test]
    fn escalate_cancels_root_without_recording() {
        let ctx = RunContext::new();
        let sibling = ctx.child();

        let err = sibling.escalate(InventoryError::config("enterprise 'acme' does not exist"));

        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(ctx.is_cancelled());
        assert!(sibling.is_cancelled());
        assert!(ctx.take_fatal().is_none());
    }

    #[test]
    fn abort_cancels_root_and_keeps_first_error() {
        let ctx = RunContext::new();
        let child = ctx.child();

        child.abort(InventoryError::auth("bad credentials"));
        child.abort(InventoryError::config("second"));

        assert!(ctx.is_cancelled());
        assert!(child.is_cancelled());

        let fatal = ctx.take_fatal().unwrap();
        assert_eq!(fatal.kind(), ErrorKind::Auth);
        assert!(ctx.take_fatal().is_none());
    }

    #[test]
    fn cancelling_child_leaves_parent_running() {
        let ctx = RunContext::new();
        let child = ctx.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn cancelling_parent_reaches_child() {
        let ctx = RunContext::new();
        let child = ctx.child();

        ctx.cancel();

        assert!(child.is_cancelled());
    }
}
