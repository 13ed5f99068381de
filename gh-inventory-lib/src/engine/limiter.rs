use ::governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use core::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

/// Token-bucket gate in front of per-item processing.
///
/// Sustains `per_second` items per second and allows short bursts of up to `burst` items,
/// typically the pipeline's worker count.
#[derive(Debug)]
pub struct ItemLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl ItemLimiter {
    #[must_use]
    pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)),
        }
    }

    /// Wait for a token. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = self.limiter.until_ready() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::time::Instant;

    fn nz(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    #[tokio::test]
    async fn burst_is_immediate() {
        let limiter = ItemLimiter::new(nz(1), nz(5));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.acquire(&cancel).await);
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn sustained_rate_is_enforced() {
        let limiter = ItemLimiter::new(nz(20), nz(1));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.acquire(&cancel).await);
        }
        // First token is free, the next four arrive every 50ms
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn cancellation_releases_waiter() {
        let limiter = ItemLimiter::new(nz(1), nz(1));
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await);

        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }
}
