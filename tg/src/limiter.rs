//! Token-bucket rate limiter
//!
//! The bucket holds up to `burst` tokens and gains one token per interval.
//! Every admission takes one token. A caller that finds the bucket empty
//! reserves the next token anyway and sleeps until it would have been
//! produced, so concurrent waiters are served in the order they arrived.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Cancelled;

/// How often tokens are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No rate limit; admission never blocks
    Inf,

    /// One token per interval
    Every(Duration),
}

impl From<Option<Duration>> for Limit {
    fn from(interval: Option<Duration>) -> Self {
        interval.map_or(Limit::Inf, Limit::Every)
    }
}

/// Admission gate consulted before each dispatch
#[async_trait]
pub trait Admission: Send + Sync {
    /// Block until the caller may proceed, or fail once `ctx` is cancelled
    async fn admit(&self, ctx: &CancellationToken) -> Result<(), Cancelled>;
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Token-bucket rate limiter, safe to share between tasks
pub struct RateLimiter {
    limit: Limit,
    burst: u32,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter; the bucket starts full
    ///
    /// A finite limit with a burst of zero is treated as a burst of one: the
    /// first admission is immediate and each later one waits a full interval.
    /// Setting only `every` therefore paces admissions rather than disabling
    /// the limit, unlike a Go `rate.Limiter` with burst 0, which refuses every
    /// wait and so never throttles callers that ignore that error.
    pub fn new(limit: Limit, burst: u32) -> Self {
        debug!(?limit, burst, "RateLimiter::new: called");
        Self {
            limit,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst.max(1)),
                last: Instant::now(),
            }),
        }
    }

    /// A limiter that admits everything immediately
    pub fn unlimited() -> Self {
        Self::new(Limit::Inf, 0)
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    fn capacity(&self) -> f64 {
        f64::from(self.burst.max(1))
    }

    /// Wait for a token
    ///
    /// Fails with [`Cancelled`] if `ctx` is already cancelled, or becomes
    /// cancelled before the token is due. A token reserved for a cancelled
    /// wait is returned to the bucket.
    pub async fn wait(&self, ctx: &CancellationToken) -> Result<(), Cancelled> {
        if ctx.is_cancelled() {
            debug!("RateLimiter::wait: context already cancelled");
            return Err(Cancelled);
        }

        let interval = match self.limit {
            Limit::Inf => return Ok(()),
            Limit::Every(interval) => interval,
        };

        let delay = self.reserve(interval).await;
        if delay.is_zero() {
            return Ok(());
        }

        debug!(?delay, "RateLimiter::wait: bucket empty, sleeping");
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                debug!("RateLimiter::wait: cancelled while waiting, returning token");
                self.unreserve().await;
                Err(Cancelled)
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Take a token now, possibly going into debt; returns how long until it is due
    async fn reserve(&self, interval: Duration) -> Duration {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() / interval.as_secs_f64()).min(self.capacity());
        bucket.last = now;

        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            interval.mul_f64(-bucket.tokens)
        }
    }

    async fn unreserve(&self) {
        let mut bucket = self.bucket.lock().await;
        bucket.tokens = (bucket.tokens + 1.0).min(self.capacity());
    }
}

#[async_trait]
impl Admission for RateLimiter {
    async fn admit(&self, ctx: &CancellationToken) -> Result<(), Cancelled> {
        self.wait(ctx).await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("burst", &self.burst)
            .finish()
    }
}
