// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience utilities: flood-wait retry, send pacing, bulkheads.
//!
//! - [`RetryPolicy`] + [`retry_after_flood_wait`]: sleep the platform's
//!   signalled wait, then retry a bounded number of times
//! - [`RateLimiter`]: token bucket pacing outbound sends
//! - [`Bulkhead`]: semaphore capping concurrent transcoder processes
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), channel_mirror::resilience::BulkheadFull> {
//! use channel_mirror::resilience::{RateLimiter, Bulkhead, RateLimitConfig};
//!
//! // Pace sends: 20/sec with burst of 5
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await;
//!
//! // At most 2 ffmpeg processes at once
//! let bulkhead = Bulkhead::for_transcodes();
//! let _permit = bulkhead.acquire().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{MirrorError, Result};
use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::{InMemoryState, NotKeyed}, Quota, RateLimiter as GovLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::warn;

// =============================================================================
// Flood-wait retry
// =============================================================================

/// How to react to a [`MirrorError::RateLimited`] signal.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Delivery uses exactly one.
    pub max_retries: usize,

    /// Slept on top of the signalled wait.
    pub padding: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::delivery(Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// One retry after the signalled wait; a second signal is final.
    pub fn delivery(padding: Duration) -> Self {
        Self {
            max_retries: 1,
            padding,
        }
    }

    /// History page fetches: a few retries, the walk cannot continue without the page.
    pub fn history(padding: Duration) -> Self {
        Self {
            max_retries: 3,
            padding,
        }
    }

    /// How long to sleep for a signalled wait.
    pub fn sleep_for(&self, wait: Duration) -> Duration {
        wait.saturating_add(self.padding)
    }
}

/// Run `f`, sleeping out flood waits and retrying up to `policy.max_retries` times.
///
/// Any error other than `RateLimited` is returned immediately. When retries
/// run out, the last `RateLimited` error is returned to the caller.
pub async fn retry_after_flood_wait<F, Fut, T>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0;
    loop {
        match f().await {
            Err(MirrorError::RateLimited { wait }) if retries < policy.max_retries => {
                retries += 1;
                let sleep = policy.sleep_for(wait);
                warn!(
                    operation,
                    retry = retries,
                    wait_ms = sleep.as_millis() as u64,
                    "Rate limited, sleeping before retry"
                );
                crate::metrics::record_rate_limit_wait(operation, sleep);
                tokio::time::sleep(sleep).await;
            }
            other => return other,
        }
    }
}

/// [`retry_after_flood_wait`] for a single post's platform call: once the
/// retries are spent, a further flood wait is final for this post and is
/// reported as [`MirrorError::PermanentDelivery`].
pub async fn retry_then_give_up<F, Fut, T>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match retry_after_flood_wait(policy, operation, f).await {
        Err(MirrorError::RateLimited { wait }) => {
            warn!(
                operation,
                wait_ms = wait.as_millis() as u64,
                "Rate limited again after retry, giving up on post"
            );
            Err(MirrorError::PermanentDelivery {
                reason: format!(
                    "{} rate limited again after retry (wait {})",
                    operation,
                    humantime::format_duration(wait)
                ),
            })
        }
        other => other,
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for send pacing.
///
/// Token bucket: tokens refill at `refill_rate` per second, up to
/// `burst_size` tokens. Each send consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 20 sends/sec with burst of 5.
    fn default() -> Self {
        Self {
            burst_size: 5,
            refill_rate: 20,
        }
    }
}

/// Token bucket rate limiter.
///
/// Thread-safe and async-aware.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        let limiter = GovLimiter::direct(quota);

        Self { limiter }
    }

    /// Acquire a permit, blocking until one is available.
    ///
    /// This method is cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

// =============================================================================
// Bulkhead (Concurrency Limiter)
// =============================================================================

/// Error when bulkhead is closed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Limits concurrent operations with a semaphore.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Bulkhead for external transcoder processes.
    ///
    /// Default: 2 concurrent ffmpeg runs.
    pub fn for_transcodes() -> Self {
        Self::new(2)
    }

    /// Acquire a permit, waiting if necessary.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }
}
