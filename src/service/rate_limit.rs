// src/service/rate_limit.rs
//! Per-actor request budget.
//!
//! Each outbound call is charged exactly once through [`RateLimiter::admit`].
//! The limiter is owned by a single actor and never shared between sources.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use tracing::{debug, warn};

use crate::error::{ReconError, ReconResult};
use super::shutdown::ShutdownSignal;

pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
    per_second: NonZeroU32,
    admitted: AtomicU64,
    shutdown: ShutdownSignal,
}

impl RateLimiter {
    /// Ceiling of `per_second` outbound calls, spaced evenly (no bursts)
    pub fn new(per_second: u32, shutdown: ShutdownSignal) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or_else(|| {
            warn!("Rate limit of 0 requests per second is invalid, using 1");
            NonZeroU32::MIN
        });
        let quota = Quota::per_second(per_second).allow_burst(NonZeroU32::MIN);

        Self {
            limiter: GovernorRateLimiter::direct(quota),
            per_second,
            admitted: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Block until the budget admits one more outbound call.
    ///
    /// Fails with `Cancelled` once the owning actor was asked to stop, so no
    /// new call starts after cancellation.
    pub async fn admit(&self) -> ReconResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ReconError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ReconError::Cancelled),
            _ = self.limiter.until_ready() => {
                let count = self.admitted.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Rate limit admission #{}", count);
                Ok(())
            }
        }
    }

    /// Number of admissions granted so far
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn per_second(&self) -> u32 {
        self.per_second.get()
    }
}
