//! Rate Limiter
//!
//! Pacing gate in front of every key: admissions are at least
//! `1 / rate` seconds apart.

use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Minimum-spacing rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    ticker: Interval,
    period: Duration,
}

impl RateLimiter {
    /// Admit at most `rate` operations per second. Must be called from
    /// within a tokio runtime.
    pub fn per_second(rate: u32) -> Self {
        let rate = u64::from(rate.max(1));
        let period = Duration::from_nanos((1_000_000_000 / rate).max(1));

        let mut ticker = interval(period);
        // After a slow operation, wait a full period again instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self { ticker, period }
    }

    /// Wait until the next operation is admitted. The first call returns
    /// immediately.
    pub async fn acquire(&mut self) {
        self.ticker.tick().await;
    }

    /// Spacing between admissions
    pub fn period(&self) -> Duration {
        self.period
    }
}
