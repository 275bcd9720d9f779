//! Run Counters
//!
//! Per-run totals and the operator-facing summary.

use std::fmt;
use std::time::Duration;

/// Totals accumulated by one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    /// Keys observed
    pub processed: u64,

    /// Keys whose TTL was set (or would have been, in dry-run)
    pub backfilled: u64,

    /// Keys skipped after a per-key failure
    pub errors: u64,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The scan cursor was exhausted
    Completed,
    /// Stopped on request before the keyspace was exhausted
    Cancelled,
}

/// Result of a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: RunCounters,
    pub dry_run: bool,
    pub elapsed: Duration,
    pub outcome: RunOutcome,
}

impl RunSummary {
    /// Keys per second over the whole run
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.counters.processed as f64 / secs
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            write!(
                f,
                "Processed {} keys. Would set {} keys (dry run).",
                self.counters.processed, self.counters.backfilled
            )?;
        } else {
            write!(
                f,
                "Processed {} keys. Set {} keys.",
                self.counters.processed, self.counters.backfilled
            )?;
        }
        if self.counters.errors > 0 {
            write!(f, " Skipped {} keys after errors.", self.counters.errors)?;
        }
        Ok(())
    }
}
