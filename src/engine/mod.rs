//! Backfill Engine
//!
//! Drives one traversal of the keyspace: page through SCAN, wait on the
//! rate limiter once per key, read the key's TTL and install the default
//! TTL when none is set. One engine performs one run.

mod counters;
mod rate_limit;

pub use counters::{RunCounters, RunOutcome, RunSummary};
pub use rate_limit::RateLimiter;

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, ErrorPolicy};
use crate::connector::{display_key, ConnectionHandle, KeyTtl, ScanCursor};
use crate::error::{BackfillError, Result};

/// TTL backfill run over one connection
pub struct Engine {
    conn: Box<dyn ConnectionHandle>,
    dry_run: bool,
    default_ttl: Duration,
    pattern: String,
    scan_count: usize,
    rate_limit: u32,
    error_policy: ErrorPolicy,
    progress_interval: u64,
    progress: Option<UnboundedSender<RunCounters>>,
    counters: RunCounters,
}

impl Engine {
    /// Create an engine that owns `conn` for the duration of the run
    pub fn new(conn: Box<dyn ConnectionHandle>, config: &Config) -> Self {
        Self {
            conn,
            dry_run: config.dry_run,
            default_ttl: config.default_ttl,
            pattern: config.pattern.clone(),
            scan_count: config.scan_count,
            rate_limit: config.rate_limit,
            error_policy: config.error_policy,
            progress_interval: config.progress_interval.max(1),
            progress: None,
            counters: RunCounters::default(),
        }
    }

    /// Also send a counters snapshot to `tx` on every progress report
    pub fn with_progress(mut self, tx: UnboundedSender<RunCounters>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Counters so far; still valid after a failed run
    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    /// Traverse the whole keyspace
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.run_until(CancellationToken::new()).await
    }

    /// Traverse the whole keyspace, stopping early once `cancel` fires.
    /// Cancellation is only observed while waiting on the rate limiter, so
    /// an in-flight store command always completes first.
    pub async fn run_until(&mut self, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let mut limiter = RateLimiter::per_second(self.rate_limit);

        info!(
            conn = %self.conn.describe(),
            rate_limit = self.rate_limit,
            dry_run = self.dry_run,
            pattern = %self.pattern,
            "Starting keyspace scan"
        );

        let mut cursor = ScanCursor::START;
        loop {
            let page = self
                .conn
                .scan_next(cursor, &self.pattern, self.scan_count)
                .await
                .map_err(|source| BackfillError::Scan { source })?;
            trace!(cursor = cursor.0, next = page.next.0, keys = page.keys.len(), "Scanned page");

            for key in page.keys {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(processed = self.counters.processed, "Scan cancelled");
                        return Ok(self.summary(RunOutcome::Cancelled, started));
                    }
                    _ = limiter.acquire() => {}
                }
                self.process(&key).await?;
            }

            if page.next.is_start() {
                break;
            }
            cursor = page.next;
        }

        let summary = self.summary(RunOutcome::Completed, started);
        info!(
            processed = summary.counters.processed,
            backfilled = summary.counters.backfilled,
            errors = summary.counters.errors,
            elapsed = ?summary.elapsed,
            keys_per_sec = format_args!("{:.1}", summary.throughput()),
            "Keyspace scan complete"
        );
        Ok(summary)
    }

    /// Inspect one key, apply the error policy and advance the counters
    async fn process(&mut self, key: &Bytes) -> Result<()> {
        if let Err(err) = self.inspect(key).await {
            match self.error_policy {
                ErrorPolicy::Abort => return Err(err),
                ErrorPolicy::SkipKey if err.is_connection_failure() => return Err(err),
                ErrorPolicy::SkipKey => {
                    warn!(error = %err, "Skipping key");
                    self.counters.errors += 1;
                }
            }
        }

        self.counters.processed += 1;
        if self.counters.processed % self.progress_interval == 0 {
            info!("Processed {} keys so far...", self.counters.processed);
            if let Some(tx) = &self.progress {
                let _ = tx.send(self.counters);
            }
        }
        Ok(())
    }

    /// Read the key's TTL and install the default one if none is set
    async fn inspect(&mut self, key: &Bytes) -> Result<()> {
        let ttl = self
            .conn
            .get_ttl(key)
            .await
            .map_err(|source| BackfillError::TtlRead {
                key: display_key(key),
                source,
            })?;

        match ttl {
            KeyTtl::NoExpiry => {
                if !self.dry_run {
                    let applied = self
                        .conn
                        .set_ttl(key, self.default_ttl)
                        .await
                        .map_err(|source| BackfillError::TtlWrite {
                            key: display_key(key),
                            source,
                        })?;
                    if !applied {
                        debug!(key = %display_key(key), "Key vanished before its TTL was set");
                    }
                }
                self.counters.backfilled += 1;
                debug!(
                    key = %display_key(key),
                    ttl_secs = self.default_ttl.as_secs(),
                    dry_run = self.dry_run,
                    "Key didn't have a TTL and was set"
                );
            }
            KeyTtl::Missing => {
                trace!(key = %display_key(key), "Key vanished since scan");
            }
            KeyTtl::Expires(remaining) => {
                trace!(key = %display_key(key), ttl = ?remaining, "Key already has a TTL");
            }
        }
        Ok(())
    }

    fn summary(&self, outcome: RunOutcome, started: Instant) -> RunSummary {
        RunSummary {
            counters: self.counters,
            dry_run: self.dry_run,
            elapsed: started.elapsed(),
            outcome,
        }
    }
}
