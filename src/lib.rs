//! TTL Backfill
//!
//! Walks the whole keyspace of a Redis-compatible store and installs a
//! default TTL on every key that has none. The scan is cursor based,
//! rate limited per key, and supports a dry-run mode that only observes.

pub mod config;
pub mod connector;
pub mod engine;
pub mod error;

pub use config::{Config, ErrorPolicy, Topology};
pub use connector::{
    connect, ConnectionHandle, DirectConnection, FailoverConnection, KeyTtl, MemoryConnection,
    MemoryStore, ScanCursor, ScanPage,
};
pub use engine::{Engine, RateLimiter, RunCounters, RunOutcome, RunSummary};
pub use error::{BackfillError, StoreError};
