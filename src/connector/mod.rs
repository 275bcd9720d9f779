//! Store Connector
//!
//! One command interface over the store, whatever the topology. The
//! [`connect`] factory picks the backend once at startup; the engine only
//! ever sees a [`ConnectionHandle`].

mod direct;
mod failover;
mod memory;

pub use direct::DirectConnection;
pub use failover::FailoverConnection;
pub use memory::{glob_match, Fault, MemoryConnection, MemoryStore};

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::{Config, Topology};
use crate::error::{BackfillError, StoreError};

/// Position in a keyspace traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanCursor(pub u64);

impl ScanCursor {
    /// Where every traversal starts, and where the store returns once it is done
    pub const START: ScanCursor = ScanCursor(0);

    pub fn is_start(self) -> bool {
        self == Self::START
    }
}

/// One page of a keyspace scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    /// Cursor for the next call
    pub next: ScanCursor,
    /// Keys in this page
    pub keys: Vec<Bytes>,
}

/// Decoded TTL reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key exists and never expires
    NoExpiry,
    /// Key does not exist (expired or deleted since the scan saw it)
    Missing,
    /// Key expires after this long
    Expires(Duration),
}

impl KeyTtl {
    /// Decode a `TTL` reply: `-1` no expiry, `-2` missing, otherwise seconds
    pub fn from_reply(reply: i64) -> Result<Self, StoreError> {
        match reply {
            -1 => Ok(KeyTtl::NoExpiry),
            -2 => Ok(KeyTtl::Missing),
            secs if secs >= 0 => Ok(KeyTtl::Expires(Duration::from_secs(secs as u64))),
            other => Err(StoreError::Protocol(format!("TTL returned {}", other))),
        }
    }
}

/// Commands the backfill engine needs from a store
#[async_trait]
pub trait ConnectionHandle: Send {
    /// Fetch the page of keys matching `pattern` at `cursor`.
    /// `count` is a hint; the store may return more or fewer keys.
    async fn scan_next(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError>;

    /// Read the remaining time to live of `key`
    async fn get_ttl(&mut self, key: &[u8]) -> Result<KeyTtl, StoreError>;

    /// Install `ttl` on `key`. Returns false if the key no longer exists.
    async fn set_ttl(&mut self, key: &[u8], ttl: Duration) -> Result<bool, StoreError>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Build the connection handle for the configured topology
pub async fn connect(config: &Config) -> Result<Box<dyn ConnectionHandle>, BackfillError> {
    match config.topology {
        Topology::Failover => {
            info!("Using Redis Sentinel connection");
            let conn = FailoverConnection::connect(config).await?;
            Ok(Box::new(conn))
        }
        Topology::Direct => {
            info!("Using direct Redis connection");
            let conn = DirectConnection::connect(config).await?;
            Ok(Box::new(conn))
        }
    }
}

/// Parse the textual port from the configuration
pub(crate) fn parse_port(port: &str) -> Result<u16, BackfillError> {
    port.trim()
        .parse::<u16>()
        .map_err(|_| BackfillError::Connection(format!("invalid port: {:?}", port)))
}

/// Connection details shared by both Redis topologies
pub(crate) fn redis_settings(config: &Config) -> redis::RedisConnectionInfo {
    redis::RedisConnectionInfo {
        db: config.database,
        username: config.username.clone(),
        password: config.password.clone(),
        ..Default::default()
    }
}

/// Printable form of a binary key
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
