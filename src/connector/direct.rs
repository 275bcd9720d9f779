//! Direct Connection
//!
//! Talks to exactly one fixed Redis address for the whole run.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::debug;

use super::{parse_port, redis_settings, ConnectionHandle, KeyTtl, ScanCursor, ScanPage};
use crate::config::Config;
use crate::error::{BackfillError, StoreError};

/// Connection to a single Redis node
pub struct DirectConnection {
    addr: String,
    conn: MultiplexedConnection,
}

impl DirectConnection {
    /// Build the client and perform the initial handshake
    pub async fn connect(config: &Config) -> Result<Self, BackfillError> {
        let port = parse_port(&config.port)?;
        let addr = format!("{}:{}", config.host, port);

        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(config.host.clone(), port),
            redis: redis_settings(config),
        };
        let client = redis::Client::open(info).map_err(|e| {
            BackfillError::Connection(format!("invalid address {}: {}", addr, e))
        })?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackfillError::Connection(format!("failed to connect to {}: {}", addr, e)))?;

        debug!(addr = %addr, "Connected");
        Ok(Self { addr, conn })
    }
}

#[async_trait]
impl ConnectionHandle for DirectConnection {
    async fn scan_next(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let (next, keys): (u64, Vec<Vec<u8>>) = scan_cmd(cursor, pattern, count)
            .query_async(&mut self.conn)
            .await?;
        Ok(into_page(next, keys))
    }

    async fn get_ttl(&mut self, key: &[u8]) -> Result<KeyTtl, StoreError> {
        let reply: i64 = ttl_cmd(key).query_async(&mut self.conn).await?;
        KeyTtl::from_reply(reply)
    }

    async fn set_ttl(&mut self, key: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        let reply: i64 = expire_cmd(key, ttl).query_async(&mut self.conn).await?;
        Ok(reply == 1)
    }

    fn describe(&self) -> String {
        format!("direct({})", self.addr)
    }
}

/// `SCAN <cursor> MATCH <pattern> COUNT <count>`
pub(super) fn scan_cmd(cursor: ScanCursor, pattern: &str, count: usize) -> redis::Cmd {
    let mut cmd = redis::cmd("SCAN");
    cmd.arg(cursor.0)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(count);
    cmd
}

/// `TTL <key>`
pub(super) fn ttl_cmd(key: &[u8]) -> redis::Cmd {
    let mut cmd = redis::cmd("TTL");
    cmd.arg(key);
    cmd
}

/// `EXPIRE <key> <seconds>`
pub(super) fn expire_cmd(key: &[u8], ttl: Duration) -> redis::Cmd {
    let mut cmd = redis::cmd("EXPIRE");
    cmd.arg(key).arg(ttl.as_secs());
    cmd
}

pub(super) fn into_page(next: u64, keys: Vec<Vec<u8>>) -> ScanPage {
    ScanPage {
        next: ScanCursor(next),
        keys: keys.into_iter().map(Into::into).collect(),
    }
}
