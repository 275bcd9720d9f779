//! Failover Connection
//!
//! Resolves the current primary through a sentinel endpoint. When a
//! command fails because the primary went away or was demoted, the
//! primary is resolved again and the command retried once.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::sentinel::{SentinelClient, SentinelNodeConnectionInfo, SentinelServerType};
use redis::{ErrorKind, FromRedisValue, RedisError, RedisResult};
use std::time::Duration;
use tracing::{debug, warn};

use super::direct::{expire_cmd, into_page, scan_cmd, ttl_cmd};
use super::{parse_port, redis_settings, ConnectionHandle, KeyTtl, ScanCursor, ScanPage};
use crate::config::Config;
use crate::error::{BackfillError, StoreError};

/// Where master connections come from and how commands go over them
#[async_trait]
trait MasterLink: Send {
    type Conn: Send;

    /// Ask for the current master and connect to it
    async fn resolve(&mut self) -> RedisResult<Self::Conn>;

    async fn issue<T: FromRedisValue + Send>(
        &mut self,
        conn: &mut Self::Conn,
        cmd: &redis::Cmd,
    ) -> RedisResult<T>;
}

/// [`MasterLink`] backed by a sentinel client
struct SentinelLink {
    sentinel: SentinelClient,
}

#[async_trait]
impl MasterLink for SentinelLink {
    type Conn = MultiplexedConnection;

    async fn resolve(&mut self) -> RedisResult<MultiplexedConnection> {
        self.sentinel.get_async_connection().await
    }

    async fn issue<T: FromRedisValue + Send>(
        &mut self,
        conn: &mut MultiplexedConnection,
        cmd: &redis::Cmd,
    ) -> RedisResult<T> {
        cmd.query_async(conn).await
    }
}

/// Run `cmd` on `conn`. If the master went away or was demoted, resolve
/// it again, swap `conn` and retry exactly once.
async fn query_with_failover<L: MasterLink, T: FromRedisValue + Send>(
    link: &mut L,
    conn: &mut L::Conn,
    cmd: &redis::Cmd,
    master: &str,
) -> Result<T, StoreError> {
    match link.issue(conn, cmd).await {
        Ok(value) => Ok(value),
        Err(e) if needs_reresolve(&e) => {
            warn!(
                master = %master,
                error = %e,
                "Master unavailable, re-resolving through sentinel"
            );
            *conn = link.resolve().await?;
            Ok(link.issue(conn, cmd).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Connection to whichever node the sentinel reports as master
pub struct FailoverConnection {
    sentinel_addr: String,
    master_name: String,
    link: SentinelLink,
    conn: MultiplexedConnection,
}

impl FailoverConnection {
    /// Build the sentinel client and connect to the current master
    pub async fn connect(config: &Config) -> Result<Self, BackfillError> {
        let port = parse_port(&config.port)?;
        let sentinel_addr = format!("{}:{}", config.host, port);

        let sentinel_info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(config.host.clone(), port),
            redis: redis::RedisConnectionInfo::default(),
        };
        let node_info = SentinelNodeConnectionInfo {
            tls_mode: None,
            redis_connection_info: Some(redis_settings(config)),
        };

        let mut sentinel = SentinelClient::build(
            vec![sentinel_info],
            config.master_name.clone(),
            Some(node_info),
            SentinelServerType::Master,
        )
        .map_err(|e| {
            BackfillError::Connection(format!("invalid sentinel address {}: {}", sentinel_addr, e))
        })?;

        let conn = sentinel.get_async_connection().await.map_err(|e| {
            BackfillError::Connection(format!(
                "failed to resolve master {:?} via {}: {}",
                config.master_name, sentinel_addr, e
            ))
        })?;

        debug!(sentinel = %sentinel_addr, master = %config.master_name, "Connected");
        Ok(Self {
            sentinel_addr,
            master_name: config.master_name.clone(),
            link: SentinelLink { sentinel },
            conn,
        })
    }

    /// Run `cmd`, re-resolving the master once if the topology changed
    async fn query<T: FromRedisValue + Send>(&mut self, cmd: &redis::Cmd) -> Result<T, StoreError> {
        query_with_failover(&mut self.link, &mut self.conn, cmd, &self.master_name).await
    }
}

/// Errors that mean the connected node is no longer a usable master
fn needs_reresolve(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.kind() == ErrorKind::ReadOnly
}

#[async_trait]
impl ConnectionHandle for FailoverConnection {
    async fn scan_next(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let (next, keys): (u64, Vec<Vec<u8>>) =
            self.query(&scan_cmd(cursor, pattern, count)).await?;
        Ok(into_page(next, keys))
    }

    async fn get_ttl(&mut self, key: &[u8]) -> Result<KeyTtl, StoreError> {
        let reply: i64 = self.query(&ttl_cmd(key)).await?;
        KeyTtl::from_reply(reply)
    }

    async fn set_ttl(&mut self, key: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        let reply: i64 = self.query(&expire_cmd(key, ttl)).await?;
        Ok(reply == 1)
    }

    fn describe(&self) -> String {
        format!("sentinel({}, master={})", self.sentinel_addr, self.master_name)
    }
}
