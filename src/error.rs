//! Error types
//!
//! [`StoreError`] is what a connection backend reports for a single
//! command. [`BackfillError`] is what a run reports, tagged with the stage
//! that failed.

use thiserror::Error;

/// Failure of a single store command
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error from the Redis client
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Error from a non-Redis backend
    #[error("backend error: {0}")]
    Backend(String),

    /// The store replied with something the command never returns
    #[error("unexpected reply: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Whether the failure concerns the connection rather than the key.
    /// These stay fatal even when per-key failures are skipped.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            StoreError::Redis(e) => {
                e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
            }
            StoreError::Backend(_) | StoreError::Protocol(_) => false,
        }
    }
}

/// Failure of a backfill run
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("scan failed: {source}")]
    Scan {
        #[source]
        source: StoreError,
    },

    #[error("reading TTL of key {key:?} failed: {source}")]
    TtlRead {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("setting TTL of key {key:?} failed: {source}")]
    TtlWrite {
        key: String,
        #[source]
        source: StoreError,
    },
}

impl BackfillError {
    /// Whether a per-key failure was really the connection going away
    pub fn is_connection_failure(&self) -> bool {
        match self {
            BackfillError::Connection(_) => true,
            BackfillError::Scan { source }
            | BackfillError::TtlRead { source, .. }
            | BackfillError::TtlWrite { source, .. } => source.is_connection_failure(),
            BackfillError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackfillError>;

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    #[test]
    fn test_connection_failure_classification() {
        let io = StoreError::from(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(io.is_connection_failure());

        let wrong_type = StoreError::from(redis::RedisError::from((
            ErrorKind::TypeError,
            "wrong type",
        )));
        assert!(!wrong_type.is_connection_failure());

        assert!(!StoreError::Backend("boom".into()).is_connection_failure());
    }

    #[test]
    fn test_display_carries_key() {
        let err = BackfillError::TtlWrite {
            key: "user:1".into(),
            source: StoreError::Backend("boom".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("user:1"));
        assert!(msg.contains("boom"));
    }
}
