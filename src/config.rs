//! Backfill Configuration

use std::time::Duration;

use crate::error::BackfillError;

/// Default store port
pub const DEFAULT_PORT: &str = "6379";

/// Default ceiling on keys inspected per second
pub const DEFAULT_RATE_LIMIT: u32 = 1000;

/// TTL installed on keys that have none
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Glob pattern matching every key
pub const SCAN_PATTERN: &str = "*";

/// SCAN COUNT hint, same as the server default
pub const DEFAULT_SCAN_COUNT: usize = 10;

/// Sentinel master group name
pub const MASTER_NAME: &str = "mymaster";

/// Emit a progress line every this many processed keys
pub const PROGRESS_INTERVAL: u64 = 10_000;

/// How the store is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// One fixed address for the whole run
    #[default]
    Direct,
    /// Address is a sentinel endpoint; the master is resolved through it
    Failover,
}

/// What to do when a single key's TTL read or write fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the whole run on the first failure
    #[default]
    Abort,
    /// Log the failure, count it, and move on to the next key.
    /// Connection-level failures still abort.
    SkipKey,
}

/// Run configuration. Built once at startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store (or sentinel) host
    pub host: String,

    /// Store (or sentinel) port, as given on the command line
    pub port: String,

    /// Connection topology
    pub topology: Topology,

    /// Maximum keys inspected per second
    pub rate_limit: u32,

    /// Observe only, never mutate
    pub dry_run: bool,

    /// Per-key logging
    pub verbose: bool,

    /// ACL username passed through to the client
    pub username: Option<String>,

    /// Password passed through to the client
    pub password: Option<String>,

    /// Database index
    pub database: i64,

    /// Sentinel master group name
    pub master_name: String,

    /// TTL installed on keys without one
    pub default_ttl: Duration,

    /// Key glob pattern for the scan
    pub pattern: String,

    /// Page size hint for each SCAN call
    pub scan_count: usize,

    /// Per-key failure handling
    pub error_policy: ErrorPolicy,

    /// Keys between progress reports
    pub progress_interval: u64,
}

impl Config {
    /// Create a config for `host` with every other field at its default
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT.to_string(),
            topology: Topology::Direct,
            rate_limit: DEFAULT_RATE_LIMIT,
            dry_run: false,
            verbose: false,
            username: None,
            password: None,
            database: 0,
            master_name: MASTER_NAME.to_string(),
            default_ttl: DEFAULT_TTL,
            pattern: SCAN_PATTERN.to_string(),
            scan_count: DEFAULT_SCAN_COUNT,
            error_policy: ErrorPolicy::Abort,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: u32) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Pass credentials through to the store client
    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_scan_count(mut self, count: usize) -> Self {
        self.scan_count = count;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_progress_interval(mut self, every: u64) -> Self {
        self.progress_interval = every;
        self
    }

    /// `host:port` as handed to the client
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the values the core relies on
    pub fn validate(&self) -> Result<(), BackfillError> {
        if self.host.trim().is_empty() {
            return Err(BackfillError::Config("hostname must not be empty".into()));
        }
        if self.rate_limit == 0 {
            return Err(BackfillError::Config("rate limit must be greater than 0".into()));
        }
        if self.scan_count == 0 {
            return Err(BackfillError::Config("scan count must be greater than 0".into()));
        }
        // EXPIRE takes whole seconds
        if self.default_ttl.as_secs() == 0 {
            return Err(BackfillError::Config("default TTL must be at least one second".into()));
        }
        if self.progress_interval == 0 {
            return Err(BackfillError::Config("progress interval must be greater than 0".into()));
        }
        if self.pattern.is_empty() {
            return Err(BackfillError::Config("scan pattern must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("localhost");

        assert_eq!(config.port, "6379");
        assert_eq!(config.topology, Topology::Direct);
        assert_eq!(config.rate_limit, 1000);
        assert!(!config.dry_run);
        assert!(!config.verbose);
        assert_eq!(config.database, 0);
        assert_eq!(config.master_name, "mymaster");
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.pattern, "*");
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
        assert_eq!(config.progress_interval, 10_000);
        assert_eq!(config.address(), "localhost:6379");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = Config::new("10.0.0.5")
            .with_port("26379")
            .with_topology(Topology::Failover)
            .with_rate_limit(50)
            .with_dry_run(true)
            .with_credentials(None, Some("secret".into()))
            .with_scan_count(500);

        assert_eq!(config.address(), "10.0.0.5:26379");
        assert_eq!(config.topology, Topology::Failover);
        assert_eq!(config.rate_limit, 50);
        assert!(config.dry_run);
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.scan_count, 500);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            Config::new("localhost").with_rate_limit(0).validate(),
            Err(BackfillError::Config(_))
        ));
        assert!(matches!(
            Config::new("  ").validate(),
            Err(BackfillError::Config(_))
        ));
        assert!(matches!(
            Config::new("localhost").with_scan_count(0).validate(),
            Err(BackfillError::Config(_))
        ));
        assert!(matches!(
            Config::new("localhost")
                .with_default_ttl(Duration::from_millis(500))
                .validate(),
            Err(BackfillError::Config(_))
        ));
    }
}
