//! TTL Backfill Binary
//!
//! Scans every key in a Redis (or Sentinel-managed) store and sets a
//! default TTL on keys that have none.

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use ttl_backfill::config::{DEFAULT_PORT, DEFAULT_RATE_LIMIT, DEFAULT_SCAN_COUNT, DEFAULT_TTL};
use ttl_backfill::{connect, Config, Engine, ErrorPolicy, RunOutcome, Topology};

/// TTL Backfill - set a default TTL on every key without one
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Redis hostname (the sentinel host with --sentinel)
    #[arg(long)]
    hostname: String,

    /// Redis port (the sentinel port with --sentinel)
    #[arg(long, default_value = DEFAULT_PORT)]
    port: String,

    /// Use Redis Sentinel to locate the master
    #[arg(long, default_value_t = false)]
    sentinel: bool,

    /// Maximum keys inspected per second
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT, value_parser = clap::value_parser!(u32).range(1..))]
    rate_limit: u32,

    /// Report what would change without setting any TTL
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Verbose output
    #[arg(long, default_value_t = false)]
    verbose: bool,

    /// ACL username
    #[arg(long)]
    username: Option<String>,

    /// Password
    #[arg(long)]
    password: Option<String>,

    /// TTL in seconds to set on keys without one
    #[arg(long, default_value_t = DEFAULT_TTL.as_secs(), value_parser = clap::value_parser!(u64).range(1..))]
    ttl: u64,

    /// SCAN COUNT hint per page
    #[arg(long, default_value_t = DEFAULT_SCAN_COUNT)]
    scan_count: usize,

    /// Log and skip keys whose TTL cannot be read or set instead of aborting
    #[arg(long, default_value_t = false)]
    skip_key_errors: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let topology = if self.sentinel {
            Topology::Failover
        } else {
            Topology::Direct
        };
        let policy = if self.skip_key_errors {
            ErrorPolicy::SkipKey
        } else {
            ErrorPolicy::Abort
        };

        Config::new(self.hostname)
            .with_port(self.port)
            .with_topology(topology)
            .with_rate_limit(self.rate_limit)
            .with_dry_run(self.dry_run)
            .with_verbose(self.verbose)
            .with_credentials(self.username, self.password)
            .with_default_ttl(Duration::from_secs(self.ttl))
            .with_scan_count(self.scan_count)
            .with_error_policy(policy)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("ttl_backfill={}", level).parse()?),
        )
        .init();

    let config = args.into_config();
    config.validate()?;

    if config.verbose {
        info!("Verbose logging enabled");
    }

    info!(addr = %config.address(), topology = ?config.topology, "Connecting");
    let conn = connect(&config).await?;
    let mut engine = Engine::new(conn, &config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current key");
            on_signal.cancel();
        }
    });

    let result = engine.run_until(cancel).await;
    match result {
        Ok(summary) => {
            println!("{}", summary);
            if summary.outcome == RunOutcome::Cancelled {
                return Ok(ExitCode::from(130));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let counters = engine.counters();
            error!(
                processed = counters.processed,
                backfilled = counters.backfilled,
                errors = counters.errors,
                "Backfill aborted: {}",
                e
            );
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["ttl-backfill", "--hostname", "redis.local"]).unwrap();
        let config = args.into_config();

        assert_eq!(config.address(), "redis.local:6379");
        assert_eq!(config.topology, Topology::Direct);
        assert_eq!(config.rate_limit, 1000);
        assert!(!config.dry_run);
        assert!(!config.verbose);
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.error_policy, ErrorPolicy::Abort);
    }

    #[test]
    fn test_sentinel_flags() {
        let args = Args::try_parse_from([
            "ttl-backfill",
            "--hostname",
            "sentinel.local",
            "--port",
            "26379",
            "--sentinel",
            "--dry-run",
            "--verbose",
            "--rate-limit",
            "250",
            "--skip-key-errors",
        ])
        .unwrap();
        let config = args.into_config();

        assert_eq!(config.topology, Topology::Failover);
        assert_eq!(config.port, "26379");
        assert_eq!(config.master_name, "mymaster");
        assert_eq!(config.database, 0);
        assert!(config.dry_run);
        assert!(config.verbose);
        assert_eq!(config.rate_limit, 250);
        assert_eq!(config.error_policy, ErrorPolicy::SkipKey);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Args::try_parse_from(["ttl-backfill"]).is_err());
        assert!(
            Args::try_parse_from(["ttl-backfill", "--hostname", "h", "--rate-limit", "0"]).is_err()
        );
        assert!(Args::try_parse_from(["ttl-backfill", "--hostname", "h", "--ttl", "0"]).is_err());
    }
}
