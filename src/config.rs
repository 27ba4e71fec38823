use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::fetch::RetryPolicy;
use crate::sync::{MergePolicy, SyncSettings, ValidationOptions};

/// League table snapshot sync for digital signage
#[derive(Parser, Debug, Clone)]
#[command(name = "league-sync", version, about)]
pub struct Config {
    /// SQLite database holding the published snapshots
    #[arg(long, global = true, env = "DATABASE_PATH", default_value = "league.db")]
    pub database_path: String,

    /// Directory for the static JSON exports (teamData.json etc.)
    #[arg(long, global = true, env = "EXPORT_DIR")]
    pub export_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch every team, merge, validate and publish one snapshot
    Sync(SyncArgs),
    /// Audit the published snapshots (or two snapshot files)
    Validate(ValidateArgs),
    /// Print trend indicators for the current snapshot
    Trends(TrendsArgs),
    /// Copy the current snapshot into the last-gameweek slot
    RotateGameweek,
    /// Rewrite the static JSON exports from the store
    Export,
    /// Serve the read-only display API
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Team map: JSON array of {name, teamId, compId, compLabel}
    #[arg(long, env = "TEAM_MAP", default_value = "config/teamCompIDs.json")]
    pub team_map: String,

    /// Upstream statistics API base URL
    #[arg(long, env = "UPSTREAM_API_URL")]
    pub api_url: String,

    /// Upstream API key (sent as a bearer token)
    #[arg(long, env = "UPSTREAM_API_KEY")]
    pub api_key: Option<String>,

    /// Maximum team fetches in flight
    #[arg(long, env = "FETCH_CONCURRENCY", default_value = "4")]
    pub concurrency: usize,

    /// Minimum spacing between request starts, in milliseconds
    #[arg(long, env = "RATE_LIMIT_MS", default_value = "1200")]
    pub rate_limit_ms: u64,

    /// Attempts per team before it counts as failed
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "4")]
    pub max_attempts: u32,

    /// Base retry backoff in milliseconds (doubles per attempt)
    #[arg(long, env = "BACKOFF_MS", default_value = "1200")]
    pub backoff_ms: u64,

    /// Upper bound on a single backoff, in milliseconds
    #[arg(long, env = "MAX_BACKOFF_MS", default_value = "30000")]
    pub max_backoff_ms: u64,

    /// Timeout for each individual fetch attempt, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "20")]
    pub fetch_timeout_secs: u64,

    /// Move current into previous when publishing
    #[arg(long, env = "ROTATE", default_value = "false")]
    pub rotate: bool,

    /// Required number of teams in a publishable snapshot
    #[arg(long, env = "EXPECT_COUNT")]
    pub expect_count: Option<usize>,

    /// Previously present teams allowed to disappear
    #[arg(long, env = "SHRINK_TOLERANCE", default_value = "0")]
    pub shrink_tolerance: usize,

    /// Accept a shrinking team list this cycle; teams removed from the map
    /// are dropped instead of carried forward
    #[arg(long, default_value = "false")]
    pub acknowledge_shrink: bool,

    /// Also roll back live fixtures whose score went down
    #[arg(long, env = "GUARD_LIVE_SCORES", default_value = "false")]
    pub guard_live_scores: bool,

    /// Do not keep invalid candidates for inspection
    #[arg(long, default_value = "false")]
    pub discard_rejected: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Audit this file instead of the stored current snapshot
    #[arg(long)]
    pub current: Option<String>,

    /// Compare against this file instead of the stored previous snapshot
    #[arg(long)]
    pub previous: Option<String>,

    #[arg(long, env = "EXPECT_COUNT")]
    pub expect_count: Option<usize>,

    #[arg(long, default_value = "0")]
    pub shrink_tolerance: usize,
}

#[derive(Args, Debug, Clone)]
pub struct TrendsArgs {
    /// previous or last-gameweek
    #[arg(long, default_value = "previous")]
    pub baseline: String,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Listen address
    #[arg(long, env = "DISPLAY_ADDR", default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Serve the front-end from this directory instead of the built-in page
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<String>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_path.trim().is_empty() {
            anyhow::bail!("database_path must not be empty");
        }
        match &self.command {
            Command::Sync(args) => args.validate(),
            Command::Trends(args) => {
                if !matches!(args.baseline.as_str(), "previous" | "last-gameweek" | "lastgw") {
                    anyhow::bail!("baseline must be previous or last-gameweek");
                }
                Ok(())
            }
            Command::Serve(args) => {
                args.addr
                    .parse::<std::net::SocketAddr>()
                    .map_err(|e| anyhow::anyhow!("invalid listen address '{}': {}", args.addr, e))?;
                Ok(())
            }
            Command::Validate(_) | Command::RotateGameweek | Command::Export => Ok(()),
        }
    }
}

impl SyncArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        if url::Url::parse(&self.api_url).is_err() {
            anyhow::bail!("api_url '{}' is not a valid URL", self.api_url);
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        if self.max_backoff_ms < self.backoff_ms {
            anyhow::bail!("max_backoff_ms must not be below backoff_ms");
        }
        if self.expect_count == Some(0) {
            anyhow::bail!("expect_count must be positive when set");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            jitter: true,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            rotate: self.rotate,
            validation: ValidationOptions {
                expected_count: self.expect_count,
                shrink_tolerance: self.shrink_tolerance,
                acknowledge_shrink: self.acknowledge_shrink,
            },
            merge: MergePolicy {
                guard_live_scores: self.guard_live_scores,
                ..Default::default()
            },
            keep_rejected: !self.discard_rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("league-sync").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_sync_defaults() {
        let config = parse(&["sync", "--api-url", "https://stats.example.com/v1"]);
        config.validate().unwrap();
        let Command::Sync(args) = &config.command else {
            panic!("expected sync");
        };
        let retry = args.retry_policy();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(1200));
        let settings = args.sync_settings();
        assert!(!settings.rotate);
        assert!(settings.keep_rejected);
        assert!(!settings.merge.guard_live_scores);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = parse(&["sync", "--api-url", "not a url"]);
        assert!(config.validate().is_err());

        let config = parse(&[
            "sync",
            "--api-url",
            "https://stats.example.com",
            "--concurrency",
            "0",
        ]);
        assert!(config.validate().is_err());

        let config = parse(&["trends", "--baseline", "yesterday"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let config = parse(&["export", "--export-dir", "/srv/signage"]);
        assert_eq!(config.export_dir.as_deref(), Some("/srv/signage"));
        assert!(matches!(config.command, Command::Export));
    }
}
