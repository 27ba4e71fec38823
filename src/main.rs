use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod config;
mod dashboard;
mod db;
mod export;
mod fetch;
mod sync;

use config::{Command, Config, ServeArgs, SyncArgs, TrendsArgs, ValidateArgs};
use dashboard::AppState;
use db::models::Generation;
use db::SnapshotStore;
use fetch::{load_team_map, FetchSettings, HttpTeamFetcher, RateLimiter, TeamFetcher};
use sync::{ordered_trends, CycleOutcome, SyncEngine, ValidationOptions};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}: {:#}", CycleOutcome::FatalConfigError, e);
            ExitCode::from(CycleOutcome::FatalConfigError.exit_code())
        }
    }
}

async fn run(config: Config) -> Result<ExitCode> {
    config.validate()?;

    let store = SnapshotStore::open(&config.database_path)
        .with_context(|| format!("Failed to open snapshot store {}", config.database_path))?;
    info!("Snapshot store opened: {}", config.database_path);

    match &config.command {
        Command::Sync(args) => run_sync(&config, args, store).await,
        Command::Validate(args) => run_validate(args, &store),
        Command::Trends(args) => run_trends(args, &store),
        Command::RotateGameweek => {
            if store.promote_gameweek()? {
                export_if_configured(&config, &store)?;
            } else {
                warn!("No current snapshot yet; last-gameweek left as it was");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Export => {
            let dir = config
                .export_dir
                .as_deref()
                .context("--export-dir (or EXPORT_DIR) is required for export")?;
            export::export_slots(&store, Path::new(dir))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve(args) => run_serve(args, store).await,
    }
}

async fn run_sync(config: &Config, args: &SyncArgs, store: SnapshotStore) -> Result<ExitCode> {
    let teams = load_team_map(Path::new(&args.team_map))?;
    info!("Loaded {} team(s) from {}", teams.len(), args.team_map);

    let timeout = Duration::from_secs(args.fetch_timeout_secs);
    let fetcher: Arc<dyn TeamFetcher> = Arc::new(HttpTeamFetcher::new(
        &args.api_url,
        args.api_key.clone(),
        timeout,
    )?);
    let fetch = FetchSettings {
        concurrency: args.concurrency,
        timeout,
        retry: args.retry_policy(),
        limiter: Arc::new(RateLimiter::new(Duration::from_millis(args.rate_limit_ms))),
    };
    let engine = SyncEngine::new(store.clone(), fetcher, fetch, args.sync_settings());

    let report = tokio::select! {
        report = engine.run_cycle(&teams) => report.context("Snapshot store failure during publish")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted before publish; stored snapshots are unchanged");
            return Ok(ExitCode::from(130));
        }
    };

    if report.published() {
        export_if_configured(config, &store)?;
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(report.outcome.exit_code()))
}

/// Audit published snapshots. Exits non-zero when any rule fails.
fn run_validate(args: &ValidateArgs, store: &SnapshotStore) -> Result<ExitCode> {
    let current = match &args.current {
        Some(path) => Some(export::read_snapshot_file(Path::new(path), Generation::Current)?),
        None => store.read(Generation::Current)?,
    };
    let current = current.context("No current snapshot to validate")?;
    let previous = match &args.previous {
        Some(path) => Some(export::read_snapshot_file(Path::new(path), Generation::Previous)?),
        None => store.read(Generation::Previous)?,
    };

    let options = ValidationOptions {
        expected_count: args.expect_count,
        shrink_tolerance: args.shrink_tolerance,
        acknowledge_shrink: false,
    };
    let result = sync::validate(&current, previous.as_ref(), &options);

    if result.passed() {
        info!(
            "Snapshot validation passed ({} teams, previous {})",
            current.len(),
            previous.as_ref().map(|p| p.len()).unwrap_or(0)
        );
        Ok(ExitCode::SUCCESS)
    } else {
        for violation in &result.violations {
            error!("{}", violation);
        }
        Ok(ExitCode::FAILURE)
    }
}

fn run_trends(args: &TrendsArgs, store: &SnapshotStore) -> Result<ExitCode> {
    let baseline = Generation::parse(&args.baseline).unwrap_or(Generation::Previous);
    let (current, previous) = store.read_pair(Generation::Current, baseline)?;
    let current = current.context("No current snapshot published yet")?;
    if previous.is_none() {
        info!("No {} snapshot; every team is Steady", baseline);
    }
    let trends = ordered_trends(&current, previous.as_ref());
    println!("{}", serde_json::to_string_pretty(&trends)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_serve(args: &ServeArgs, store: SnapshotStore) -> Result<ExitCode> {
    let addr: SocketAddr = args.addr.parse()?;
    let app = dashboard::router(AppState { store }, args.static_dir.as_deref());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🌐 Display API listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(ExitCode::SUCCESS)
}

fn export_if_configured(config: &Config, store: &SnapshotStore) -> Result<()> {
    if let Some(dir) = config.export_dir.as_deref() {
        export::export_slots(store, Path::new(dir))?;
    }
    Ok(())
}
