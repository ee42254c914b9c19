//! uptimed — the uptime daemon.
//!
//! Single binary that wires the monitoring subsystems together:
//! - State store (redb)
//! - Worker supervisor, one probe loop per monitor
//! - Webhook alerter
//! - Retention sweeper
//!
//! # Usage
//!
//! ```text
//! uptimed run --config /etc/uptime/uptime.toml
//! uptimed validate --config uptime.toml
//! uptimed probe https://example.com/healthz
//! ```

mod config;
mod reconcile;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};

use uptime_checker::{Alerter, Prober, WorkerSupervisor};
use uptime_state::StateStore;

use crate::config::Config;

const DEFAULT_LOG_FILTER: &str = "info,uptimed=debug,uptime_checker=debug";

#[derive(Parser)]
#[command(name = "uptimed", version, about = "HTTP uptime monitor daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor daemon until SIGINT or SIGTERM.
    Run {
        /// Path to the config file. Reloaded on SIGHUP.
        #[arg(long, default_value = "/etc/uptime/uptime.toml")]
        config: PathBuf,

        /// Data directory for persistent state. Overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Check a config file and exit.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },

    /// Probe a URL once and print the result as JSON.
    Probe {
        url: String,

        /// Request timeout in seconds.
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, data_dir } => run_daemon(&config, data_dir).await,
        Command::Validate { config } => validate(&config),
        Command::Probe { url, timeout } => probe(&url, timeout).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(path)?;
    println!(
        "{}: ok ({} monitors, alerts {})",
        path.display(),
        config.monitors.len(),
        if config.alerts.webhook_url.as_deref().is_some_and(|u| !u.trim().is_empty()) { "on" } else { "off" }
    );
    for m in &config.monitors {
        println!(
            "  {:<20} every {:>4}s  timeout {:>3}s  {}",
            m.name, m.interval_seconds, m.timeout_seconds, m.url
        );
    }
    Ok(())
}

async fn probe(url: &str, timeout: u64) -> anyhow::Result<()> {
    let prober = Prober::new(Duration::from_secs(timeout))?;
    let outcome = prober.probe(url).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn run_daemon(config_path: &Path, data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::from_file(config_path)?;
    let data_dir = data_dir.unwrap_or_else(|| config.server.data_dir.clone());
    info!(config = %config_path.display(), data_dir = %data_dir.display(), "uptime daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
    let db_path = data_dir.join("uptime.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let webhook_url = config.alerts.webhook_url.clone();
    let alerter = Alerter::new(webhook_url.clone())?;
    info!(enabled = alerter.is_enabled(), "alerter initialized");

    let report = reconcile::reconcile(&store, &config.monitors, None).await?;
    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        deleted = report.deleted.len(),
        "monitors reconciled"
    );

    // ── Start workers ──────────────────────────────────────────

    let supervisor = WorkerSupervisor::new(Arc::new(store.clone()), alerter);
    let started = supervisor
        .start()
        .await
        .context("failed to start monitor workers")?;
    info!(monitors = started, "uptime daemon running");

    // ── Signal loop ────────────────────────────────────────────

    loop {
        match next_signal().await? {
            Signal::Shutdown => {
                info!("shutdown signal received");
                break;
            }
            Signal::Reload => {
                info!("reload signal received");
                reload(config_path, &webhook_url, &store, &supervisor).await;
            }
        }
    }

    supervisor.stop().await;
    info!("uptime daemon stopped");
    Ok(())
}

/// Re-read the config and reconcile. A bad config leaves everything as is.
async fn reload(
    config_path: &Path,
    webhook_url: &Option<String>,
    store: &StateStore,
    supervisor: &WorkerSupervisor,
) {
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "config reload failed, keeping current monitors");
            return;
        }
    };
    if &config.alerts.webhook_url != webhook_url {
        warn!("alerts.webhook_url changed; restart the daemon to apply it");
    }

    match reconcile::reconcile(store, &config.monitors, Some(supervisor)).await {
        Ok(report) if report.is_empty() => info!("config reloaded, no monitor changes"),
        Ok(report) => {
            info!(
                created = report.created.len(),
                updated = report.updated.len(),
                deleted = report.deleted.len(),
                "config reloaded"
            );
        }
        Err(e) => error!(
            error = %format!("{e:#}"),
            "reload stopped part way; earlier monitor changes were applied"
        ),
    }
}

enum Signal {
    Shutdown,
    Reload,
}

#[cfg(unix)]
async fn next_signal() -> anyhow::Result<Signal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok(Signal::Shutdown),
        _ = terminate.recv() => Ok(Signal::Shutdown),
        _ = hangup.recv() => Ok(Signal::Reload),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> anyhow::Result<Signal> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    Ok(Signal::Shutdown)
}
