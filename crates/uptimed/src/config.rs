//! uptime.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use uptime_state::NewMonitor;

pub const DEFAULT_DATA_DIR: &str = "/var/lib/uptime";
pub const DEFAULT_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    /// Desired monitor set, keyed by name.
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertsConfig {
    /// Webhook notified when a monitor goes down. Alerts are off when unset.
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl MonitorConfig {
    pub fn to_new_monitor(&self) -> NewMonitor {
        NewMonitor {
            name: self.name.clone(),
            url: self.url.clone(),
            interval_seconds: self.interval_seconds,
            timeout_seconds: self.timeout_seconds,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Config {
    /// Read, parse, and validate a config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(url) = &self.alerts.webhook_url {
            if !url.trim().is_empty() {
                check_http_url(url).context("alerts.webhook_url")?;
            }
        }

        let mut names = HashSet::new();
        for monitor in &self.monitors {
            if monitor.name.trim().is_empty() {
                bail!("monitor name must not be empty");
            }
            if !names.insert(monitor.name.as_str()) {
                bail!("duplicate monitor name {:?}", monitor.name);
            }
            if monitor.interval_seconds == 0 {
                bail!("monitor {:?}: interval_seconds must be > 0", monitor.name);
            }
            if monitor.timeout_seconds == 0 {
                bail!("monitor {:?}: timeout_seconds must be > 0", monitor.name);
            }
            check_http_url(&monitor.url).with_context(|| format!("monitor {:?}", monitor.name))?;
        }
        Ok(())
    }
}

fn check_http_url(url: &str) -> anyhow::Result<()> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid url {url:?}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("unsupported url scheme {other:?} in {url:?}"),
    }
}
