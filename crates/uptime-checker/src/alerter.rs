//! Down-transition webhook alerts.
//!
//! Delivery is best effort: one POST, and on failure a single retry after
//! [`ALERT_RETRY_DELAY`]. A second failure is logged and dropped. There is
//! no queue and no alert history.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use uptime_state::Monitor;

/// Wait between the first failed attempt and the retry.
pub const ALERT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Per-request timeout for webhook deliveries.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body posted to the webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertPayload {
    pub monitor_name: String,
    pub url: String,
    /// Always `"down"`.
    pub status: String,
    /// UTC, RFC 3339, taken at dispatch time.
    pub timestamp: String,
}

impl AlertPayload {
    pub fn down(monitor: &Monitor) -> Self {
        Self {
            monitor_name: monitor.name.clone(),
            url: monitor.url.clone(),
            status: "down".to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned non-success status: {0}")]
    Status(reqwest::StatusCode),
}

/// What happened to one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No webhook is configured.
    Disabled,
    /// Accepted by the webhook after `attempts` tries.
    Delivered { attempts: u32 },
    /// Both attempts failed.
    Dropped,
}

#[derive(Debug, Clone)]
struct Webhook {
    url: String,
    client: Client,
}

/// Sends a webhook when a monitor transitions to down.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Alerter {
    webhook: Option<Webhook>,
    retry_delay: Duration,
}

impl Alerter {
    /// Create an alerter posting to `webhook_url`. A missing or empty URL
    /// yields an alerter whose `notify` is a no-op.
    pub fn new(webhook_url: Option<String>) -> Result<Self, AlertError> {
        let webhook = match webhook_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => Some(Webhook {
                url,
                client: Client::builder().timeout(WEBHOOK_TIMEOUT).build()?,
            }),
            None => None,
        };
        Ok(Self {
            webhook,
            retry_delay: ALERT_RETRY_DELAY,
        })
    }

    /// An alerter that never sends anything.
    pub fn disabled() -> Self {
        Self {
            webhook: None,
            retry_delay: ALERT_RETRY_DELAY,
        }
    }

    /// Override the retry delay (for testing).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook.is_some()
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Notify the webhook that `monitor` just went down.
    pub async fn notify(&self, monitor: &Monitor) -> Delivery {
        let Some(webhook) = &self.webhook else {
            return Delivery::Disabled;
        };

        let payload = AlertPayload::down(monitor);
        info!(
            monitor_id = monitor.id,
            name = %monitor.name,
            url = %monitor.url,
            "monitor is down, sending webhook"
        );

        let Err(e) = webhook.post(&payload).await else {
            return Delivery::Delivered { attempts: 1 };
        };
        warn!(
            monitor_id = monitor.id,
            error = %e,
            retry_in_ms = self.retry_delay.as_millis() as u64,
            "webhook failed, retrying"
        );

        tokio::time::sleep(self.retry_delay).await;
        match webhook.post(&payload).await {
            Ok(()) => {
                info!(monitor_id = monitor.id, "webhook retry succeeded");
                Delivery::Delivered { attempts: 2 }
            }
            Err(e) => {
                warn!(monitor_id = monitor.id, error = %e, "webhook retry failed, dropping alert");
                Delivery::Dropped
            }
        }
    }
}

impl Webhook {
    async fn post(&self, payload: &AlertPayload) -> Result<(), AlertError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status));
        }
        Ok(())
    }
}
