//! Telegram notification dispatch for WARNING/CRITICAL verdicts.
//!
//! Calls are fire-and-forget with a 5 s HTTP timeout and never block or fail
//! the pipeline; an unconfigured notifier silently skips sends.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::defaults::NOTIFY_TIMEOUT_SECS;
use crate::config::NotifierConfig;

#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

impl Notifier {
    pub fn new(cfg: &NotifierConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            token: cfg.telegram_token.clone(),
            chat_id: cfg.telegram_chat_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.chat_id.is_empty()
    }

    /// Send one alert message. Failures are logged and swallowed.
    pub async fn send_alert(&self, message: &str) {
        if !self.is_configured() {
            warn!("Telegram notifier: token or chat id not configured — skipping");
            return;
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": format!("🚨 PUMP MONITOR ALERT 🚨\n\n{message}"),
            "parse_mode": "Markdown",
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Telegram alert sent");
            }
            Ok(response) => {
                error!(status = %response.status(), "Failed to send Telegram alert");
            }
            Err(e) => {
                error!(error = %e, "Telegram API error");
            }
        }
    }

    /// Spawn the send on the runtime so the pipeline never waits on HTTP.
    pub fn dispatch(&self, message: String) {
        if !self.is_configured() {
            debug!("Telegram notifier unconfigured; alert not dispatched");
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.send_alert(&message).await;
        });
    }
}
