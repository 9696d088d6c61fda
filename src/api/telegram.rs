//! Operator notifications over the Telegram Bot API.
//!
//! Delivery is best effort: a failed send is logged and dropped, it never
//! fails the tick that produced it.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram caps message text at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Severity shown as a prefix on every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Trade,
    Warning,
    Critical,
}

impl NotifyLevel {
    fn prefix(&self) -> &'static str {
        match self {
            NotifyLevel::Info => "ℹ️",
            NotifyLevel::Trade => "📈",
            NotifyLevel::Warning => "⚠️",
            NotifyLevel::Critical => "🚨",
        }
    }
}

/// Somewhere a text message can be delivered.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    /// Read `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; `None` if either is missing.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty())?;
        Some(Self {
            bot_token: token,
            chat_id,
        })
    }
}

pub struct TelegramChannel {
    client: Client,
    config: TelegramConfig,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send_text(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.config.bot_token);
        let payload = json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            // reqwest errors carry the URL, which contains the bot token
            .map_err(|e| anyhow!("telegram request failed: {}", e.without_url()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram returned {}: {}", status, body));
        }

        Ok(())
    }
}

/// Fire-and-forget notifier. Disabled when no channel is configured.
#[derive(Clone)]
pub struct Notifier {
    inner: Option<Arc<dyn NotificationChannel>>,
}

impl Notifier {
    pub fn new(channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            inner: Some(channel),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Telegram if configured in the environment, otherwise disabled.
    pub fn from_env() -> Result<Self> {
        match TelegramConfig::from_env() {
            Some(config) => Ok(Self::new(Arc::new(TelegramChannel::new(config)?))),
            None => {
                warn!("TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID not set, notifications disabled");
                Ok(Self::disabled())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn notify(&self, level: NotifyLevel, message: &str) {
        let Some(channel) = &self.inner else {
            debug!(message, "Notification (disabled)");
            return;
        };

        let mut text = format!("{} {}", level.prefix(), message);
        if text.chars().count() > MAX_MESSAGE_CHARS {
            text = text.chars().take(MAX_MESSAGE_CHARS).collect::<String>() + "…";
        }

        if let Err(e) = channel.send_text(&text).await {
            warn!(error = %e, "Failed to deliver notification");
        }
    }

    pub async fn info(&self, message: &str) {
        self.notify(NotifyLevel::Info, message).await
    }

    pub async fn trade(&self, message: &str) {
        self.notify(NotifyLevel::Trade, message).await
    }

    pub async fn warning(&self, message: &str) {
        self.notify(NotifyLevel::Warning, message).await
    }

    pub async fn critical(&self, message: &str) {
        self.notify(NotifyLevel::Critical, message).await
    }
}

/// Channel that keeps every message in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: std::sync::Mutex<Vec<String>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingChannel {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send_text(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("channel down"));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
