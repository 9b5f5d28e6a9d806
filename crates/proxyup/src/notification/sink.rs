use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build notification client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to send notification: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification channel returned status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Message delivery channel
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Drops every message
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send(&self, _message: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API `sendMessage` in HTML parse mode
pub struct TelegramSink {
    client: reqwest::Client,
    api_base: String,
    token: String,
    chat_id: String,
    enabled: bool,
}

impl TelegramSink {
    pub fn new(
        enabled: bool,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client =
            reqwest::Client::builder().timeout(SEND_TIMEOUT).build().map_err(NotifyError::Client)?;

        Ok(Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            enabled,
        })
    }

    /// Point at a different Bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.enabled && !self.token.is_empty() && !self.chat_id.is_empty()
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        if !self.is_configured() {
            debug!("Telegram disabled or unconfigured, dropping message");
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base.trim_end_matches('/'), self.token);
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let response = self.client.post(url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status: status.as_u16(), body });
        }

        debug!("Telegram notification sent");
        Ok(())
    }
}
