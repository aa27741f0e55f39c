//! Telegram Bot API: HTML alerts out, operator commands in.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{BotError, Result};
use crate::notify::{CommandSource, Notifier};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramUpdates {
    ok: bool,
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

fn bot_base(token: &str) -> String {
    format!("{}/bot{}", TELEGRAM_API, token)
}

/// Sends HTML messages to one chat
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    base: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: bot_base(bot_token),
            chat_id: chat_id.to_string(),
        }
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Internal(format!(
                "Telegram sendMessage failed: {} - {}",
                status, body
            )));
        }
        debug!("Telegram notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        if let Err(e) = self.send_message(text).await {
            error!("Telegram send failed: {}", e);
        }
    }
}

/// Long-polls `getUpdates` for command texts from the allowed chat
pub struct TelegramCommandSource {
    client: reqwest::Client,
    base: String,
    allowed_chat_id: i64,
    poll_timeout_secs: u64,
    last_update_id: AtomicI64,
}

impl TelegramCommandSource {
    pub fn new(bot_token: &str, chat_id: &str, poll_timeout_secs: u64) -> Result<Self> {
        let allowed_chat_id = chat_id.trim().parse::<i64>().map_err(|_| {
            BotError::Validation(format!("telegram.chat_id must be numeric, got {:?}", chat_id))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            base: bot_base(bot_token),
            allowed_chat_id,
            poll_timeout_secs,
            last_update_id: AtomicI64::new(0),
        })
    }

    async fn poll_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let offset = self.last_update_id.load(Ordering::SeqCst) + 1;
        let resp = self
            .client
            .post(format!("{}/getUpdates", self.base))
            .json(&serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            }))
            .timeout(Duration::from_secs(self.poll_timeout_secs + 10))
            .send()
            .await?;

        let updates: TelegramUpdates = resp.json().await?;
        if !updates.ok {
            return Err(BotError::Internal("Telegram getUpdates returned ok=false".into()));
        }
        if let Some(last) = updates.result.iter().map(|u| u.update_id).max() {
            self.last_update_id.fetch_max(last, Ordering::SeqCst);
        }
        Ok(updates.result)
    }

    fn accept(&self, updates: Vec<TelegramUpdate>) -> Vec<String> {
        updates
            .into_iter()
            .filter_map(|update| {
                let message = update.message?;
                if message.chat.id != self.allowed_chat_id {
                    warn!(chat_id = message.chat.id, "ignoring message from unknown chat");
                    return None;
                }
                message.text
            })
            .collect()
    }
}

#[async_trait]
impl CommandSource for TelegramCommandSource {
    async fn poll(&self) -> Vec<String> {
        match self.poll_updates().await {
            Ok(updates) => self.accept(updates),
            Err(e) => {
                warn!("Telegram poll error: {}", e);
                Vec::new()
            }
        }
    }
}
