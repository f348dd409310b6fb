//! Telegram channel — message sending via the Bot API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use remailer_core::config::TelegramConfig;
use remailer_core::error::{RemailerError, Result};
use remailer_core::traits::{ChannelSender, SendOutcome};
use remailer_core::types::{ChannelTag, Message};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    description: Option<String>,
}

/// Bot API sender. The message's own chat id wins over the configured
/// default; no token or no chat id means the channel is skipped.
pub struct TelegramSender {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramSender {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn resolve_chat_id<'a>(&'a self, message: &'a Message) -> Option<&'a str> {
        message
            .telegram_chat_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                let id = self.config.default_chat_id.as_str();
                (!id.is_empty()).then_some(id)
            })
    }

    async fn deliver(&self, chat_id: &str, text: &str) -> Result<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        );
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .timeout(SEND_TIMEOUT)
            .send()
            .await
            .map_err(|e| RemailerError::channel(format!("Telegram send failed: {e}")))?;

        let status = resp.status();
        let body: TelegramApiResponse = resp
            .json()
            .await
            .map_err(|e| RemailerError::channel(format!("Invalid Telegram response: {e}")))?;

        if !body.ok {
            return Err(RemailerError::channel(format!(
                "Telegram API error {status}: {}",
                body.description.unwrap_or_default()
            )));
        }
        tracing::info!("✅ Telegram message sent to chat {chat_id}");
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for TelegramSender {
    fn channel(&self) -> ChannelTag {
        ChannelTag::Telegram
    }

    async fn send(&self, message: &Message) -> SendOutcome {
        let Some(chat_id) = self.resolve_chat_id(message) else {
            return SendOutcome::skipped("No telegram target");
        };
        if self.config.bot_token.is_empty() {
            return SendOutcome::skipped("Telegram not configured");
        }
        let text = message
            .telegram_text
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&message.body);
        match self.deliver(chat_id, text).await {
            Ok(()) => SendOutcome::sent(),
            Err(e) => SendOutcome::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use remailer_core::types::DeliveryStatus;

    fn message(chat_id: Option<&str>) -> Message {
        Message {
            id: 1,
            name: "digest".into(),
            subject: None,
            body: "hello".into(),
            telegram_text: None,
            email_to: None,
            telegram_chat_id: chat_id.map(Into::into),
            is_active: true,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_skipped() {
        let sender = TelegramSender::new(TelegramConfig {
            bot_token: String::new(),
            default_chat_id: "42".into(),
        });
        let outcome = sender.send(&message(None)).await;
        assert_eq!(outcome.status, DeliveryStatus::Skipped);
        assert_eq!(outcome.detail, "Telegram not configured");
    }

    #[tokio::test]
    async fn test_missing_chat_id_is_skipped() {
        let sender = TelegramSender::new(TelegramConfig {
            bot_token: "123:abc".into(),
            default_chat_id: String::new(),
        });
        let outcome = sender.send(&message(None)).await;
        assert_eq!(outcome.status, DeliveryStatus::Skipped);
    }

    #[test]
    fn test_chat_id_resolution() {
        let sender = TelegramSender::new(TelegramConfig {
            bot_token: "123:abc".into(),
            default_chat_id: "fallback".into(),
        });
        assert_eq!(sender.resolve_chat_id(&message(Some("own"))), Some("own"));
        assert_eq!(sender.resolve_chat_id(&message(None)), Some("fallback"));
        assert_eq!(sender.resolve_chat_id(&message(Some(""))), Some("fallback"));
    }
}
