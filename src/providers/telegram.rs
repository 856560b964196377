//! Telegram Bot API Client
//!
//! Plain HTTPS calls: `sendMessage` (HTML parse mode), `getUpdates` long
//! polling and `deleteWebhook` so long polling is allowed to start.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::models::errors::{AppError, AppResult, ErrorCode};
use crate::utils::constants::{TELEGRAM_API_BASE, TELEGRAM_POLL_TIMEOUT_SECS, USER_AGENT};
use crate::utils::format::truncate_message;

/// Outbound message seam (the notifier and the bot talk through this)
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, chat_id: i64, html: &str) -> AppResult<()>;
}

// ============================================
// WIRE TYPES
// ============================================

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: TgChat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

// ============================================
// CLIENT
// ============================================

#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramBot {
    pub fn new(token: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(TELEGRAM_POLL_TIMEOUT_SECS + 15))
            .build()
            .map_err(|e| AppError::with_source(ErrorCode::ProviderTelegramFailed, "HTTP client build failed", e))?;
        Ok(Self {
            client,
            base_url: TELEGRAM_API_BASE.to_string(),
            token: token.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn unwrap_response<T: serde::de::DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(AppError::rate_limited("Telegram"));
        }
        let body: TgResponse<T> = response.json().await?;
        if !body.ok {
            return Err(AppError::new(
                ErrorCode::ProviderTelegramFailed,
                format!(
                    "{} failed (HTTP {}): {}",
                    method,
                    status,
                    body.description.unwrap_or_default()
                ),
            ));
        }
        body.result
            .ok_or_else(|| AppError::new(ErrorCode::RespInvalidJson, format!("{}: empty result", method)))
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> AppResult<Vec<Update>> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
                ("allowed_updates", "[\"message\"]".to_string()),
            ])
            .send()
            .await?;
        Self::unwrap_response("getUpdates", response).await
    }

    pub async fn delete_webhook(&self) -> AppResult<()> {
        let response = self
            .client
            .post(self.method_url("deleteWebhook"))
            .send()
            .await?;
        Self::unwrap_response::<bool>("deleteWebhook", response).await?;
        debug!("🪝 Webhook removed, long polling enabled");
        Ok(())
    }
}

#[async_trait]
impl MessageSender for TelegramBot {
    async fn send_message(&self, chat_id: i64, html: &str) -> AppResult<()> {
        let text = truncate_message(html);
        let chat = chat_id.to_string();
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .form(&[
                ("chat_id", chat.as_str()),
                ("text", text.as_str()),
                ("parse_mode", "HTML"),
                ("disable_web_page_preview", "true"),
            ])
            .send()
            .await?;
        Self::unwrap_response::<serde_json::Value>("sendMessage", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_updates() {
        let raw = r#"{"ok":true,"result":[{"update_id":10,"message":{"message_id":1,"from":{"id":42,"is_bot":false,"username":"owner"},"chat":{"id":42,"type":"private"},"text":"/status"}}]}"#;
        let body: TgResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        let updates = body.result.unwrap();
        assert_eq!(updates[0].update_id, 10);
        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.from.as_ref().unwrap().id, 42);
        assert_eq!(msg.text.as_deref(), Some("/status"));
    }

    #[test]
    fn test_method_url() {
        let bot = TelegramBot::new("123:abc").unwrap().with_base_url("http://localhost:1");
        assert_eq!(bot.method_url("sendMessage"), "http://localhost:1/bot123:abc/sendMessage");
    }
}
