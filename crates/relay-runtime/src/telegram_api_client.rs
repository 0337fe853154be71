//! Telegram Bot API adapter for the chat-platform capability.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::chat_platform::{ChatPlatform, InboundMessage};
use crate::config_store::ChannelId;
use crate::relay_error::{DeliveryError, RelayError};

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const TELEGRAM_USER_AGENT: &str = "forward-relay/telegram";
const TELEGRAM_RATE_LIMIT_CODE: u16 = 429;
const ERROR_BODY_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, Deserialize)]
struct TelegramEnvelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<TelegramResponseParameters>,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug)]
/// Telegram Bot API client using long-poll `getUpdates`.
pub struct TelegramBotApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    request_timeout: Duration,
    poll_timeout_seconds: u64,
    next_update_offset: AtomicI64,
}

impl TelegramBotApiClient {
    pub fn new(
        api_base: &str,
        bot_token: &str,
        request_timeout: Duration,
        poll_timeout_seconds: u64,
    ) -> Result<Self, RelayError> {
        let bot_token = bot_token.trim();
        if bot_token.is_empty() {
            return Err(RelayError::Config(
                "bot_token is required for the telegram bot api transport".to_string(),
            ));
        }
        let api_base = api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            return Err(RelayError::Config(
                "telegram api base cannot be empty".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .user_agent(TELEGRAM_USER_AGENT)
            .build()
            .map_err(|error| {
                RelayError::Config(format!("failed to create telegram api client: {error}"))
            })?;
        Ok(Self {
            http,
            api_base: api_base.to_string(),
            bot_token: bot_token.to_string(),
            request_timeout: request_timeout.max(Duration::from_millis(1)),
            poll_timeout_seconds,
            next_update_offset: AtomicI64::new(0),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// reqwest errors render the request URL, which embeds the bot token.
    fn transport_failure(&self, method: &str, stage: &str, error: reqwest::Error) -> DeliveryError {
        let detail = format!("telegram {method} {stage}: {}", error.without_url());
        DeliveryError::failed("transport_error", self.redact_token(&detail))
    }

    fn redact_token(&self, text: &str) -> String {
        text.replace(self.bot_token.as_str(), "<redacted>")
    }

    async fn call(
        &self,
        method: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, DeliveryError> {
        let response = self
            .http
            .post(self.endpoint(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| self.transport_failure(method, "request failed", error))?;

        let status = response.status();
        let header_retry_after = parse_retry_after(response.headers());
        let body = response
            .text()
            .await
            .map_err(|error| self.transport_failure(method, "body read failed", error))?;
        let envelope = serde_json::from_str::<TelegramEnvelope>(&body).ok();

        let rate_limited = status.as_u16() == TELEGRAM_RATE_LIMIT_CODE
            || envelope
                .as_ref()
                .and_then(|envelope| envelope.error_code)
                .is_some_and(|code| code == TELEGRAM_RATE_LIMIT_CODE);
        if rate_limited {
            let retry_after_seconds = envelope
                .as_ref()
                .and_then(|envelope| envelope.parameters.as_ref())
                .and_then(|parameters| parameters.retry_after)
                .or(header_retry_after)
                .unwrap_or(1);
            return Err(DeliveryError::RateLimited {
                retry_after_seconds,
            });
        }

        match envelope {
            Some(envelope) if envelope.ok && status.is_success() => Ok(envelope.result),
            Some(envelope) => Err(DeliveryError::failed(
                "telegram_api_error",
                format!(
                    "telegram {method} failed with status {}: {}",
                    envelope.error_code.unwrap_or_else(|| status.as_u16()),
                    envelope
                        .description
                        .unwrap_or_else(|| "unknown error".to_string())
                ),
            )),
            None => Err(DeliveryError::failed(
                "decode_error",
                format!(
                    "telegram {method} returned status {} with undecodable body: {}",
                    status.as_u16(),
                    truncate_for_error(&self.redact_token(&body), ERROR_BODY_MAX_CHARS)
                ),
            )),
        }
    }
}

#[async_trait]
impl ChatPlatform for TelegramBotApiClient {
    async fn poll_messages(&self) -> Result<Vec<InboundMessage>, DeliveryError> {
        let offset = self.next_update_offset.load(Ordering::SeqCst);
        let payload = json!({
            "offset": offset,
            "timeout": self.poll_timeout_seconds,
            "allowed_updates": ["message", "channel_post"],
        });
        let timeout = self
            .request_timeout
            .saturating_add(Duration::from_secs(self.poll_timeout_seconds));
        let result = self.call("getUpdates", &payload, timeout).await?;
        let updates = result.as_array().ok_or_else(|| {
            DeliveryError::failed("decode_error", "telegram getUpdates result is not an array")
        })?;

        let mut next_offset = offset;
        let mut messages = Vec::new();
        for update in updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                next_offset = next_offset.max(update_id.saturating_add(1));
            }
            if let Some(message) = parse_inbound_message(update) {
                messages.push(message);
            }
        }
        self.next_update_offset.store(next_offset, Ordering::SeqCst);
        Ok(messages)
    }

    async fn forward_message(
        &self,
        destination: &ChannelId,
        message: &InboundMessage,
    ) -> Result<(), DeliveryError> {
        let payload = json!({
            "chat_id": destination,
            "from_chat_id": message.chat_id,
            "message_id": message.message_id,
        });
        self.call("forwardMessage", &payload, self.request_timeout)
            .await
            .map(|_| ())
    }

    async fn send_message(&self, destination: &ChannelId, text: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "chat_id": destination,
            "text": text,
            "disable_web_page_preview": true,
        });
        self.call("sendMessage", &payload, self.request_timeout)
            .await
            .map(|_| ())
    }

    async fn reply(&self, origin: &InboundMessage, text: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "chat_id": origin.chat_id,
            "text": text,
            "reply_parameters": {
                "message_id": origin.message_id,
                "allow_sending_without_reply": true,
            },
        });
        self.call("sendMessage", &payload, self.request_timeout)
            .await
            .map(|_| ())
    }
}

fn parse_inbound_message(update: &Value) -> Option<InboundMessage> {
    let message = update
        .get("message")
        .or_else(|| update.get("channel_post"))?;
    let chat = message.get("chat")?;
    Some(InboundMessage {
        chat_id: chat.get("id").and_then(Value::as_i64)?,
        chat_username: chat
            .get("username")
            .and_then(Value::as_str)
            .map(str::to_string),
        message_id: message.get("message_id").and_then(Value::as_i64)?,
        sender_id: message
            .get("from")
            .and_then(|from| from.get("id"))
            .and_then(Value::as_i64),
        text: message
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
