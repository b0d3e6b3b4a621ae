//! Telegram Bot API adapter.
//!
//! `getUpdates` long polling feeds the [`EventSource`] seam and `sendMessage`
//! backs the [`ReplySink`] seam. Platform failures are classified into
//! [`UpstreamError`] so the consumer can tell cooldowns from fatal losses.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_events::{
    EventId, EventSource, InboundEvent, ReplySink, SourceId, UpstreamError, UpstreamResult,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

/// Long-poll timeout passed to `getUpdates`, in seconds.
pub const POLL_TIMEOUT_SECS: u64 = 30;
/// Pause before retrying a failed poll that was not a rate limit or a fatal loss.
const TRANSPORT_RETRY: Duration = Duration::from_secs(5);
/// Cooldown assumed for an HTTP 429 that carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Identity reported by `getMe`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BotIdentity {
    /// Bot user id.
    pub id: i64,
    /// Bot username without the leading `@`.
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// One entry of a `getUpdates` result.
#[derive(Debug, Deserialize)]
pub struct Update {
    /// Monotonic update identifier.
    pub update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    channel_post: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    date: i64,
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    sender_chat: Option<Chat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

impl Update {
    /// Project the update onto an [`InboundEvent`]; `None` for update kinds
    /// that carry no new message.
    #[must_use]
    pub fn into_event(self) -> Option<InboundEvent> {
        let message = self.message.or(self.channel_post)?;
        let sender = message
            .from
            .map(|user| user.id)
            .or_else(|| message.sender_chat.map(|chat| chat.id));
        let text = message.text.or(message.caption).unwrap_or_default();
        let timestamp = DateTime::<Utc>::from_timestamp(message.date, 0).unwrap_or_else(Utc::now);
        Some(InboundEvent::new(
            message.chat.id,
            message.message_id,
            sender,
            text,
            timestamp,
        ))
    }
}

/// Map a failed Bot API response onto an [`UpstreamError`].
#[must_use]
pub fn classify_failure(
    operation: &'static str,
    status: u16,
    description: Option<String>,
    retry_after: Option<u64>,
) -> UpstreamError {
    if let Some(retry_after_secs) = retry_after {
        return UpstreamError::RateLimited { retry_after_secs };
    }
    let description = description.unwrap_or_else(|| "no description".to_string());
    match status {
        429 => UpstreamError::RateLimited {
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        },
        401 | 404 => UpstreamError::ConnectionLost {
            operation,
            reason: description,
        },
        _ => UpstreamError::Rejected {
            operation,
            status: Some(status),
            description,
        },
    }
}

/// HTTP client for a single bot token.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramClient {
    /// Build a client for `token` against `api_base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(api_base: &str, token: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/bot{token}", api_base.trim_end_matches('/')),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: &str,
        body: serde_json::Value,
    ) -> UpstreamResult<T> {
        let url = format!("{}/{method}", self.endpoint);
        let transport = |err: reqwest::Error| UpstreamError::Rejected {
            operation,
            status: err.status().map(|status| status.as_u16()),
            description: err.without_url().to_string(),
        };

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let envelope: ApiResponse<T> = response.json().await.map_err(transport)?;

        match envelope {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                description,
                parameters,
                ..
            } => Err(classify_failure(
                operation,
                status,
                description,
                parameters.and_then(|p| p.retry_after),
            )),
        }
    }

    /// Verify the token and fetch the bot identity.
    ///
    /// # Errors
    ///
    /// Returns the classified platform failure.
    pub async fn get_me(&self) -> UpstreamResult<BotIdentity> {
        self.call("telegram.get_me", "getMe", json!({})).await
    }

    /// Long-poll for updates starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the classified platform failure.
    pub async fn get_updates(&self, offset: i64) -> UpstreamResult<Vec<Update>> {
        self.call(
            "telegram.get_updates",
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "channel_post"],
            }),
        )
        .await
    }

    /// Send `text` to `chat_id` as a reply to `reply_to`.
    ///
    /// # Errors
    ///
    /// Returns the classified platform failure.
    pub async fn send_message(
        &self,
        chat_id: SourceId,
        reply_to: EventId,
        text: &str,
    ) -> UpstreamResult<()> {
        self.call::<serde_json::Value>(
            "telegram.send_message",
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "reply_to_message_id": reply_to,
                "allow_sending_without_reply": true,
            }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn reply(&self, source_id: SourceId, reply_to: EventId, text: &str) -> UpstreamResult<()> {
        self.send_message(source_id, reply_to, text).await
    }
}

/// [`EventSource`] backed by `getUpdates` long polling.
///
/// The offset only advances once a poll response has been buffered, so a
/// cancelled `next` redelivers rather than loses updates.
pub struct TelegramSource {
    client: TelegramClient,
    offset: i64,
    pending: VecDeque<InboundEvent>,
}

impl TelegramSource {
    /// Start polling from the oldest unconfirmed update.
    #[must_use]
    pub const fn new(client: TelegramClient) -> Self {
        Self {
            client,
            offset: 0,
            pending: VecDeque::new(),
        }
    }

    fn absorb(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            if let Some(event) = update.into_event() {
                self.pending.push_back(event);
            }
        }
    }
}

#[async_trait]
impl EventSource for TelegramSource {
    async fn next(&mut self) -> Option<UpstreamResult<InboundEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            match self.client.get_updates(self.offset).await {
                Ok(updates) => {
                    debug!(count = updates.len(), offset = self.offset, "updates received");
                    self.absorb(updates);
                }
                Err(err @ (UpstreamError::RateLimited { .. } | UpstreamError::ConnectionLost { .. })) => {
                    return Some(Err(err));
                }
                Err(err) => {
                    warn!(error = %err, detail = ?err, "update poll failed; retrying");
                    tokio::time::sleep(TRANSPORT_RETRY).await;
                }
            }
        }
    }
}
