//! Event records delivered by the upstream stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform identifier for a chat, group, or channel.
pub type SourceId = i64;

/// Platform-assigned sequence number, unique within a single source.
pub type EventId = i64;

/// Identifier of the account that authored an event.
pub type SenderId = i64;

/// Sender recorded when the platform omits the author (channel posts, anonymous admins).
pub const UNKNOWN_SENDER: SenderId = 0;

/// Immutable message event received from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Chat or channel the event was posted in.
    pub source_id: SourceId,
    /// Message identifier within `source_id`.
    pub event_id: EventId,
    /// Author of the message, [`UNKNOWN_SENDER`] when absent.
    pub sender_id: SenderId,
    /// Message text; empty for media-only messages.
    pub text: String,
    /// Time the platform accepted the message.
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    /// Build an event, mapping an absent sender to [`UNKNOWN_SENDER`].
    #[must_use]
    pub fn new(
        source_id: SourceId,
        event_id: EventId,
        sender_id: Option<SenderId>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id,
            event_id,
            sender_id: sender_id.unwrap_or(UNKNOWN_SENDER),
            text: text.into(),
            timestamp,
        }
    }

    /// Identity of the event; at most one stored row exists per key.
    #[must_use]
    pub const fn key(&self) -> (SourceId, EventId) {
        (self.source_id, self.event_id)
    }
}
