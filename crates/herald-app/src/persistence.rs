//! Message persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_data::messages::{NewMessage, insert_message};
use herald_data::{DataError, DataResult};
use herald_events::{EventId, InboundEvent, SenderId, SourceId};
use sqlx::PgPool;

/// Row-shaped projection of an event, as written to the message table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Chat the event came from.
    pub source_id: SourceId,
    /// Event identifier within the chat.
    pub event_id: EventId,
    /// Author, `0` when unknown.
    pub sender_id: SenderId,
    /// Message text, empty when the event carried none.
    pub text: String,
    /// Platform timestamp.
    pub timestamp: DateTime<Utc>,
}

impl From<&InboundEvent> for StoredMessage {
    fn from(event: &InboundEvent) -> Self {
        Self {
            source_id: event.source_id,
            event_id: event.event_id,
            sender_id: event.sender_id,
            text: event.text.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Result of a successful store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new row was written.
    Inserted,
    /// A row with the same key already existed; nothing was written.
    Duplicate,
}

/// Durable, idempotent sink for messages.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Write `message` unless its `(source_id, event_id)` key is already stored.
    async fn store(&self, message: &StoredMessage) -> DataResult<StoreOutcome>;
}

/// Gateway writing to the Postgres `messages` table.
#[derive(Clone)]
pub struct PgPersistenceGateway {
    pool: PgPool,
}

impl PgPersistenceGateway {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceGateway for PgPersistenceGateway {
    async fn store(&self, message: &StoredMessage) -> DataResult<StoreOutcome> {
        // The connection returns to the pool when `conn` drops, on every path.
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|source| DataError::QueryFailed {
                operation: "acquire message connection",
                source,
            })?;
        let inserted = insert_message(
            &mut *conn,
            &NewMessage {
                chat_id: message.source_id,
                message_id: message.event_id,
                sender_id: message.sender_id,
                text: &message.text,
                timestamp: message.timestamp,
            },
        )
        .await?;
        Ok(if inserted {
            StoreOutcome::Inserted
        } else {
            StoreOutcome::Duplicate
        })
    }
}
