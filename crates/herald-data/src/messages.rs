//! Message table access.

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};

use crate::error::{Result, map_query_err};

const INSERT_MESSAGE: &str = r"
    INSERT INTO messages (chat_id, message_id, sender_id, text, timestamp)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (chat_id, message_id) DO NOTHING
";

const SELECT_MESSAGE: &str = r"
    SELECT chat_id, message_id, sender_id, text, timestamp
    FROM messages
    WHERE chat_id = $1 AND message_id = $2
";

const COUNT_MESSAGES_IN_CHAT: &str = r"SELECT COUNT(*) FROM messages WHERE chat_id = $1";

/// Borrowed insert payload for a single message row.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    /// Chat the message belongs to.
    pub chat_id: i64,
    /// Message identifier within the chat.
    pub message_id: i64,
    /// Author identifier, `0` when unknown.
    pub sender_id: i64,
    /// Message text.
    pub text: &'a str,
    /// Platform timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Raw projection of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct MessageRow {
    /// Chat the message belongs to.
    pub chat_id: i64,
    /// Message identifier within the chat.
    pub message_id: i64,
    /// Author identifier, `0` when unknown.
    pub sender_id: i64,
    /// Message text.
    pub text: String,
    /// Platform timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Insert a message unless a row with the same `(chat_id, message_id)` exists.
///
/// Returns `true` when a row was written and `false` for a duplicate delivery.
///
/// # Errors
///
/// Returns an error for any failure other than the key conflict.
pub async fn insert_message<'e, E>(executor: E, message: &NewMessage<'_>) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let outcome = sqlx::query(INSERT_MESSAGE)
        .bind(message.chat_id)
        .bind(message.message_id)
        .bind(message.sender_id)
        .bind(message.text)
        .bind(message.timestamp)
        .execute(executor)
        .await
        .map_err(map_query_err("insert message"))?;
    Ok(outcome.rows_affected() == 1)
}

/// Load a single message by key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn fetch_message<'e, E>(
    executor: E,
    chat_id: i64,
    message_id: i64,
) -> Result<Option<MessageRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, MessageRow>(SELECT_MESSAGE)
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("fetch message"))
}

/// Count the rows stored for a chat.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn count_messages_in_chat<'e, E>(executor: E, chat_id: i64) -> Result<i64>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, i64>(COUNT_MESSAGES_IN_CHAT)
        .bind(chat_id)
        .fetch_one(executor)
        .await
        .map_err(map_query_err("count messages"))
}
