//! Operator configuration rows (`user_config`).

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};

use crate::error::{Result, map_query_err};

const UPSERT_CONFIG_VALUE: &str = r"
    INSERT INTO user_config (user_id, config_key, config_value, updated_at)
    VALUES ($1, $2, $3, now())
    ON CONFLICT (user_id, config_key)
    DO UPDATE SET config_value = EXCLUDED.config_value, updated_at = EXCLUDED.updated_at
";

const SELECT_CONFIG_VALUE: &str = r"
    SELECT config_value FROM user_config WHERE user_id = $1 AND config_key = $2
";

const SELECT_CONFIG_ROWS: &str = r"
    SELECT user_id, config_key, config_value, updated_at
    FROM user_config
    WHERE user_id = $1
    ORDER BY config_key
";

/// Raw projection of the `user_config` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ConfigRow {
    /// Operator that owns the entry.
    pub user_id: i64,
    /// Setting name.
    pub config_key: String,
    /// Setting value.
    pub config_value: String,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

/// Insert or replace the value stored for `(user_id, config_key)`.
///
/// # Errors
///
/// Returns an error when the statement fails.
pub async fn upsert_config_value<'e, E>(
    executor: E,
    user_id: i64,
    config_key: &str,
    config_value: &str,
) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(UPSERT_CONFIG_VALUE)
        .bind(user_id)
        .bind(config_key)
        .bind(config_value)
        .execute(executor)
        .await
        .map_err(map_query_err("upsert config value"))?;
    Ok(())
}

/// Load the value stored for `(user_id, config_key)`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn fetch_config_value<'e, E>(
    executor: E,
    user_id: i64,
    config_key: &str,
) -> Result<Option<String>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_scalar::<_, String>(SELECT_CONFIG_VALUE)
        .bind(user_id)
        .bind(config_key)
        .fetch_optional(executor)
        .await
        .map_err(map_query_err("fetch config value"))
}

/// Load every entry owned by `user_id`, ordered by key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub async fn fetch_config_rows<'e, E>(executor: E, user_id: i64) -> Result<Vec<ConfigRow>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, ConfigRow>(SELECT_CONFIG_ROWS)
        .bind(user_id)
        .fetch_all(executor)
        .await
        .map_err(map_query_err("fetch config rows"))
}
