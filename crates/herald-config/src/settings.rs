//! Process settings read once from the environment.

use crate::allow_list::AllowList;
use crate::error::{ConfigError, ConfigResult};

/// Postgres connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Bot API token.
pub const ENV_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
/// Bot API base URL override.
pub const ENV_API_BASE: &str = "TELEGRAM_API_BASE";
/// Comma-separated permitted chat ids.
pub const ENV_ALLOW_CHAT_IDS: &str = "ALLOW_CHAT_IDS";
/// Comma-separated chat ids that may issue commands.
pub const ENV_CONTROL_CHAT_IDS: &str = "CONTROL_CHAT_IDS";
/// Pool ceiling for scoped connections.
pub const ENV_DB_MAX_CONNECTIONS: &str = "HERALD_DB_MAX_CONNECTIONS";
/// Log filter used when `RUST_LOG` is unset.
pub const ENV_LOG_LEVEL: &str = "HERALD_LOG_LEVEL";
/// Log output format.
pub const ENV_LOG_FORMAT: &str = "HERALD_LOG_FORMAT";

/// Public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
/// Default pool ceiling.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 4;

/// Immutable settings for one process lifetime.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Postgres connection string.
    pub database_url: String,
    /// Bot API token.
    pub bot_token: String,
    /// Bot API base URL without trailing slash.
    pub api_base: String,
    /// Sources whose events are handled at all.
    pub allow_list: AllowList,
    /// Sources whose command text is routed to the command router.
    pub control_chats: AllowList,
    /// Pool ceiling for scoped connections.
    pub db_max_connections: u32,
    /// Explicit log filter, if any.
    pub log_level: Option<String>,
    /// Explicit log format name, if any.
    pub log_format: Option<String>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &"<redacted>")
            .field("bot_token", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("allow_list", &self.allow_list)
            .field("control_chats", &self.control_chats)
            .field("db_max_connections", &self.db_max_connections)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value is malformed.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error when a required variable is missing or a value is malformed.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &'static str| {
            optional(name).ok_or(ConfigError::MissingVariable { name })
        };

        let db_max_connections = match optional(ENV_DB_MAX_CONNECTIONS) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => value,
                _ => {
                    return Err(ConfigError::invalid(
                        ENV_DB_MAX_CONNECTIONS,
                        raw,
                        "must be a positive integer",
                    ));
                }
            },
            None => DEFAULT_DB_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url: required(ENV_DATABASE_URL)?,
            bot_token: required(ENV_BOT_TOKEN)?,
            api_base: optional(ENV_API_BASE)
                .map_or_else(|| DEFAULT_API_BASE.to_string(), |base| {
                    base.trim_end_matches('/').to_string()
                }),
            allow_list: parse_id_list(ENV_ALLOW_CHAT_IDS, optional(ENV_ALLOW_CHAT_IDS).as_deref())?,
            control_chats: parse_id_list(
                ENV_CONTROL_CHAT_IDS,
                optional(ENV_CONTROL_CHAT_IDS).as_deref(),
            )?,
            db_max_connections,
            log_level: optional(ENV_LOG_LEVEL),
            log_format: optional(ENV_LOG_FORMAT),
        })
    }
}

/// Parse a comma-separated list of chat ids; blank entries are skipped.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for an entry that is not an integer.
pub fn parse_id_list(field: &str, raw: Option<&str>) -> ConfigResult<AllowList> {
    let Some(raw) = raw else {
        return Ok(AllowList::open());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<i64>()
                .map_err(|_| ConfigError::invalid(field, entry, "chat id is not an integer"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn minimal_environment_uses_defaults() -> ConfigResult<()> {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://localhost/herald"),
            (ENV_BOT_TOKEN, "123:abc"),
        ]))?;
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
        assert!(settings.allow_list.is_empty());
        assert!(settings.control_chats.is_empty());
        assert_eq!(settings.db_max_connections, DEFAULT_DB_MAX_CONNECTIONS);
        assert_eq!(settings.log_level, None);
        Ok(())
    }

    #[test]
    fn missing_required_variable_is_named() {
        let err = Settings::from_lookup(lookup(&[(ENV_BOT_TOKEN, "123:abc")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVariable { name } if name == ENV_DATABASE_URL
        ));
    }

    #[test]
    fn id_lists_skip_blanks_and_reject_garbage() -> ConfigResult<()> {
        let list = parse_id_list(ENV_ALLOW_CHAT_IDS, Some(" -1001, ,42,"))?;
        assert_eq!(list.len(), 2);
        assert!(list.permits(-1001));

        let err = parse_id_list(ENV_ALLOW_CHAT_IDS, Some("12,abc")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidField { value: Some(ref v), .. } if v == "abc"
        ));
        Ok(())
    }

    #[test]
    fn overrides_are_trimmed_and_validated() -> ConfigResult<()> {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://localhost/herald"),
            (ENV_BOT_TOKEN, "123:abc"),
            (ENV_API_BASE, "http://127.0.0.1:8081/"),
            (ENV_DB_MAX_CONNECTIONS, "8"),
            (ENV_LOG_FORMAT, "json"),
        ]))?;
        assert_eq!(settings.api_base, "http://127.0.0.1:8081");
        assert_eq!(settings.db_max_connections, 8);
        assert_eq!(settings.log_format.as_deref(), Some("json"));

        let err = Settings::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://localhost/herald"),
            (ENV_BOT_TOKEN, "123:abc"),
            (ENV_DB_MAX_CONNECTIONS, "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { .. }));
        Ok(())
    }

    #[test]
    fn debug_output_redacts_secrets() -> ConfigResult<()> {
        let settings = Settings::from_lookup(lookup(&[
            (ENV_DATABASE_URL, "postgres://user:pw@localhost/herald"),
            (ENV_BOT_TOKEN, "123:secret"),
        ]))?;
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("pw@"));
        Ok(())
    }
}
