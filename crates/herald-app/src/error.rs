//! # Design
//!
//! - Centralize application-level errors for bootstrap and the consumer loop.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment configuration was missing.
    #[error("missing environment configuration")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: &'static str,
    },
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: herald_config::ConfigError,
    },
    /// Database setup failed.
    #[error("database operation failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: herald_data::DataError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: herald_telemetry::TelemetryError,
    },
    /// The upstream platform failed in a way the process cannot recover from.
    #[error("upstream operation failed")]
    Upstream {
        /// Operation identifier.
        operation: &'static str,
        /// Source upstream error.
        source: herald_events::UpstreamError,
    },
    /// HTTP client construction failed.
    #[error("http client setup failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
}

impl AppError {
    /// Map a settings failure, surfacing missing variables as [`AppError::MissingEnv`].
    pub(crate) fn settings(source: herald_config::ConfigError) -> Self {
        match source {
            herald_config::ConfigError::MissingVariable { name } => Self::MissingEnv { name },
            other => Self::Config {
                operation: "settings.from_env",
                source: other,
            },
        }
    }

    pub(crate) const fn data(operation: &'static str, source: herald_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: herald_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn upstream(
        operation: &'static str,
        source: herald_events::UpstreamError,
    ) -> Self {
        Self::Upstream { operation, source }
    }

    pub(crate) const fn http(operation: &'static str, source: reqwest::Error) -> Self {
        Self::Http { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn missing_variable_becomes_missing_env() {
        let err = AppError::settings(herald_config::ConfigError::MissingVariable {
            name: "DATABASE_URL",
        });
        assert!(matches!(
            err,
            AppError::MissingEnv {
                name: "DATABASE_URL"
            }
        ));
        assert_eq!(err.to_string(), "missing environment configuration");
    }

    #[test]
    fn invalid_settings_keep_source() {
        let err = AppError::settings(herald_config::ConfigError::InvalidField {
            field: "ALLOW_CHAT_IDS".into(),
            value: Some("x".into()),
            reason: "chat id is not an integer",
        });
        assert!(matches!(err, AppError::Config { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn upstream_errors_keep_operation() {
        let err = AppError::upstream(
            "consumer.run",
            herald_events::UpstreamError::ConnectionLost {
                operation: "telegram.get_updates",
                reason: "unauthorized".into(),
            },
        );
        assert_eq!(err.to_string(), "upstream operation failed");
        assert!(matches!(
            err,
            AppError::Upstream {
                operation: "consumer.run",
                ..
            }
        ));
    }
}
