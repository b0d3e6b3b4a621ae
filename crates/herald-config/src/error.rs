//! Error types for configuration operations.

use herald_data::DataError;
use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was absent or blank.
    #[error("missing required environment variable")]
    MissingVariable {
        /// Variable name.
        name: &'static str,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Field or variable that failed validation.
        field: String,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// Data layer operation failed.
    #[error("data access failed")]
    DataAccess {
        /// Operation identifier.
        operation: &'static str,
        /// Source data-layer error.
        source: DataError,
    },
    /// Opening or committing a transaction failed.
    #[error("database operation failed")]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Source database error.
        source: sqlx::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            field: field.into(),
            value: Some(value.into()),
            reason,
        }
    }

    pub(crate) fn data(operation: &'static str) -> impl Fn(DataError) -> Self {
        move |source| Self::DataAccess { operation, source }
    }

    pub(crate) fn database(operation: &'static str) -> impl Fn(sqlx::Error) -> Self {
        move |source| Self::Database { operation, source }
    }
}
