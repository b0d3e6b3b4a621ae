//! Upstream failure primitives.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Failure reported by the upstream platform or its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The platform asked the client to pause before issuing more requests.
    RateLimited {
        /// Cooldown requested by the platform, in whole seconds.
        retry_after_secs: u64,
    },
    /// The platform refused a single request; the session remains usable.
    Rejected {
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code when the transport exposes one.
        status: Option<u16>,
        /// Platform-provided description.
        description: String,
    },
    /// The subscription itself is gone and cannot be resumed by the consumer.
    ConnectionLost {
        /// Operation identifier.
        operation: &'static str,
        /// Human-readable cause.
        reason: String,
    },
}

impl UpstreamError {
    /// Cooldown requested by a rate-limit signal.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            Self::Rejected { .. } | Self::ConnectionLost { .. } => None,
        }
    }

    /// Whether the failure ends the subscription.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

impl Display for UpstreamError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { .. } => formatter.write_str("upstream rate limit"),
            Self::Rejected { .. } => formatter.write_str("upstream rejected request"),
            Self::ConnectionLost { .. } => formatter.write_str("upstream connection lost"),
        }
    }
}

impl std::error::Error for UpstreamError {}

/// Result wrapper for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;
