//! Span helpers for the process and for individual events.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the `app` span tagged with `mode` and the build identifier.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", mode = %mode, build_sha = %build_sha()),
        ));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Span wrapping the handling of a single upstream event.
#[must_use]
pub fn event_span(source_id: i64, event_id: i64) -> Span {
    tracing::info_span!("event", source_id, event_id)
}
