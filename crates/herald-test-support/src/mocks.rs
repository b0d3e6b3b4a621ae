//! Fake upstream collaborators.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use herald_events::{EventId, ReplySink, SourceId, UpstreamError, UpstreamResult};

/// Reply captured by [`RecordingReplies`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReply {
    /// Context the reply was sent to.
    pub source_id: SourceId,
    /// Event being answered.
    pub reply_to: EventId,
    /// Reply body.
    pub text: String,
}

/// [`ReplySink`] that records successful replies and can fail on demand.
///
/// Queued failures are consumed one per call, before any reply is recorded.
#[derive(Default)]
pub struct RecordingReplies {
    sent: Mutex<Vec<SentReply>>,
    failures: Mutex<VecDeque<UpstreamError>>,
}

impl RecordingReplies {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next reply attempt fail with `error`.
    pub fn fail_next(&self, error: UpstreamError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Replies recorded so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentReply> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bodies of the replies recorded so far.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|reply| reply.text).collect()
    }
}

#[async_trait]
impl ReplySink for RecordingReplies {
    async fn reply(&self, source_id: SourceId, reply_to: EventId, text: &str) -> UpstreamResult<()> {
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentReply {
                source_id,
                reply_to,
                text: text.to_string(),
            });
        Ok(())
    }
}
