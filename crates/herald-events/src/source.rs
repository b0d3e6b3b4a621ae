//! Delivery seams between the platform adapter and the ingestion core.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::error::{UpstreamError, UpstreamResult};
use crate::payloads::{EventId, InboundEvent, SourceId};

/// Pull-based view of the upstream event stream.
///
/// `Some(Err(_))` reports a stream-level condition (a rate-limit cooldown or a
/// lost connection) without ending the stream; `None` means the stream ended.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next delivery.
    async fn next(&mut self) -> Option<UpstreamResult<InboundEvent>>;
}

/// Sends textual replies back to the context an event came from.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Reply to `reply_to` inside `source_id`.
    async fn reply(&self, source_id: SourceId, reply_to: EventId, text: &str) -> UpstreamResult<()>;
}

/// Adapts any [`Stream`] of deliveries into an [`EventSource`].
pub struct StreamSource<S> {
    inner: S,
}

impl<S> StreamSource<S> {
    /// Wrap the provided stream.
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> EventSource for StreamSource<S>
where
    S: Stream<Item = UpstreamResult<InboundEvent>> + Send + Unpin,
{
    async fn next(&mut self) -> Option<UpstreamResult<InboundEvent>> {
        self.inner.next().await
    }
}

/// Source fed by an in-process producer through a bounded channel.
pub type ChannelSource = StreamSource<ReceiverStream<UpstreamResult<InboundEvent>>>;

/// Producer half of [`channel`].
#[derive(Clone)]
pub struct EventSender {
    sender: mpsc::Sender<UpstreamResult<InboundEvent>>,
}

impl EventSender {
    /// Deliver an event, waiting while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::ConnectionLost`] when the consuming side has been dropped.
    pub async fn deliver(&self, event: InboundEvent) -> UpstreamResult<()> {
        self.push(Ok(event)).await
    }

    /// Report a stream-level condition such as a rate-limit cooldown.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::ConnectionLost`] when the consuming side has been dropped.
    pub async fn signal(&self, condition: UpstreamError) -> UpstreamResult<()> {
        self.push(Err(condition)).await
    }

    async fn push(&self, item: UpstreamResult<InboundEvent>) -> UpstreamResult<()> {
        self.sender
            .send(item)
            .await
            .map_err(|_| UpstreamError::ConnectionLost {
                operation: "channel.deliver",
                reason: "event consumer dropped".to_string(),
            })
    }
}

/// Create a bounded in-process event channel.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn channel(capacity: usize) -> (EventSender, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        EventSender { sender },
        StreamSource::new(ReceiverStream::new(receiver)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(event_id: EventId) -> InboundEvent {
        InboundEvent::new(10, event_id, Some(1), "text", Utc::now())
    }

    #[tokio::test]
    async fn channel_preserves_order_and_signals() {
        let (sender, mut source) = channel(8);
        sender.deliver(sample(1)).await.expect("deliver first");
        sender
            .signal(UpstreamError::RateLimited {
                retry_after_secs: 3,
            })
            .await
            .expect("deliver signal");
        sender.deliver(sample(2)).await.expect("deliver second");
        drop(sender);

        assert_eq!(source.next().await.map(|item| item.map(|e| e.event_id)), Some(Ok(1)));
        assert!(matches!(
            source.next().await,
            Some(Err(UpstreamError::RateLimited {
                retry_after_secs: 3
            }))
        ));
        assert_eq!(source.next().await.map(|item| item.map(|e| e.event_id)), Some(Ok(2)));
        assert!(source.next().await.is_none());
    }

    #[tokio::test]
    async fn delivery_fails_once_consumer_is_gone() {
        let (sender, source) = channel(1);
        drop(source);
        let err = sender.deliver(sample(1)).await.expect_err("consumer dropped");
        assert!(err.is_fatal());
    }
}
