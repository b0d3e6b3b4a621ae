//! Event consumer: the receive loop and the per-event handler.
//!
//! Every delivered event runs in its own task. A failure inside one handler is
//! logged and counted; only a lost upstream connection ends the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use herald_config::AllowList;
use herald_data::DataError;
use herald_events::{EventSource, InboundEvent, UpstreamError};
use herald_telemetry::{Metrics, event_span};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, debug, error, info, warn};

use crate::commands::{Command, CommandRouter};
use crate::persistence::{PersistenceGateway, StoreOutcome, StoredMessage};

/// Extra second added on top of every platform-requested cooldown.
const BACKOFF_MARGIN: Duration = Duration::from_secs(1);

/// How a single event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Written to the message table.
    Persisted,
    /// Already stored; nothing written.
    Duplicate,
    /// Dropped by the allow-list.
    Filtered,
    /// Routed to the command router.
    Command,
}

impl Disposition {
    /// Metric and log label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Persisted => "persisted",
            Self::Duplicate => "duplicate",
            Self::Filtered => "filtered",
            Self::Command => "command",
        }
    }
}

/// Per-event failure. Never fatal to the consumer.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Writing the message failed.
    #[error("message persistence failed")]
    Storage {
        /// Source data-layer error.
        source: DataError,
    },
    /// Applying an operator command to the settings store failed.
    #[error("settings update failed")]
    Config {
        /// Command label.
        command: &'static str,
        /// Source configuration error.
        source: herald_config::ConfigError,
    },
    /// Sending a reply to the platform failed.
    #[error("reply delivery failed")]
    Reply {
        /// Source upstream error.
        source: UpstreamError,
    },
}

impl HandlerError {
    /// Cooldown requested by the platform, if this failure is a rate-limit signal.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Reply { source } => source.retry_after(),
            Self::Storage { .. } | Self::Config { .. } => None,
        }
    }
}

/// Pause applied for a platform-requested cooldown.
#[must_use]
pub fn backoff_for(retry_after: Duration) -> Duration {
    retry_after + BACKOFF_MARGIN
}

/// Routes one event through the allow-list, the command router, or persistence.
pub struct EventHandler {
    allow_list: AllowList,
    control_chats: AllowList,
    gateway: Arc<dyn PersistenceGateway>,
    router: CommandRouter,
    bot_username: Option<String>,
}

impl EventHandler {
    /// Build a handler over injected collaborators.
    #[must_use]
    pub fn new(
        allow_list: AllowList,
        control_chats: AllowList,
        gateway: Arc<dyn PersistenceGateway>,
        router: CommandRouter,
    ) -> Self {
        Self {
            allow_list,
            control_chats,
            gateway,
            router,
            bot_username: None,
        }
    }

    /// Accept `/command@username` forms addressed to this bot.
    #[must_use]
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    /// Handle `event` once.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when persistence, the settings store, or a
    /// reply fails.
    pub async fn handle(&self, event: &InboundEvent) -> Result<Disposition, HandlerError> {
        if !self.allow_list.permits(event.source_id) {
            return Ok(Disposition::Filtered);
        }

        if self.control_chats.permits(event.source_id)
            && let Some(parsed) =
                Command::parse_addressed(&event.text, self.bot_username.as_deref())
        {
            self.router.execute(event, parsed).await?;
            return Ok(Disposition::Command);
        }

        let outcome = self
            .gateway
            .store(&StoredMessage::from(event))
            .await
            .map_err(|source| HandlerError::Storage { source })?;
        Ok(match outcome {
            StoreOutcome::Inserted => Disposition::Persisted,
            StoreOutcome::Duplicate => Disposition::Duplicate,
        })
    }
}

/// Run the handler for one event, absorbing every failure.
///
/// A rate-limit signal suspends this event's task for the cooldown plus one
/// second; the event is not retried.
pub async fn dispatch(handler: &EventHandler, metrics: &Metrics, event: InboundEvent) {
    let span = event_span(event.source_id, event.event_id);
    async {
        metrics.track_handler(true);
        match handler.handle(&event).await {
            Ok(disposition) => {
                metrics.inc_event(disposition.label());
                debug!(outcome = disposition.label(), "event handled");
            }
            Err(err) => {
                if let Some(retry_after) = err.retry_after() {
                    let pause = backoff_for(retry_after);
                    metrics.inc_event("rate_limited");
                    metrics.observe_backoff(pause);
                    warn!(
                        pause_secs = pause.as_secs(),
                        "upstream rate limit; suspending event handler"
                    );
                    tokio::time::sleep(pause).await;
                } else {
                    metrics.inc_event("failed");
                    warn!(error = %err, detail = ?err, "event handling failed; event dropped");
                }
            }
        }
        metrics.track_handler(false);
    }
    .instrument(span)
    .await;
}

/// Totals reported when the consumer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Events pulled from the source.
    pub received: u64,
    /// Handler tasks joined.
    pub joined: u64,
    /// Handler tasks that panicked.
    pub panicked: u64,
    /// Stream-level rate-limit pauses.
    pub stream_pauses: u64,
}

impl ConsumerReport {
    fn record_join(&mut self, joined: Result<(), JoinError>) {
        self.joined += 1;
        if let Err(err) = joined {
            self.panicked += 1;
            error!(error = %err, "event handler task failed");
        }
    }
}

/// Single logical consumer of the upstream event stream.
pub struct EventConsumer {
    handler: Arc<EventHandler>,
    metrics: Metrics,
}

impl EventConsumer {
    /// Build a consumer around `handler`.
    #[must_use]
    pub fn new(handler: EventHandler, metrics: Metrics) -> Self {
        Self {
            handler: Arc::new(handler),
            metrics,
        }
    }

    /// Receive events until the stream ends, the connection is lost, or
    /// `shutdown` resolves; then wait for in-flight handlers.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`UpstreamError`] when the upstream connection is lost.
    pub async fn run<S, F>(&self, mut source: S, shutdown: F) -> Result<ConsumerReport, UpstreamError>
    where
        S: EventSource,
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        let mut report = ConsumerReport::default();
        tokio::pin!(shutdown);

        let outcome = loop {
            while let Some(joined) = tasks.try_join_next() {
                report.record_join(joined);
            }

            let delivery = tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested; no longer receiving events");
                    break Ok(());
                }
                delivery = source.next() => delivery,
            };

            match delivery {
                None => {
                    info!("upstream event stream ended");
                    break Ok(());
                }
                Some(Ok(event)) => {
                    report.received += 1;
                    let handler = Arc::clone(&self.handler);
                    let metrics = self.metrics.clone();
                    tasks.spawn(async move { dispatch(&handler, &metrics, event).await });
                }
                Some(Err(err)) if err.is_fatal() => {
                    error!(error = %err, detail = ?err, "upstream connection lost");
                    break Err(err);
                }
                Some(Err(err)) => {
                    if let Some(retry_after) = err.retry_after() {
                        let pause = backoff_for(retry_after);
                        report.stream_pauses += 1;
                        self.metrics.observe_backoff(pause);
                        warn!(
                            pause_secs = pause.as_secs(),
                            "upstream rate limit; pausing receive loop"
                        );
                        tokio::select! {
                            () = &mut shutdown => {
                                info!("shutdown requested during rate-limit pause");
                                break Ok(());
                            }
                            () = tokio::time::sleep(pause) => {}
                        }
                    } else {
                        warn!(error = %err, detail = ?err, "upstream delivery rejected; continuing");
                    }
                }
            }
        };

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "waiting for in-flight event handlers");
        }
        while let Some(joined) = tasks.join_next().await {
            report.record_join(joined);
        }

        outcome.map(|()| report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::HELP_TEXT;
    use crate::fakes::{MemoryConfig, MemoryGateway};
    use chrono::Utc;
    use herald_config::{
        ConfigFacade, DEFAULT_OWNER, KEY_MIN_LIQ, KEY_MIN_MCAP, KEY_SPIKE_THRESHOLD,
        KEY_SPIKE_WINDOW,
    };
    use herald_events::{ReplySink, channel};
    use herald_test_support::mocks::RecordingReplies;
    use tokio::time::Instant;

    const CHAT_A: i64 = -1001;
    const CHAT_B: i64 = -1002;

    struct Harness {
        gateway: Arc<MemoryGateway>,
        config: Arc<MemoryConfig>,
        replies: Arc<RecordingReplies>,
        metrics: Metrics,
        consumer: EventConsumer,
    }

    fn harness(allow_list: AllowList, control_chats: AllowList) -> Harness {
        let gateway = Arc::new(MemoryGateway::default());
        let config = Arc::new(MemoryConfig::default());
        let replies = Arc::new(RecordingReplies::new());
        let metrics = Metrics::new().expect("metrics");
        let router = CommandRouter::new(
            Arc::clone(&config) as Arc<dyn ConfigFacade>,
            Arc::clone(&replies) as Arc<dyn ReplySink>,
            metrics.clone(),
        );
        let handler = EventHandler::new(
            allow_list,
            control_chats,
            Arc::clone(&gateway) as Arc<dyn PersistenceGateway>,
            router,
        )
        .with_bot_username("herald_bot");
        Harness {
            consumer: EventConsumer::new(handler, metrics.clone()),
            gateway,
            config,
            replies,
            metrics,
        }
    }

    fn event(source_id: i64, event_id: i64, text: &str) -> InboundEvent {
        InboundEvent::new(source_id, event_id, Some(77), text, Utc::now())
    }

    async fn run_all(
        harness: &Harness,
        items: Vec<Result<InboundEvent, UpstreamError>>,
    ) -> Result<ConsumerReport, UpstreamError> {
        let (sender, source) = channel(items.len().max(1));
        for item in items {
            match item {
                Ok(event) => sender.deliver(event).await.expect("deliver"),
                Err(err) => sender.signal(err).await.expect("signal"),
            }
        }
        drop(sender);
        harness
            .consumer
            .run(source, std::future::pending::<()>())
            .await
    }

    #[tokio::test]
    async fn duplicate_delivery_leaves_one_row() {
        let h = harness(AllowList::open(), AllowList::open());
        let report = run_all(
            &h,
            vec![Ok(event(CHAT_A, 1, "gm")), Ok(event(CHAT_A, 1, "gm"))],
        )
        .await
        .expect("consumer run");

        assert_eq!(report.received, 2);
        assert_eq!(report.joined, 2);
        assert_eq!(h.gateway.event_ids(), vec![1]);
        let snapshot = h.metrics.snapshot();
        assert_eq!(snapshot.persisted, 1);
        assert_eq!(snapshot.duplicates, 1);
    }

    #[tokio::test]
    async fn allow_list_gates_persistence_and_replies() {
        let h = harness([CHAT_A].into_iter().collect(), AllowList::open());
        run_all(
            &h,
            vec![
                Ok(event(CHAT_B, 1, "hello")),
                Ok(event(CHAT_B, 2, "/help")),
                Ok(event(CHAT_A, 3, "hello")),
            ],
        )
        .await
        .expect("consumer run");

        assert_eq!(h.gateway.event_ids(), vec![3]);
        assert!(h.replies.sent().is_empty());
        assert_eq!(h.metrics.event_count("filtered"), 2);
    }

    #[tokio::test]
    async fn commands_for_other_bots_are_stored_as_messages() {
        let h = harness(AllowList::open(), AllowList::open());
        run_all(
            &h,
            vec![
                Ok(event(CHAT_A, 1, "/filtr@SomeOtherBot 1 2")),
                Ok(event(CHAT_A, 2, "/filtr@herald_bot 3 4")),
            ],
        )
        .await
        .expect("consumer run");

        assert_eq!(h.gateway.event_ids(), vec![1]);
        assert_eq!(h.config.value(DEFAULT_OWNER, KEY_MIN_MCAP).as_deref(), Some("3"));
        assert_eq!(
            h.replies.texts(),
            vec!["Filter updated: mcap>=3, liq>=4 (chain: all)".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_allow_list_persists_everything() {
        let h = harness(AllowList::open(), AllowList::open());
        run_all(
            &h,
            vec![
                Ok(event(CHAT_A, 1, "one")),
                Ok(event(CHAT_B, 2, "two")),
                Ok(event(42, 3, "")),
            ],
        )
        .await
        .expect("consumer run");

        let rows = h.gateway.rows();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.sender_id == 77));
    }

    #[tokio::test]
    async fn commands_are_last_write_wins_and_not_persisted() {
        let h = harness(AllowList::open(), AllowList::open());
        run_all(
            &h,
            vec![
                Ok(event(CHAT_A, 1, "/filtr 100 50")),
                Ok(event(CHAT_A, 2, "/spikesedit 10")),
            ],
        )
        .await
        .expect("first batch");
        // Handlers run concurrently; order the second write after the first.
        run_all(&h, vec![Ok(event(CHAT_A, 3, "/filtr 200 75"))])
            .await
            .expect("second batch");
        run_all(&h, vec![Ok(event(CHAT_A, 4, "/spikesedit 10 60"))])
            .await
            .expect("third batch");

        assert_eq!(h.config.value(DEFAULT_OWNER, KEY_MIN_MCAP).as_deref(), Some("200"));
        assert_eq!(h.config.value(DEFAULT_OWNER, KEY_MIN_LIQ).as_deref(), Some("75"));
        assert_eq!(h.config.value(DEFAULT_OWNER, KEY_SPIKE_THRESHOLD).as_deref(), Some("10"));
        assert_eq!(h.config.value(DEFAULT_OWNER, KEY_SPIKE_WINDOW).as_deref(), Some("60"));
        assert!(h.gateway.rows().is_empty());
        assert_eq!(h.replies.sent().len(), 4);
        assert_eq!(h.metrics.event_count("command"), 4);
        assert_eq!(h.metrics.command_count("filtr"), 2);
    }

    #[tokio::test]
    async fn spikesedit_without_window_defaults_to_300() {
        let h = harness(AllowList::open(), AllowList::open());
        run_all(&h, vec![Ok(event(CHAT_A, 1, "/spikesedit 10"))])
            .await
            .expect("consumer run");
        assert_eq!(h.config.value(DEFAULT_OWNER, KEY_SPIKE_WINDOW).as_deref(), Some("300"));
        assert_eq!(
            h.replies.texts(),
            vec!["Spike settings: threshold=10 msgs, window=300s".to_string()]
        );
    }

    #[tokio::test]
    async fn commands_outside_control_chats_are_persisted_as_messages() {
        let h = harness(AllowList::open(), [CHAT_A].into_iter().collect());
        run_all(
            &h,
            vec![
                Ok(event(CHAT_B, 1, "/filtr 1 2")),
                Ok(event(CHAT_A, 2, "/help")),
            ],
        )
        .await
        .expect("consumer run");

        assert_eq!(h.gateway.event_ids(), vec![1]);
        assert!(h.config.is_empty());
        assert_eq!(h.replies.texts(), vec![HELP_TEXT.to_string()]);
    }

    #[tokio::test]
    async fn malformed_command_replies_without_crashing() {
        let h = harness(AllowList::open(), AllowList::open());
        run_all(
            &h,
            vec![Ok(event(CHAT_A, 1, "/filtr abc")), Ok(event(CHAT_A, 2, "after"))],
        )
        .await
        .expect("consumer run");

        assert_eq!(h.replies.sent().len(), 1);
        assert!(h.replies.texts()[0].starts_with("Invalid /filtr arguments:"));
        assert_eq!(h.gateway.event_ids(), vec![2]);
        assert!(h.config.is_empty());
    }

    #[tokio::test]
    async fn storage_failure_does_not_stop_later_events() {
        let h = harness(AllowList::open(), AllowList::open());
        h.gateway.fail_next();
        run_all(&h, vec![Ok(event(CHAT_A, 1, "lost"))])
            .await
            .expect("first run");
        run_all(&h, vec![Ok(event(CHAT_A, 2, "kept"))])
            .await
            .expect("second run");

        assert_eq!(h.gateway.event_ids(), vec![2]);
        assert_eq!(h.metrics.event_count("failed"), 1);
        assert_eq!(h.metrics.event_count("persisted"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_handler_sleeps_retry_after_plus_one() {
        let h = harness(AllowList::open(), AllowList::open());
        h.replies.fail_next(UpstreamError::RateLimited {
            retry_after_secs: 2,
        });
        let started = Instant::now();
        let report = run_all(
            &h,
            vec![Ok(event(CHAT_A, 1, "/help")), Ok(event(CHAT_A, 2, "next"))],
        )
        .await
        .expect("consumer run");

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
        assert_eq!(report.joined, 2);

        // The next event was not held behind the sleeping handler.
        let stored = h.gateway.stored_at(2).expect("second event stored");
        assert!(stored.duration_since(started) < Duration::from_secs(1));
        assert!(h.replies.sent().is_empty(), "rate-limited reply is not retried");
        assert_eq!(h.metrics.event_count("rate_limited"), 1);
        assert_eq!(h.metrics.snapshot().backoff_seconds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_rate_limit_pauses_receive_loop() {
        let h = harness(AllowList::open(), AllowList::open());
        let started = Instant::now();
        let report = run_all(
            &h,
            vec![
                Err(UpstreamError::RateLimited {
                    retry_after_secs: 2,
                }),
                Ok(event(CHAT_A, 1, "after pause")),
            ],
        )
        .await
        .expect("consumer run");

        assert_eq!(report.stream_pauses, 1);
        let stored = h.gateway.stored_at(1).expect("event stored");
        assert!(stored.duration_since(started) >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn rejected_delivery_is_skipped() {
        let h = harness(AllowList::open(), AllowList::open());
        let report = run_all(
            &h,
            vec![
                Err(UpstreamError::Rejected {
                    operation: "telegram.get_updates",
                    status: Some(500),
                    description: "internal".into(),
                }),
                Ok(event(CHAT_A, 1, "still here")),
            ],
        )
        .await
        .expect("consumer run");
        assert_eq!(report.received, 1);
        assert_eq!(h.gateway.event_ids(), vec![1]);
    }

    #[tokio::test]
    async fn connection_loss_is_fatal_after_draining() {
        let h = harness(AllowList::open(), AllowList::open());
        let err = run_all(
            &h,
            vec![
                Ok(event(CHAT_A, 1, "before")),
                Err(UpstreamError::ConnectionLost {
                    operation: "telegram.get_updates",
                    reason: "unauthorized".into(),
                }),
                Ok(event(CHAT_A, 2, "never handled")),
            ],
        )
        .await
        .expect_err("fatal");

        assert!(err.is_fatal());
        assert_eq!(h.gateway.event_ids(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_receiving_and_drains() {
        let h = harness(AllowList::open(), AllowList::open());
        let (sender, source) = channel(4);
        sender
            .deliver(event(CHAT_A, 1, "in flight"))
            .await
            .expect("deliver");

        let shutdown = tokio::time::sleep(Duration::from_millis(10));
        let report = h
            .consumer
            .run(source, shutdown)
            .await
            .expect("clean shutdown");

        assert_eq!(report.received, 1);
        assert_eq!(report.joined, 1);
        assert_eq!(h.gateway.event_ids(), vec![1]);
        drop(sender);
    }
}
