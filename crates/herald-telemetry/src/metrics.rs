//! Prometheus-backed counters for the ingestion core.
//!
//! Collectors are registered once per [`Metrics`] instance, so tests can build
//! isolated registries without touching the process-global default.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the ingestion tasks.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_total: IntCounterVec,
    commands_total: IntCounterVec,
    backoff_seconds_total: IntCounter,
    handlers_in_flight: IntGauge,
}

/// Point-in-time copy of the counters, used for shutdown reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events written to the message table.
    pub persisted: u64,
    /// Events that were already stored.
    pub duplicates: u64,
    /// Events dropped by the allow-list.
    pub filtered: u64,
    /// Events routed to the command router.
    pub commands: u64,
    /// Events whose handling failed.
    pub failed: u64,
    /// Events whose handling was suspended by a rate-limit signal.
    pub rate_limited: u64,
    /// Total seconds spent in rate-limit backoff.
    pub backoff_seconds: u64,
}

fn collector<T>(name: &'static str, built: prometheus::Result<T>) -> Result<T> {
    built.map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a registry with the ingestion collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_total = collector(
            "herald_events_total",
            IntCounterVec::new(
                Opts::new("herald_events_total", "Upstream events handled by outcome"),
                &["outcome"],
            ),
        )?;
        let commands_total = collector(
            "herald_commands_total",
            IntCounterVec::new(
                Opts::new("herald_commands_total", "Operator commands handled by name"),
                &["command"],
            ),
        )?;
        let backoff_seconds_total = collector(
            "herald_backoff_seconds_total",
            IntCounter::with_opts(Opts::new(
                "herald_backoff_seconds_total",
                "Seconds spent suspended by upstream rate limits",
            )),
        )?;
        let handlers_in_flight = collector(
            "herald_handlers_in_flight",
            IntGauge::with_opts(Opts::new(
                "herald_handlers_in_flight",
                "Event handlers currently running",
            )),
        )?;

        collector(
            "herald_events_total",
            registry.register(Box::new(events_total.clone())),
        )?;
        collector(
            "herald_commands_total",
            registry.register(Box::new(commands_total.clone())),
        )?;
        collector(
            "herald_backoff_seconds_total",
            registry.register(Box::new(backoff_seconds_total.clone())),
        )?;
        collector(
            "herald_handlers_in_flight",
            registry.register(Box::new(handlers_in_flight.clone())),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                events_total,
                commands_total,
                backoff_seconds_total,
                handlers_in_flight,
            }),
        })
    }

    /// Count one handled event under `outcome`.
    pub fn inc_event(&self, outcome: &str) {
        self.inner.events_total.with_label_values(&[outcome]).inc();
    }

    /// Count one executed operator command.
    pub fn inc_command(&self, command: &str) {
        self.inner.commands_total.with_label_values(&[command]).inc();
    }

    /// Record time spent suspended by a rate-limit signal.
    pub fn observe_backoff(&self, pause: Duration) {
        self.inner.backoff_seconds_total.inc_by(pause.as_secs());
    }

    /// Track a handler starting (`true`) or finishing (`false`).
    pub fn track_handler(&self, started: bool) {
        if started {
            self.inner.handlers_in_flight.inc();
        } else {
            self.inner.handlers_in_flight.dec();
        }
    }

    /// Number of events counted under `outcome`.
    #[must_use]
    pub fn event_count(&self, outcome: &str) -> u64 {
        self.inner.events_total.with_label_values(&[outcome]).get()
    }

    /// Number of times `command` was executed.
    #[must_use]
    pub fn command_count(&self, command: &str) -> u64 {
        self.inner.commands_total.with_label_values(&[command]).get()
    }

    /// Handlers currently running.
    #[must_use]
    pub fn handlers_in_flight(&self) -> i64 {
        self.inner.handlers_in_flight.get()
    }

    /// Copy the headline counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            persisted: self.event_count("persisted"),
            duplicates: self.event_count("duplicate"),
            filtered: self.event_count("filtered"),
            commands: self.event_count("command"),
            failed: self.event_count("failed"),
            rate_limited: self.event_count("rate_limited"),
            backoff_seconds: self.inner.backoff_seconds_total.get(),
        }
    }

    /// Render all collectors in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_render() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_event("persisted");
        metrics.inc_event("persisted");
        metrics.inc_event("duplicate");
        metrics.inc_command("filtr");
        metrics.observe_backoff(Duration::from_secs(3));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.persisted, 2);
        assert_eq!(snapshot.duplicates, 1);
        assert_eq!(snapshot.backoff_seconds, 3);
        assert_eq!(metrics.command_count("filtr"), 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("herald_events_total{outcome=\"persisted\"} 2"));
        assert!(rendered.contains("herald_backoff_seconds_total 3"));
        Ok(())
    }

    #[test]
    fn registries_are_isolated() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_event("filtered");
        assert_eq!(second.event_count("filtered"), 0);
        Ok(())
    }

    #[test]
    fn handler_gauge_tracks_start_and_finish() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.track_handler(true);
        metrics.track_handler(true);
        metrics.track_handler(false);
        assert_eq!(metrics.handlers_in_flight(), 1);
        Ok(())
    }
}
