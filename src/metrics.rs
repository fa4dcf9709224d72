//! Prometheus Metrics
//!
//! Counters and gauges for connections and routing outcomes.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::router::RouteOutcome;

/// Relay server metrics.
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    /// Total WebSocket connections accepted.
    pub connections_total: IntCounter,
    /// Current open WebSocket connections.
    pub connections_active: IntGauge,
    /// Rejected or failed connection attempts.
    pub connection_errors: IntCounter,
    /// Participants that have completed the handshake.
    pub participants_registered: IntGauge,

    /// Text frames received from clients.
    pub messages_received: IntCounter,
    /// Frames relayed to at least one recipient.
    pub messages_relayed: IntCounter,
    /// Frames dropped without any reply.
    pub messages_dropped: IntCounter,
    /// Frames answered with an `error` reply.
    pub malformed_frames: IntCounter,
    /// Frames refused by the rate limiter or size check.
    pub rate_limited: IntCounter,
    /// Frames written to client sockets.
    pub frames_delivered: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let metric = IntCounter::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntGauge> {
    let metric = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl RelayMetrics {
    /// Creates a new metrics set registered in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        Ok(RelayMetrics {
            connections_total: counter(
                &registry,
                "relay_connections_total",
                "Total WebSocket connections accepted",
            )?,
            connections_active: gauge(
                &registry,
                "relay_connections_active",
                "Current active WebSocket connections",
            )?,
            connection_errors: counter(
                &registry,
                "relay_connection_errors_total",
                "Total connection errors",
            )?,
            participants_registered: gauge(
                &registry,
                "relay_participants_registered",
                "Participants that completed the key handshake",
            )?,
            messages_received: counter(
                &registry,
                "relay_messages_received_total",
                "Total text frames received",
            )?,
            messages_relayed: counter(
                &registry,
                "relay_messages_relayed_total",
                "Total frames relayed to other participants",
            )?,
            messages_dropped: counter(
                &registry,
                "relay_messages_dropped_total",
                "Total frames silently dropped",
            )?,
            malformed_frames: counter(
                &registry,
                "relay_malformed_frames_total",
                "Total unparseable frames",
            )?,
            rate_limited: counter(
                &registry,
                "relay_rate_limited_total",
                "Total frames refused by rate or size limits",
            )?,
            frames_delivered: counter(
                &registry,
                "relay_frames_delivered_total",
                "Total frames written to client sockets",
            )?,
            registry: Arc::new(registry),
        })
    }

    /// Counts the outcome of routing one frame.
    pub fn record(&self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Relayed { delivered } if *delivered > 0 => self.messages_relayed.inc(),
            RouteOutcome::Relayed { .. } | RouteOutcome::Dropped(_) => self.messages_dropped.inc(),
            RouteOutcome::Rejected => self.malformed_frames.inc(),
            RouteOutcome::Registered { .. }
            | RouteOutcome::Prompted
            | RouteOutcome::UnknownConnection => {}
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
