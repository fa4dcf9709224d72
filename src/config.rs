//! Relay Server Configuration
//!
//! Configuration loaded from environment variables. Unparseable values are
//! ignored and the default is kept.

use std::net::SocketAddr;
use std::time::Duration;

use crate::router::DEFAULT_GENERAL_ROOM;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// Address of the HTTP health/metrics listener.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum inbound text frame size in bytes.
    pub max_message_size: usize,
    /// Rate limit (frames per minute per remote address).
    pub rate_limit_per_min: u32,
    /// Idle timeout in seconds (for slowloris protection).
    pub idle_timeout_secs: u64,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Recipient name that turns typing signals into broadcasts.
    pub general_room: String,
    /// Optional bearer token guarding `/metrics`.
    pub metrics_token: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 18080)),
            metrics_addr: SocketAddr::from(([127, 0, 0, 1], 18081)),
            max_connections: 1000,
            max_message_size: 1_048_576, // 1 MB
            rate_limit_per_min: 600,
            idle_timeout_secs: 300, // 5 minutes
            outbound_queue_capacity: 256,
            general_room: DEFAULT_GENERAL_ROOM.to_string(),
            metrics_token: None,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT").and_then(|v| v.parse().ok()) {
            config.listen_addr.set_port(port);
        }

        if let Some(parsed) = lookup("RELAY_LISTEN_ADDR").and_then(|v| v.parse().ok()) {
            config.listen_addr = parsed;
        }

        if let Some(parsed) = lookup("RELAY_METRICS_ADDR").and_then(|v| v.parse().ok()) {
            config.metrics_addr = parsed;
        }

        if let Some(parsed) = lookup("RELAY_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.max_connections = parsed;
        }

        if let Some(parsed) = lookup("RELAY_MAX_MESSAGE_SIZE").and_then(|v| v.parse().ok()) {
            config.max_message_size = parsed;
        }

        if let Some(parsed) = lookup("RELAY_RATE_LIMIT").and_then(|v| v.parse().ok()) {
            config.rate_limit_per_min = parsed;
        }

        if let Some(parsed) = lookup("RELAY_IDLE_TIMEOUT").and_then(|v| v.parse().ok()) {
            config.idle_timeout_secs = parsed;
        }

        // A zero-capacity tokio channel panics on creation.
        if let Some(parsed) = lookup("RELAY_OUTBOUND_QUEUE")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
        {
            config.outbound_queue_capacity = parsed;
        }

        if let Some(room) = lookup("RELAY_GENERAL_ROOM").filter(|v| !v.trim().is_empty()) {
            config.general_room = room;
        }

        if let Some(token) = lookup("RELAY_METRICS_TOKEN").filter(|v| !v.is_empty()) {
            config.metrics_token = Some(token);
        }

        config
    }

    /// Returns the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
