// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hush Relay Server
//!
//! Relay for end-to-end encrypted chat. Provides:
//! - WebSocket endpoint for the key handshake and opaque message relay
//! - HTTP endpoints for health checks and Prometheus metrics
//! - Rate and connection limiting

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use hush_relay::config::RelayConfig;
use hush_relay::connection_limit::ConnectionLimiter;
use hush_relay::connection_registry::ConnectionRegistry;
use hush_relay::handler::{self, ConnectionDeps};
use hush_relay::http::{create_router, HttpState};
use hush_relay::metrics::RelayMetrics;
use hush_relay::rate_limit::RateLimiter;
use hush_relay::router::MessageRouter;

#[tokio::main]
async fn main() {
    let default_directive: Directive = "hush_relay=info"
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive))
        .init();

    let config = RelayConfig::from_env();

    info!("Starting Hush Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("Metrics endpoint: {}", config.metrics_addr);
    info!("General room: {:?}", config.general_room);
    info!("Idle timeout: {}s", config.idle_timeout_secs);

    let metrics = match RelayMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            error!("Failed to register metrics: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(MessageRouter::new(
        registry.clone(),
        config.general_room.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_min));
    let connection_limiter = ConnectionLimiter::new(config.max_connections);

    if config.metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    } else if !config.metrics_addr.ip().is_loopback() {
        warn!("Metrics exposed on non-localhost without auth token");
        warn!("Consider setting RELAY_METRICS_TOKEN for production use");
    }

    let http_router = create_router(HttpState {
        metrics: metrics.clone(),
        metrics_token: config.metrics_token.clone(),
        registry: registry.clone(),
        started_at: Instant::now(),
    });
    let http_listener = match TcpListener::bind(config.metrics_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind HTTP listener on {}: {}", config.metrics_addr, e);
            std::process::exit(1);
        }
    };
    tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, http_router).await {
            error!("HTTP server stopped: {}", e);
        }
    });

    // Drop rate limiter buckets for addresses idle for 30 minutes.
    let cleanup_rate_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(600)).await;
            let removed = cleanup_rate_limiter.cleanup_inactive(Duration::from_secs(1800));
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter entries", removed);
            }
        }
    });

    let listener = match TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind WebSocket listener on {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };
    info!("WebSocket server listening on {}", config.listen_addr);

    let deps = ConnectionDeps {
        router,
        rate_limiter,
        metrics,
        max_message_size: config.max_message_size,
        idle_timeout: config.idle_timeout(),
        outbound_queue_capacity: config.outbound_queue_capacity,
    };

    tokio::select! {
        _ = handler::run_listener(listener, deps, connection_limiter) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
