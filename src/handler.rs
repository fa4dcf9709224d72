// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Accepts TCP connections, upgrades them to WebSocket and drives one task
//! per connection. Each task feeds inbound text frames to the router and
//! drains the connection's outbound queue onto the socket.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::connection_limit::ConnectionLimiter;
use crate::connection_registry::{ConnectionHandle, ConnectionId};
use crate::metrics::RelayMetrics;
use crate::rate_limit::RateLimiter;
use crate::router::MessageRouter;

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub router: Arc<MessageRouter>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: RelayMetrics,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
    pub outbound_queue_capacity: usize,
}

/// Accepts connections for as long as the task runs.
///
/// Connections beyond the limiter's capacity are dropped before the
/// WebSocket handshake; the handshake itself is bounded by the idle timeout.
pub async fn run_listener(listener: TcpListener, deps: ConnectionDeps, limiter: ConnectionLimiter) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };

        let Some(guard) = limiter.try_acquire() else {
            warn!(
                "Connection rejected: at max capacity ({}/{})",
                limiter.active_count(),
                limiter.max_connections()
            );
            deps.metrics.connection_errors.inc();
            drop(stream);
            continue;
        };

        let deps = deps.clone();
        tokio::spawn(async move {
            let _guard = guard;

            match timeout(deps.idle_timeout, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    let metrics = deps.metrics.clone();
                    metrics.connections_total.inc();
                    metrics.connections_active.inc();
                    handle_connection(ws_stream, peer_addr, deps).await;
                    metrics.connections_active.dec();
                }
                Ok(Err(e)) => {
                    warn!("WebSocket handshake failed: {}", e);
                    deps.metrics.connection_errors.inc();
                }
                Err(_) => {
                    warn!("WebSocket handshake timeout (slowloris protection)");
                    deps.metrics.connection_errors.inc();
                }
            }
        });
    }
}

/// Handles one upgraded WebSocket connection from open to close.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    peer_addr: SocketAddr,
    deps: ConnectionDeps,
) {
    let ConnectionDeps {
        router,
        rate_limiter,
        metrics,
        max_message_size,
        idle_timeout,
        outbound_queue_capacity,
    } = deps;
    // Random label for log lines; display names and keys stay out of info logs.
    let session = &uuid::Uuid::new_v4().to_string()[..8];
    let remote: IpAddr = peer_addr.ip();

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(outbound_queue_capacity);
    let id = ConnectionId::next();

    router.connection_opened(ConnectionHandle::new(id, outbound_tx));
    info!("[{}] Connection opened ({})", session, id);

    loop {
        tokio::select! {
            ws_msg = timeout(idle_timeout, read.next()) => {
                let msg = match ws_msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!("[{}] Disconnected", session);
                        break;
                    }
                    Err(_) => {
                        warn!("[{}] Idle timeout", session);
                        break;
                    }
                };

                match msg {
                    Ok(Message::Text(text)) => {
                        metrics.messages_received.inc();

                        if text.len() > max_message_size {
                            warn!("[{}] Message too large: {} bytes", session, text.len());
                            metrics.rate_limited.inc();
                            continue;
                        }

                        if !rate_limiter.consume(remote) {
                            warn!("[{}] Rate limited", session);
                            metrics.rate_limited.inc();
                            continue;
                        }

                        let outcome = router.route(id, &text);
                        debug!("[{}] {:?}", session, outcome);
                        metrics.record(&outcome);
                    }
                    Ok(Message::Binary(_)) => {
                        debug!("[{}] Ignoring binary frame", session);
                    }
                    Ok(Message::Ping(data)) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("[{}] Client sent close", session);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("[{}] Connection error: {}", session, e);
                        break;
                    }
                }
            }
            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(frame.text.to_string())).await {
                    warn!("[{}] Failed to send frame: {}", session, e);
                    break;
                }
                metrics.frames_delivered.inc();
            }
        }
    }

    router.connection_closed(id);
    info!("[{}] Connection closed", session);
}
