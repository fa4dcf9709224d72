// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for relay integration tests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use hush_relay::connection_limit::ConnectionLimiter;
use hush_relay::connection_registry::ConnectionRegistry;
use hush_relay::handler::{self, ConnectionDeps};
use hush_relay::metrics::RelayMetrics;
use hush_relay::rate_limit::RateLimiter;
use hush_relay::router::{MessageRouter, DEFAULT_GENERAL_ROOM};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Knobs for a test relay instance.
#[allow(dead_code)]
pub struct TestRelay {
    pub url: String,
    pub registry: Arc<ConnectionRegistry>,
    pub metrics: RelayMetrics,
}

#[allow(dead_code)]
pub struct TestRelayOptions {
    pub max_connections: usize,
    pub rate_limit_per_min: u32,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

impl Default for TestRelayOptions {
    fn default() -> Self {
        TestRelayOptions {
            max_connections: 100,
            rate_limit_per_min: 10_000,
            max_message_size: 64 * 1024,
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// Starts a relay on an ephemeral port that serves any number of connections.
#[allow(dead_code)]
pub async fn start_relay() -> TestRelay {
    start_relay_with(TestRelayOptions::default()).await
}

#[allow(dead_code)]
pub async fn start_relay_with(options: TestRelayOptions) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();

    let registry = Arc::new(ConnectionRegistry::new());
    let metrics = RelayMetrics::new().unwrap();
    let deps = ConnectionDeps {
        router: Arc::new(MessageRouter::new(registry.clone(), DEFAULT_GENERAL_ROOM)),
        rate_limiter: Arc::new(RateLimiter::new(options.rate_limit_per_min)),
        metrics: metrics.clone(),
        max_message_size: options.max_message_size,
        idle_timeout: options.idle_timeout,
        outbound_queue_capacity: 64,
    };
    let limiter = ConnectionLimiter::new(options.max_connections);

    tokio::spawn(handler::run_listener(listener, deps, limiter));

    TestRelay {
        url: format!("ws://127.0.0.1:{}", addr.port()),
        registry,
        metrics,
    }
}

/// Connects and consumes the initial `request_key` prompt.
#[allow(dead_code)]
pub async fn connect(url: &str) -> Client {
    let (mut ws, _) = connect_async(url).await.expect("Failed to connect");
    let prompt = recv(&mut ws).await;
    assert_eq!(prompt["type"], "request_key");
    ws
}

/// Connects, registers `public_key` and returns the client with its assigned name.
///
/// Consumes the `welcome` and `user_list` replies.
#[allow(dead_code)]
pub async fn connect_registered(url: &str, public_key: &str) -> (Client, String) {
    let mut ws = connect(url).await;
    send(
        &mut ws,
        &serde_json::json!({"type": "register_key", "publicKey": public_key}),
    )
    .await;
    let welcome = recv(&mut ws).await;
    assert_eq!(welcome["type"], "welcome");
    let name = welcome["username"].as_str().unwrap().to_string();
    let roster = recv(&mut ws).await;
    assert_eq!(roster["type"], "user_list");
    (ws, name)
}

#[allow(dead_code)]
pub async fn send(ws: &mut Client, frame: &Value) {
    send_text(ws, &frame.to_string()).await;
}

#[allow(dead_code)]
pub async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Receives the next text frame as JSON.
#[allow(dead_code)]
pub async fn recv(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected Text message, got {:?}", other),
        }
    }
}

/// Receives a text frame if one arrives within a short window.
#[allow(dead_code)]
pub async fn try_recv(ws: &mut Client) -> Option<Value> {
    match timeout(Duration::from_millis(200), ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => Some(serde_json::from_str(&text).unwrap()),
        _ => None,
    }
}

/// Polls until `check` holds or a second has passed.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
