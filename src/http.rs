//! HTTP Server for Health and Metrics Endpoints

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::connection_registry::ConnectionRegistry;
use crate::metrics::RelayMetrics;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub metrics: RelayMetrics,
    pub metrics_token: Option<String>,
    pub registry: Arc<ConnectionRegistry>,
    pub started_at: Instant,
}

/// Rejects `/metrics` requests without the configured bearer token.
async fn metrics_auth_middleware(
    State(state): State<HttpState>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/metrics" {
        if let Some(ref expected_token) = state.metrics_token {
            let is_authorized = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
                .is_some_and(|token| token == expected_token);

            if !is_authorized {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    "Unauthorized",
                )
                    .into_response();
            }
        }
    }

    next.run(request).await
}

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/", get(root_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics_auth_middleware,
        ))
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "hush-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/metrics"]
    }))
}

async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "connected": state.registry.connected_count(),
        "registered": state.registry.registered_count(),
    }))
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    state
        .metrics
        .participants_registered
        .set(state.registry.registered_count() as i64);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
