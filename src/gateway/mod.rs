//! Axum-based HTTP gateway exposing the relay.
//!
//! Every relay operation is a JSON endpoint; see [`api`] for the handlers.
//! The router adds:
//! - permissive CORS (any origin, GET/POST, `Content-Type`)
//! - a request body size limit (`gateway.max_body_bytes`)
//! - a request timeout that outlasts the send-and-wait deadline
//! - JSON 404/405 bodies for unknown paths and wrong methods

pub mod api;

use crate::config::{Config, GatewayConfig};
use crate::relay::Broker;
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Extra time a request may live beyond the send-and-wait deadline, so the
/// relay's own 408 reaches the caller before the transport timeout does.
pub const REQUEST_TIMEOUT_GRACE_SECS: u64 = 5;

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
}

impl AppState {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }
}

/// True unless `host` is a loopback address.
pub fn is_public_bind(host: &str) -> bool {
    !matches!(
        host,
        "127.0.0.1" | "localhost" | "::1" | "[::1]" | "0:0:0:0:0:0:0:1"
    )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// Build the relay router with middleware.
pub fn build_router(state: AppState, gateway: &GatewayConfig) -> Router {
    let request_timeout =
        state.broker.options().response_timeout + Duration::from_secs(REQUEST_TIMEOUT_GRACE_SECS);

    Router::new()
        .route("/health", get(handle_health))
        .route("/send", post(api::handle_send))
        .route("/send-and-wait", post(api::handle_send_and_wait))
        .route("/receive", post(api::handle_receive))
        .route("/check", get(api::handle_check_query).post(api::handle_check))
        .route("/respond", post(api::handle_respond))
        .route("/status", get(api::handle_status))
        .fallback(handle_not_found)
        .method_not_allowed_fallback(handle_method_not_allowed)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(gateway.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(cors_layer())
}

/// Serve the relay on an already-bound listener until `shutdown` resolves.
pub async fn serve_on<F>(
    listener: tokio::net::TcpListener,
    broker: Broker,
    gateway: &GatewayConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(AppState::new(broker), gateway);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay gateway stopped with an error")?;
    Ok(())
}

/// Run the HTTP gateway until Ctrl+C.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "🛑 Refusing to bind to {host} — the relay has no authentication.\n\
             Fix: use --host 127.0.0.1 (default), or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let actual_port = listener.local_addr()?.port();
    let display_addr = format!("{host}:{actual_port}");

    let broker = Broker::with_options(config.relay.broker_options());
    let timeout_secs = broker.options().response_timeout.as_secs();

    println!("📨 Agent relay listening on http://{display_addr}");
    println!("  POST /send          — {{\"agent_id\", \"description\", \"content\", \"tags\"}}");
    println!("  POST /send-and-wait — same body; blocks up to {timeout_secs}s for /respond");
    println!("  POST /receive       — consume first match {{\"agent_id\", \"tags\", \"agent_ids\"}}");
    println!("  POST /check         — list matches without consuming (GET with ?tags=&agent_ids=)");
    println!("  POST /respond       — {{\"request_id\", \"responder_id\", \"response_content\"}}");
    println!("  GET  /status        — counters and uptime");
    println!("  GET  /health        — health check");
    if config.relay.max_messages > 0 {
        println!("  Retention: at most {} messages", config.relay.max_messages);
    }
    println!("  Press Ctrl+C to stop.\n");
    tracing::info!(
        addr = %display_addr,
        timeout_secs,
        max_messages = config.relay.max_messages,
        "relay gateway started"
    );

    serve_on(listener, broker, &config.gateway, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health — liveness probe
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Fallback for unknown paths
async fn handle_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"ok": false, "error": "Not found"})),
    )
}

/// Fallback for known paths called with the wrong method
async fn handle_method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({"ok": false, "error": "Method not allowed"})),
    )
}
