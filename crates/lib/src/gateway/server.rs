//! Gateway HTTP server: maps routes onto [`GatewaySession`] operations.

use crate::config::Config;
use crate::error::GatewayError;
use crate::gateway::qr::{self, QR_IMAGE_SIZE};
use crate::session::{GatewaySession, PairingUpdate};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tower_http::catch_panic::CatchPanicLayer;

const SERVICE_NAME: &str = "gowa";

type Reply = (StatusCode, Json<Value>);

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub session: Arc<GatewaySession>,
}

impl GatewayState {
    pub fn new(config: Config, session: Arc<GatewaySession>) -> Self {
        Self {
            config: Arc::new(config),
            session,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    #[serde(default)]
    phone: String,
    #[serde(default)]
    message: String,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_http))
        .route("/qr", get(qr_http))
        .route("/status", get(status_http))
        .route("/send", post(send_http))
        .route("/logout", post(logout_http))
        .layer(CatchPanicLayer::custom(panic_reply))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Open the session, serve until SIGINT/SIGTERM, then close the session.
pub async fn run_gateway(config: Config) -> Result<()> {
    let session = GatewaySession::open(&config)
        .await
        .context("initializing gateway session")?;
    let session = Arc::new(session);
    if config.webhook_url.is_some() {
        log::warn!("webhook URL is configured but webhook delivery is not implemented; ignoring");
    }

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    let app = router(GatewayState::new(config, session.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited");
    session.close().await;
    served?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutting down gracefully");
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let res = next.run(req).await;
    log::info!(
        "{} {} {} {}ms",
        method,
        path,
        res.status().as_u16(),
        start.elapsed().as_millis()
    );
    res
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(json!({ "error": message.into() })))
}

/// A panicking handler answers 500 instead of dropping the connection.
fn panic_reply(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    log::error!("handler panicked: {}", detail);
    error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}

fn connected_reply() -> Reply {
    (StatusCode::OK, Json(json!({ "status": "connected" })))
}

/// GET /health
async fn health_http() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

/// GET /qr starts pairing (or re-auth) and returns the first pairing code as a QR image.
async fn qr_http(State(state): State<GatewayState>) -> Reply {
    if state.session.is_connected() {
        return error_reply(StatusCode::BAD_REQUEST, "Already connected");
    }

    let (tx, mut rx) = mpsc::channel(1);
    if let Err(e) = state.session.connect(tx).await {
        let status = match e {
            GatewayError::PairingInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        return error_reply(status, e.to_string());
    }

    let update = match tokio::time::timeout(state.config.session.qr_wait(), rx.recv()).await {
        Ok(update) => update,
        Err(_) => return error_reply(StatusCode::GATEWAY_TIMEOUT, "Timed out waiting for QR code"),
    };
    match update {
        Some(PairingUpdate::Code(code)) => match qr::encode_png_base64(&code, QR_IMAGE_SIZE) {
            Ok(image) => (
                StatusCode::OK,
                Json(json!({ "qr_code": code, "qr_image": image })),
            ),
            Err(e) => {
                log::warn!("QR encoding failed: {}", e);
                error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate QR code")
            }
        },
        Some(PairingUpdate::Paired) => connected_reply(),
        None if state.session.is_connected() || !state.session.identity().is_empty() => {
            connected_reply()
        }
        None => error_reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Pairing ended before a QR code was issued",
        ),
    }
}

/// GET /status
async fn status_http(State(state): State<GatewayState>) -> Json<Value> {
    let connected = state.session.is_connected();
    let jid = if connected {
        state.session.identity()
    } else {
        String::new()
    };
    Json(json!({ "connected": connected, "jid": jid }))
}

/// POST /send with `{ "phone", "message" }`.
async fn send_http(State(state): State<GatewayState>, body: Bytes) -> Reply {
    if !state.session.is_connected() {
        return error_reply(StatusCode::BAD_REQUEST, "Not connected");
    }
    let req: SendRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return error_reply(StatusCode::BAD_REQUEST, "Invalid request body"),
    };
    if req.phone.is_empty() || req.message.is_empty() {
        return error_reply(StatusCode::BAD_REQUEST, "Phone and message are required");
    }
    match state.session.send_message(&req.phone, &req.message).await {
        Ok(id) => (
            StatusCode::OK,
            Json(json!({ "status": "sent", "message_id": id })),
        ),
        Err(GatewayError::NotConnected) => error_reply(StatusCode::BAD_REQUEST, "Not connected"),
        Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// POST /logout
async fn logout_http(State(state): State<GatewayState>) -> Reply {
    if !state.session.is_connected() {
        return error_reply(StatusCode::BAD_REQUEST, "Not connected");
    }
    match state.session.logout().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "logged out" }))),
        Err(GatewayError::NotConnected) => error_reply(StatusCode::BAD_REQUEST, "Not connected"),
        Err(e) => error_reply(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
