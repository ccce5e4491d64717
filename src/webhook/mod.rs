//! Push endpoint for platform webhook deliveries.
//!
//! Routes:
//! - `GET /webhook`: subscription verification handshake
//! - `POST /webhook`: signed event delivery, processed inline
//! - `GET /health`: liveness probe

pub mod signature;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::Orchestrator;

pub use signature::{SignatureError, SIGNATURE_HEADER};

pub const WEBHOOK_PATH: &str = "/webhook";
pub const SERVICE_NAME: &str = "pagebot";

/// Secrets for the push endpoint
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Token the platform echoes during the verification handshake
    pub verify_token: String,

    /// App secret for delivery signatures; `None` disables the check
    pub app_secret: Option<String>,
}

struct WebhookState {
    orchestrator: Orchestrator,
    config: WebhookConfig,
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Build the webhook router
pub fn router(orchestrator: Orchestrator, config: WebhookConfig) -> Router {
    if config.app_secret.is_none() {
        warn!("No app secret configured; webhook signatures will not be checked");
    }
    let state = Arc::new(WebhookState {
        orchestrator,
        config,
    });

    Router::new()
        .route(WEBHOOK_PATH, get(handle_verify).post(handle_delivery))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Serve `app` until `shutdown` resolves, letting in-flight requests finish
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .context("Failed to read webhook listener address")?;
    info!(%addr, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Webhook server exited unexpectedly")?;

    info!("Webhook server stopped");
    Ok(())
}

async fn handle_verify(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let expected = state.config.verify_token.as_str();
    let subscribed = query.mode.as_deref() == Some("subscribe")
        && !expected.is_empty()
        && query.verify_token.as_deref() == Some(expected);

    if subscribed {
        info!("Webhook verified");
        (StatusCode::OK, query.challenge.unwrap_or_default()).into_response()
    } else {
        warn!(mode = query.mode.as_deref().unwrap_or(""), "Webhook verification rejected");
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

async fn handle_delivery(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.config.app_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        if let Err(e) = signature::verify(&body, header, secret) {
            warn!(error = %e, "Rejected webhook delivery");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "invalid signature" })),
            )
                .into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Webhook body is not JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid json" })),
            )
                .into_response();
        }
    };

    match state.orchestrator.handle_webhook(&payload).await {
        Ok(stats) => {
            info!(summary = %stats.summary(), "Webhook delivery handled");
            (StatusCode::OK, Json(json!({ "status": "accepted" }))).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Webhook payload rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed payload" })),
            )
                .into_response()
        }
    }
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
