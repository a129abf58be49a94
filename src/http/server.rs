//! HTTP routes and listener.
//!
//! | Route           | Purpose                                              |
//! |-----------------|------------------------------------------------------|
//! | `GET /`         | Plain-text banner                                    |
//! | `GET /health`   | Liveness, independent of the child                   |
//! | `GET /ready`    | `200` when the child accepts requests, else `503`    |
//! | `POST /rpc`     | Forward one JSON message, return the correlated one  |
//! | `POST /restart` | Replace the child process                            |

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::Supervisor;
use crate::config::HttpConfig;
use crate::{AppError, Result};

/// Shared state of every route.
#[derive(Debug, Clone)]
pub struct HttpState {
    /// Supervisor of the child the routes talk to.
    pub supervisor: Supervisor,
}

/// Build the relay router.
#[must_use]
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/rpc", post(rpc))
        .route("/restart", post(restart))
        .with_state(state)
}

async fn banner() -> &'static str {
    "mcp-relay running"
}

/// Handler for `GET /health`: 200 OK with a plain-text body.
async fn health() -> &'static str {
    "ok"
}

async fn ready(State(state): State<HttpState>) -> Result<Json<Value>> {
    if state.supervisor.is_ready() {
        Ok(Json(json!({
            "ready": true,
            "pid": state.supervisor.pid(),
        })))
    } else {
        Err(AppError::NotReady("child process is not ready".into()))
    }
}

/// Handler for `POST /rpc`.
///
/// The body is parsed by hand so malformed JSON gets the structured
/// `invalid_request` error instead of axum's plain-text rejection.
async fn rpc(State(state): State<HttpState>, body: Bytes) -> Result<Json<Value>> {
    let message: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("body is not valid JSON: {e}")))?;

    match state.supervisor.submit(message).await {
        Ok(response) => {
            debug!(id = ?response.get("id"), "relayed child response");
            Ok(Json(response))
        }
        Err(err) => {
            warn!(code = err.code(), %err, "rpc request failed");
            Err(err)
        }
    }
}

async fn restart(State(state): State<HttpState>) -> Result<Json<Value>> {
    state.supervisor.restart().await?;
    Ok(Json(json!({
        "restarted": true,
        "pid": state.supervisor.pid(),
    })))
}

/// Bind the listener described by `config`.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound.
pub async fn bind(config: &HttpConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    TcpListener::bind(&addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {addr}: {err}")))
}

/// Serve the relay router on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails while running.
pub async fn serve_http(
    listener: TcpListener,
    state: HttpState,
    ct: CancellationToken,
) -> Result<()> {
    let bind: Option<SocketAddr> = listener.local_addr().ok();
    info!(?bind, "starting HTTP transport");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
        })
        .await
        .map_err(|err| AppError::Io(format!("HTTP server error: {err}")))?;

    info!("HTTP transport shut down");
    Ok(())
}
