//! HTTP surface.
//!
//! | Route | Scope |
//! |---|---|
//! | `POST /v1/invoke` | per operation |
//! | `GET /v1/admin/config` | `tools:read` |
//! | `POST /v1/admin/reload` | `admin` |
//! | `GET /v1/admin/schema` | none |
//! | `GET /health` | none |

mod error;

pub use error::{status_for, ApiError, ApiErrorBody, ApiErrorResponse};

use crate::dispatch::ResultSet;
use crate::gateway::{Gateway, InvocationRequest};
use crate::types::{AuthError, Error, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Build the router over a shared gateway.
pub fn router(gateway: Arc<Gateway>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/invoke", post(invoke))
        .route("/v1/admin/config", get(admin_config))
        .route("/v1/admin/reload", post(admin_reload))
        .route("/v1/admin/schema", get(admin_schema))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Extract the bearer token. `Ok(None)` when no Authorization header is sent.
pub fn bearer_token(headers: &HeaderMap) -> std::result::Result<Option<&str>, AuthError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| AuthError::MalformedToken("authorization header is not ASCII".to_string()))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(Some(token.trim()))
        }
        _ => Err(AuthError::MalformedToken(
            "expected 'Bearer <token>'".to_string(),
        )),
    }
}

async fn invoke(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<ResultSet>, ApiError> {
    let token = bearer_token(&headers).map_err(Error::from)?;
    let request: InvocationRequest = serde_json::from_slice(&body)
        .map_err(|e| Error::bad_request(format!("invalid invocation body: {}", e)))?;
    Ok(Json(gateway.invoke(token, request).await?))
}

async fn admin_config(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> std::result::Result<Json<Value>, ApiError> {
    let token = bearer_token(&headers).map_err(Error::from)?;
    Ok(Json(gateway.describe(token).await?))
}

async fn admin_reload(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
) -> std::result::Result<Json<Value>, ApiError> {
    let token = bearer_token(&headers).map_err(Error::from)?;
    Ok(Json(gateway.reload(token).await?))
}

async fn admin_schema() -> Json<Value> {
    Json(Gateway::config_schema())
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(gateway.health().await)
}

/// HTTP server bound to an address, stopped through a cancellation token.
#[derive(Debug)]
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
}

impl HttpServer {
    pub async fn bind(
        addr: &str,
        gateway: Arc<Gateway>,
        max_body_bytes: usize,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            router: router(gateway, max_body_bytes),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "gateway listening");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(self.shutdown.cancelled_owned())
            .await?;
        tracing::info!("gateway stopped");
        Ok(())
    }
}
