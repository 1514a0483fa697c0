//! Error envelope and status mapping for HTTP responses.

use crate::types::{AuthError, Error};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// Error response body.
///
/// ```json
/// { "error": { "kind": "<kind>", "message": "<message>", "detail": { ... } } }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// A gateway error on its way out over HTTP.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::ConfigNotFound(_) | Error::ConfigInvalid(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::ToolNotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::Auth(AuthError::ForbiddenScope { .. }) => StatusCode::FORBIDDEN,
        Error::Auth(_) => StatusCode::UNAUTHORIZED,
        Error::Store(_) | Error::Embedding(_) => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "request failed");
        }
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                kind: self.0.kind(),
                message: self.0.public_message(),
                detail: self.0.detail(),
            },
        };
        (status, Json(body)).into_response()
    }
}
