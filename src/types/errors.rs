//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Every
//! variant maps to a stable `kind` string so clients can branch on it; the
//! HTTP layer turns these into status codes and the `{error: {...}}` envelope.

use serde_json::{json, Value};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// The selected configuration does not exist or is inactive.
    #[error("configuration not found: {0}")]
    ConfigNotFound(String),

    /// The configuration document exists but is structurally or semantically invalid.
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    /// The requested tool/operation is not part of the active configuration.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Caller-supplied parameters failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Caller credentials failed verification.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Backing document store failures (after retries, if any).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Embedding provider failures.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// The call exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The request envelope itself could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigNotFound(_) => "config_not_found",
            Error::ConfigInvalid(_) => "config_invalid",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::Validation(_) => "validation_error",
            Error::Auth(_) => "auth_error",
            Error::Store(_) => "backing_store_error",
            Error::Embedding(_) => "embedding_error",
            Error::Timeout(_) => "timeout",
            Error::BadRequest(_) => "bad_request",
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => "internal",
        }
    }

    /// Structured detail for the error envelope, if the kind carries any.
    pub fn detail(&self) -> Option<Value> {
        match self {
            Error::Validation(e) => {
                let mut detail = json!({
                    "reason": e.reason(),
                    "param": e.param(),
                });
                if let ValidationError::OutOfRange { allowed, .. } = e {
                    detail["allowed"] = Value::String(allowed.clone());
                }
                Some(detail)
            }
            Error::Auth(e) => {
                let mut detail = json!({ "reason": e.reason() });
                if let AuthError::ForbiddenScope { missing } = e {
                    detail["missing_scope"] = json!(missing);
                }
                Some(detail)
            }
            Error::Store(e) => Some(json!({
                "class": if e.is_transient() { "transient" } else { "fatal" },
            })),
            _ => None,
        }
    }

    /// Message safe to return to clients.
    ///
    /// Failures whose text comes from the store, the embedding provider or a
    /// configuration source are summarised; the full text is only logged.
    pub fn public_message(&self) -> String {
        match self {
            Error::ConfigNotFound(_) | Error::ConfigInvalid(_) => {
                "configuration unavailable".to_string()
            }
            Error::Store(e) if e.is_transient() => "backing store unavailable".to_string(),
            Error::Store(_) => "backing store rejected the request".to_string(),
            Error::Embedding(_) => "embedding provider failed".to_string(),
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

// Convenience constructors
impl Error {
    pub fn config_not_found(msg: impl Into<String>) -> Self {
        Self::ConfigNotFound(msg.into())
    }

    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    pub fn tool_not_found(msg: impl Into<String>) -> Self {
        Self::ToolNotFound(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Parameter validation failures. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required parameter '{param}'")]
    Missing { param: String },

    #[error("parameter '{param}': {message}")]
    TypeMismatch { param: String, message: String },

    #[error("parameter '{param}' out of range: allowed {allowed}")]
    OutOfRange { param: String, allowed: String },

    #[error("unknown parameter '{param}'")]
    UnknownParam { param: String },
}

impl ValidationError {
    pub fn missing(param: impl Into<String>) -> Self {
        Self::Missing {
            param: param.into(),
        }
    }

    pub fn type_mismatch(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn out_of_range(param: impl Into<String>, allowed: impl Into<String>) -> Self {
        Self::OutOfRange {
            param: param.into(),
            allowed: allowed.into(),
        }
    }

    pub fn unknown_param(param: impl Into<String>) -> Self {
        Self::UnknownParam {
            param: param.into(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::Missing { .. } => "missing",
            ValidationError::TypeMismatch { .. } => "type_mismatch",
            ValidationError::OutOfRange { .. } => "out_of_range",
            ValidationError::UnknownParam { .. } => "unknown_param",
        }
    }

    pub fn param(&self) -> &str {
        match self {
            ValidationError::Missing { param }
            | ValidationError::TypeMismatch { param, .. }
            | ValidationError::OutOfRange { param, .. }
            | ValidationError::UnknownParam { param } => param,
        }
    }
}

/// Credential verification failures. Messages never include secret material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("unknown agent")]
    UnknownAgent,

    #[error("agent key resolves to {0} identities")]
    AmbiguousAgent(usize),

    #[error("token signature does not verify")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("token agent_name does not match the resolved identity")]
    IdentityMismatch,

    #[error("token scope lacks: {}", missing.join(", "))]
    ForbiddenScope { missing: Vec<String> },
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnknownAgent => "unknown_agent",
            AuthError::AmbiguousAgent(_) => "ambiguous_agent",
            AuthError::BadSignature => "bad_signature",
            AuthError::Expired => "expired",
            AuthError::IdentityMismatch => "identity_mismatch",
            AuthError::ForbiddenScope { .. } => "forbidden_scope",
        }
    }
}

/// Backing document store failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Timeouts, connection resets, throttling. Safe to retry.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Bad query shape, permission denial, exhausted retries.
    #[error("store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Embedding provider failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Request(String),

    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),
}
