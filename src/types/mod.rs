//! Core types for the tool gateway.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (RequestId, AgentKey)
//! - **Errors**: The error taxonomy with stable `kind` strings
//! - **Config**: Configuration structures for the server, stores and policies

mod config;
mod errors;
mod ids;

pub use config::{
    AggregatePolicy, CallLimits, Config, EmbeddingConfig, HistoryConfig, IdentityConfig,
    ObservabilityConfig, RegistryConfig, RetryConfig, ScopeConfig, ServerConfig, SourceKind,
    StoreConfig,
};
pub use errors::{AuthError, EmbeddingError, Error, Result, StoreError, ValidationError};
pub use ids::{AgentKey, RequestId};
