//! # Tool Gateway - configuration-driven tools over a document store
//!
//! Turns declarative tool configuration documents into callable,
//! parameter-validated operations against a document store:
//! - Config registry with atomic, snapshot-preserving reload
//! - Parameter validation with coercion, defaults and reject-never-clamp constraints
//! - Per-agent token verification (the signing secret is looked up per caller)
//! - Pipeline compilation for vector search, text search, aggregation,
//!   distinct values and collection statistics
//! - Dispatch with bounded retries, result bounds, health metrics and call history
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────── Gateway ─────────────────────────┐
//!  POST /v1/invoke│  Registry ─► AuthVerifier ─► validate ─► PipelineBuilder  │
//!  ─────────────► │  snapshot     (identity       (ToolSpec)   (embedder)     │
//!                 │                store)                          │          │
//!                 │                               Dispatcher ◄─────┘          │
//!                 │                        (retry, health, history)           │
//!                 └──────────────────────────────┬───────────────────────────┘
//!                                                ▼
//!                                          DocumentStore
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod dispatch;
pub mod embed;
pub mod gateway;
pub mod history;
pub mod http;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod tools;
pub mod types;

pub mod observability;

#[cfg(test)]
pub(crate) mod test_support;

pub use gateway::{Gateway, GatewayDeps, InvocationRequest};
pub use types::{Config, Error, Result};
