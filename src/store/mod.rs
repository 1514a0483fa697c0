//! Backing document store.
//!
//! The gateway talks to the store through [`DocumentStore`]. The production
//! implementation speaks the store's HTTP data API ([`HttpDocumentStore`]);
//! [`MemoryDocumentStore`] serves tests and programs that assemble
//! `GatewayDeps` themselves.

mod http;
mod memory;

pub use http::HttpDocumentStore;
pub use memory::{MemoryDocumentStore, StoreCall};

use crate::types::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A database/collection pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Operations the gateway needs from a document store.
///
/// Implementations classify every failure as transient or fatal; the
/// dispatcher retries only the former.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run an aggregation pipeline and return the resulting documents.
    async fn aggregate(&self, ns: &Namespace, pipeline: &[Value]) -> Result<Vec<Value>, StoreError>;

    /// Distinct values of `field` among documents matching `filter`.
    async fn distinct(
        &self,
        ns: &Namespace,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, StoreError>;

    /// Collection statistics (document count, sizes, indexes).
    async fn collection_stats(&self, ns: &Namespace) -> Result<Value, StoreError>;

    /// Insert a single document.
    async fn insert_one(&self, ns: &Namespace, document: &Value) -> Result<(), StoreError>;
}
