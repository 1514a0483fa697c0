//! Call history.
//!
//! One [`CallRecord`] per executed call, appended to a sink. Writing history
//! is best-effort: a failed append is logged by the dispatcher and the call
//! result is returned regardless.

use crate::store::{DocumentStore, Namespace};
use crate::types::RequestId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Record of one executed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub request_id: RequestId,
    pub agent_name: String,
    pub tool: String,
    pub operation: String,
    /// SHA-256 of the validated parameters.
    pub params_digest: String,
    pub timing_ms: f64,
    /// `"ok"` or the error kind.
    pub outcome: String,
    pub recorded_at: DateTime<Utc>,
}

/// A history append failed. Never surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("history write failed: {0}")]
pub struct HistoryWriteError(pub String);

/// Append-only call history.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, record: &CallRecord) -> Result<(), HistoryWriteError>;
}

/// History kept in a document store collection.
pub struct StoreHistorySink {
    store: Arc<dyn DocumentStore>,
    namespace: Namespace,
}

impl fmt::Debug for StoreHistorySink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHistorySink")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl StoreHistorySink {
    pub fn new(store: Arc<dyn DocumentStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl HistorySink for StoreHistorySink {
    async fn append(&self, record: &CallRecord) -> Result<(), HistoryWriteError> {
        let document =
            serde_json::to_value(record).map_err(|e| HistoryWriteError(e.to_string()))?;
        self.store
            .insert_one(&self.namespace, &document)
            .await
            .map_err(|e| HistoryWriteError(e.to_string()))
    }
}

/// History kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryHistorySink {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryHistorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HistorySink for MemoryHistorySink {
    async fn append(&self, record: &CallRecord) -> Result<(), HistoryWriteError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
