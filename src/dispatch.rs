//! Execution dispatcher.
//!
//! Runs compiled queries against the document store, retrying transient
//! failures with bounded exponential backoff, and keeps the per-operation
//! health metrics and call history.

use crate::history::{CallRecord, HistorySink};
use crate::pipeline::{BackingQuery, QueryBody};
use crate::store::DocumentStore;
use crate::tools::{HealthConfig, OperationHealthTracker, SystemHealthReport};
use crate::types::{RetryConfig, StoreError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Results of one call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub results: Vec<Value>,
    pub count: usize,
    pub timing_ms: f64,
}

pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    retry: RetryConfig,
    history: Option<Arc<dyn HistorySink>>,
    health: Mutex<OperationHealthTracker>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("retry", &self.retry)
            .field("history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        retry: RetryConfig,
        history: Option<Arc<dyn HistorySink>>,
        health: HealthConfig,
    ) -> Self {
        Self {
            store,
            retry,
            history,
            health: Mutex::new(OperationHealthTracker::new(health)),
        }
    }

    /// Run `query`, retrying transient failures, and bound the results.
    pub async fn execute(&self, query: &BackingQuery) -> Result<ResultSet, StoreError> {
        let started = Instant::now();
        let mut results = self.run_with_retry(query).await?;
        if let Some(limit) = query.result_limit {
            results.truncate(limit);
        }
        Ok(ResultSet {
            count: results.len(),
            results,
            timing_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn run_with_retry(&self, query: &BackingQuery) -> Result<Vec<Value>, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match self.run_once(query).await {
                Ok(results) => return Ok(results),
                Err(StoreError::Transient(message)) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        namespace = %query.namespace,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Transient(message)) => {
                    return Err(StoreError::fatal(format!(
                        "gave up after {} attempts: {}",
                        attempt + 1,
                        message
                    )))
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    async fn run_once(&self, query: &BackingQuery) -> Result<Vec<Value>, StoreError> {
        match &query.body {
            QueryBody::Aggregate { pipeline } => {
                self.store.aggregate(&query.namespace, pipeline).await
            }
            QueryBody::Distinct { field, filter } => {
                self.store.distinct(&query.namespace, field, filter).await
            }
            QueryBody::CollectionInfo => self
                .store
                .collection_stats(&query.namespace)
                .await
                .map(|stats| vec![stats]),
        }
    }

    /// Record one execution outcome for `operation` (`tool.operation`).
    pub fn observe(&self, operation: &str, failure: Option<&'static str>, latency_ms: f64) {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(operation, failure, latency_ms);
    }

    pub fn health_report(&self, configured: &[String]) -> SystemHealthReport {
        self.health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .system_report(configured)
    }

    /// Append to call history. Failures are logged, never returned.
    pub async fn record(&self, record: CallRecord) {
        let Some(history) = &self.history else {
            return;
        };
        if let Err(e) = history.append(&record).await {
            tracing::warn!(
                request_id = %record.request_id,
                tool = %record.tool,
                operation = %record.operation,
                error = %e,
                "call history not recorded"
            );
        }
    }
}
