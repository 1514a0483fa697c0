//! In-memory document store.
//!
//! Understands just enough of a pipeline to serve lookups (`$match` on
//! equality, `$limit`); search and projection stages pass documents through
//! unchanged. Every call is recorded, and failures or latency can be
//! injected. Used by tests and by programs embedding the gateway through
//! `GatewayDeps`.

use super::{DocumentStore, Namespace};
use crate::types::StoreError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One recorded store call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCall {
    pub operation: &'static str,
    pub namespace: Namespace,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<Namespace, Vec<Value>>,
    calls: Vec<StoreCall>,
    failures: VecDeque<StoreError>,
    latency: Option<Duration>,
}

/// Document store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a document without recording a call.
    pub fn seed(&self, ns: &Namespace, document: Value) {
        self.lock()
            .collections
            .entry(ns.clone())
            .or_default()
            .push(document);
    }

    /// Replace every document of `ns` matching `key == value`.
    pub fn replace_where(&self, ns: &Namespace, key: &str, value: &Value, document: Value) {
        let mut inner = self.lock();
        let docs = inner.collections.entry(ns.clone()).or_default();
        docs.retain(|d| d.get(key) != Some(value));
        docs.push(document);
    }

    /// Fail the next call with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().failures.push_back(error);
    }

    /// Delay every subsequent call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls against `ns` only.
    pub fn calls_for(&self, ns: &Namespace) -> Vec<StoreCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| &c.namespace == ns)
            .cloned()
            .collect()
    }

    pub fn documents(&self, ns: &Namespace) -> Vec<Value> {
        self.lock().collections.get(ns).cloned().unwrap_or_default()
    }

    async fn enter(
        &self,
        operation: &'static str,
        ns: &Namespace,
        payload: Value,
    ) -> Result<(), StoreError> {
        let (latency, failure) = {
            let mut inner = self.lock();
            inner.calls.push(StoreCall {
                operation,
                namespace: ns.clone(),
                payload,
            });
            (inner.latency, inner.failures.pop_front())
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Resolve a dot-separated path inside a document.
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |v, key| v.get(key))
}

fn matches(doc: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return true;
    };
    filter.iter().all(|(key, expected)| match key.as_str() {
        "$and" => expected
            .as_array()
            .is_some_and(|clauses| clauses.iter().all(|c| matches(doc, c))),
        path => lookup(doc, path) == Some(expected),
    })
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn aggregate(&self, ns: &Namespace, pipeline: &[Value]) -> Result<Vec<Value>, StoreError> {
        self.enter("aggregate", ns, Value::Array(pipeline.to_vec()))
            .await?;
        let mut docs = self.documents(ns);
        for stage in pipeline {
            if let Some(filter) = stage.get("$match") {
                docs.retain(|d| matches(d, filter));
            } else if let Some(limit) = stage.get("$limit").and_then(Value::as_u64) {
                docs.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }
        }
        Ok(docs)
    }

    async fn distinct(
        &self,
        ns: &Namespace,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        self.enter("distinct", ns, json!({"key": field, "filter": filter}))
            .await?;
        let mut values: Vec<Value> = Vec::new();
        for doc in self.documents(ns).iter().filter(|d| matches(d, filter)) {
            if let Some(v) = lookup(doc, field) {
                if !values.contains(v) {
                    values.push(v.clone());
                }
            }
        }
        Ok(values)
    }

    async fn collection_stats(&self, ns: &Namespace) -> Result<Value, StoreError> {
        self.enter("collStats", ns, Value::Null).await?;
        Ok(json!({
            "ns": ns.to_string(),
            "count": self.documents(ns).len(),
        }))
    }

    async fn insert_one(&self, ns: &Namespace, document: &Value) -> Result<(), StoreError> {
        self.enter("insertOne", ns, document.clone()).await?;
        self.seed(ns, document.clone());
        Ok(())
    }
}
