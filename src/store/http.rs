//! HTTP data API client for the document store.
//!
//! Every operation is a `POST {base_url}/action/{name}` with a JSON body
//! naming the database and collection. Failures are classified here:
//! 408, 429, 5xx, timeouts and connection errors are transient; everything
//! else is fatal.

use super::{DocumentStore, Namespace};
use crate::types::{StoreConfig, StoreError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::fmt;

/// Longest response body excerpt carried in an error message.
const BODY_EXCERPT: usize = 200;

/// Document store reached over its HTTP data API.
#[derive(Clone)]
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    data_source: Option<String>,
}

impl fmt::Debug for HttpDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDocumentStore")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("data_source", &self.data_source)
            .finish()
    }
}

impl HttpDocumentStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::fatal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            data_source: config.data_source.clone(),
        })
    }

    fn envelope(&self, ns: &Namespace) -> Map<String, Value> {
        let mut body = Map::new();
        if let Some(source) = &self.data_source {
            body.insert("dataSource".to_string(), json!(source));
        }
        body.insert("database".to_string(), json!(ns.database));
        body.insert("collection".to_string(), json!(ns.collection));
        body
    }

    async fn action(&self, action: &str, body: Map<String, Value>) -> Result<Value, StoreError> {
        let url = format!("{}/action/{}", self.base_url, action);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(action, status, &text));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| StoreError::fatal(format!("{}: undecodable response: {}", action, e)))
    }
}

fn classify_transport(err: reqwest::Error) -> StoreError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        StoreError::transient(err.to_string())
    } else {
        StoreError::fatal(err.to_string())
    }
}

fn classify_status(action: &str, status: StatusCode, body: &str) -> StoreError {
    let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
    let message = format!("{} returned {}: {}", action, status.as_u16(), excerpt);
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        StoreError::transient(message)
    } else {
        StoreError::fatal(message)
    }
}

fn take_array(mut response: Value, field: &str, action: &str) -> Result<Vec<Value>, StoreError> {
    match response.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(StoreError::fatal(format!(
            "{}: response lacks '{}' array",
            action, field
        ))),
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn aggregate(&self, ns: &Namespace, pipeline: &[Value]) -> Result<Vec<Value>, StoreError> {
        let mut body = self.envelope(ns);
        body.insert("pipeline".to_string(), Value::Array(pipeline.to_vec()));
        let response = self.action("aggregate", body).await?;
        take_array(response, "documents", "aggregate")
    }

    async fn distinct(
        &self,
        ns: &Namespace,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut body = self.envelope(ns);
        body.insert("key".to_string(), json!(field));
        body.insert("filter".to_string(), filter.clone());
        let response = self.action("distinct", body).await?;
        take_array(response, "values", "distinct")
    }

    async fn collection_stats(&self, ns: &Namespace) -> Result<Value, StoreError> {
        let mut response = self.action("collStats", self.envelope(ns)).await?;
        match response.get_mut("stats").map(Value::take) {
            Some(stats @ Value::Object(_)) => Ok(stats),
            _ => Err(StoreError::fatal("collStats: response lacks 'stats' object")),
        }
    }

    async fn insert_one(&self, ns: &Namespace, document: &Value) -> Result<(), StoreError> {
        let mut body = self.envelope(ns);
        body.insert("document".to_string(), document.clone());
        self.action("insertOne", body).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Captured {
        calls: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
    }

    async fn handler(
        State(captured): State<Captured>,
        Path(action): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let key = headers
            .get("api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        captured
            .calls
            .lock()
            .unwrap()
            .push((action.clone(), key, body.clone()));

        match (action.as_str(), body["collection"].as_str()) {
            (_, Some("throttled")) => (StatusCode::TOO_MANY_REQUESTS, Json(json!({}))),
            (_, Some("forbidden")) => (
                StatusCode::FORBIDDEN,
                Json(json!({"error": "no access"})),
            ),
            ("aggregate", _) => (
                StatusCode::OK,
                Json(json!({"documents": [{"name": "Loft"}, {"name": "Cabin"}]})),
            ),
            ("distinct", _) => (StatusCode::OK, Json(json!({"values": ["Apartment", "House"]}))),
            ("collStats", _) => (StatusCode::OK, Json(json!({"stats": {"count": 5555}}))),
            ("insertOne", _) => (StatusCode::OK, Json(json!({"insertedId": "abc"}))),
            _ => (StatusCode::NOT_FOUND, Json(json!({}))),
        }
    }

    async fn spawn_stub() -> (HttpDocumentStore, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route("/action/{action}", post(handler))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let store = HttpDocumentStore::new(&StoreConfig {
            base_url: format!("http://{}/", addr),
            api_key: Some("store-key".to_string()),
            data_source: Some("Cluster0".to_string()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        (store, captured)
    }

    fn ns(collection: &str) -> Namespace {
        Namespace::new("sample_airbnb", collection)
    }

    #[tokio::test]
    async fn test_aggregate_sends_envelope_and_key() {
        let (store, captured) = spawn_stub().await;
        let docs = store
            .aggregate(&ns("listingsAndReviews"), &[json!({"$limit": 2})])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);

        let calls = captured.calls.lock().unwrap();
        let (action, key, body) = &calls[0];
        assert_eq!(action, "aggregate");
        assert_eq!(key.as_deref(), Some("store-key"));
        assert_eq!(body["dataSource"], "Cluster0");
        assert_eq!(body["database"], "sample_airbnb");
        assert_eq!(body["pipeline"][0]["$limit"], 2);
    }

    #[tokio::test]
    async fn test_distinct_and_stats() {
        let (store, _) = spawn_stub().await;
        let values = store
            .distinct(&ns("listingsAndReviews"), "property_type", &json!({}))
            .await
            .unwrap();
        assert_eq!(values, vec![json!("Apartment"), json!("House")]);

        let stats = store.collection_stats(&ns("listingsAndReviews")).await.unwrap();
        assert_eq!(stats["count"], 5555);

        store
            .insert_one(&ns("call_history"), &json!({"tool": "AirbnbSearch"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_throttling_is_transient() {
        let (store, _) = spawn_stub().await;
        let err = store.aggregate(&ns("throttled"), &[]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_permission_denial_is_fatal() {
        let (store, _) = spawn_stub().await;
        let err = store.aggregate(&ns("forbidden"), &[]).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_transient() {
        let store = HttpDocumentStore::new(&StoreConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();
        let err = store.collection_stats(&ns("x")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let store = HttpDocumentStore::new(&StoreConfig {
            api_key: Some("super-secret".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert!(!format!("{:?}", store).contains("super-secret"));
    }
}
