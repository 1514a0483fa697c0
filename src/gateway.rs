//! The gateway: one call end to end.
//!
//! ```text
//! token, request ─► snapshot ─► auth ─► validate ─► build ─► execute ─► ResultSet
//!                     (held for the whole call)     └──── under deadline ────┘
//! ```

use crate::auth::{AuthVerifier, IdentityStore, StaticIdentityStore, StoreIdentityStore};
use crate::dispatch::{Dispatcher, ResultSet};
use crate::embed::{EmbeddingProvider, HttpEmbeddingProvider};
use crate::history::{CallRecord, HistorySink, StoreHistorySink};
use crate::pipeline::PipelineBuilder;
use crate::registry::{ConfigRegistry, ConfigSource, FileConfigSource, StoreConfigSource};
use crate::store::{DocumentStore, HttpDocumentStore, Namespace};
use crate::tools::{validate, ScopePolicy, SystemHealthReport, ToolConfig};
use crate::types::{AuthError, CallLimits, Config, Error, RequestId, Result, SourceKind};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Body of an invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub tool: String,
    pub operation: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Collaborators the gateway is assembled from.
pub struct GatewayDeps {
    pub store: Arc<dyn DocumentStore>,
    pub config_source: Arc<dyn ConfigSource>,
    pub identities: Arc<dyn IdentityStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub history: Option<Arc<dyn HistorySink>>,
}

impl fmt::Debug for GatewayDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayDeps")
            .field("config_source", &self.config_source.location())
            .field("history", &self.history.is_some())
            .finish_non_exhaustive()
    }
}

impl GatewayDeps {
    /// HTTP-backed collaborators described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = Arc::new(HttpDocumentStore::new(&config.store)?);

        let config_source: Arc<dyn ConfigSource> = match config.registry.source {
            SourceKind::Store => Arc::new(StoreConfigSource::new(
                store.clone(),
                Namespace::new(&config.registry.database, &config.registry.collection),
            )),
            SourceKind::File => {
                let dir = config.registry.config_dir.as_ref().ok_or_else(|| {
                    Error::config_invalid("registry.source is file but registry.config_dir is unset")
                })?;
                Arc::new(FileConfigSource::new(dir))
            }
        };

        let identities: Arc<dyn IdentityStore> = match config.identity.source {
            SourceKind::Store => Arc::new(StoreIdentityStore::new(
                store.clone(),
                Namespace::new(&config.identity.database, &config.identity.collection),
            )),
            SourceKind::File => {
                let path = config.identity.identities_file.as_ref().ok_or_else(|| {
                    Error::config_invalid(
                        "identity.source is file but identity.identities_file is unset",
                    )
                })?;
                Arc::new(StaticIdentityStore::from_file(path)?)
            }
        };

        let history: Option<Arc<dyn HistorySink>> = if config.history.enabled {
            Some(Arc::new(StoreHistorySink::new(
                store.clone(),
                Namespace::new(&config.history.database, &config.history.collection),
            )))
        } else {
            None
        };

        Ok(Self {
            store,
            config_source,
            identities,
            embedder: Arc::new(HttpEmbeddingProvider::new(&config.embedding)?),
            history,
        })
    }
}

/// Composes registry, verifier, validator, builder and dispatcher.
pub struct Gateway {
    registry: ConfigRegistry,
    verifier: AuthVerifier,
    scopes: ScopePolicy,
    builder: PipelineBuilder,
    dispatcher: Dispatcher,
    limits: CallLimits,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Load the selected configuration and assemble the gateway.
    pub async fn start(config: &Config, deps: GatewayDeps) -> Result<Self> {
        let registry =
            ConfigRegistry::start(deps.config_source, config.registry.selector.clone()).await?;
        Ok(Self {
            registry,
            verifier: AuthVerifier::new(deps.identities),
            scopes: ScopePolicy::new(config.scopes.clone()),
            builder: PipelineBuilder::new(deps.embedder, config.aggregate.clone()),
            dispatcher: Dispatcher::new(
                deps.store,
                config.retry.clone(),
                deps.history,
                config.health.clone(),
            ),
            limits: config.limits.clone(),
        })
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Invoke one operation on behalf of the token's agent.
    pub async fn invoke(&self, token: Option<&str>, request: InvocationRequest) -> Result<ResultSet> {
        let request_id = RequestId::new();
        let span = tracing::info_span!(
            "invoke",
            request_id = %request_id,
            tool = %request.tool,
            operation = %request.operation,
        );
        self.invoke_inner(request_id, token, request)
            .instrument(span)
            .await
    }

    async fn invoke_inner(
        &self,
        request_id: RequestId,
        token: Option<&str>,
        request: InvocationRequest,
    ) -> Result<ResultSet> {
        // Captured once; a concurrent reload does not affect this call.
        let snapshot = self.registry.current().await;
        let target = snapshot.resolve(&request.tool, &request.operation);
        let required = match &target {
            Ok(t) => self.scopes.required_for(t.kind, t.spec),
            Err(_) => BTreeSet::new(),
        };

        let token = token.ok_or(AuthError::MissingToken)?;
        let identity = self.verifier.authenticate(token, &required).await?;
        let target = target?;
        let params = validate(target.spec, &request.params)?;

        let operation_key = format!("{}.{}", request.tool, request.operation);
        let deadline = self.limits.resolve_timeout(request.timeout_ms);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(deadline, async {
            let query = self
                .builder
                .build(target.module, target.spec, target.kind, &params)
                .await?;
            tracing::debug!(namespace = %query.namespace, "query compiled");
            self.dispatcher.execute(&query).await.map_err(Error::from)
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "{} exceeded {}ms",
                operation_key,
                deadline.as_millis()
            ))),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let failure = outcome.as_ref().err().map(Error::kind);
        self.dispatcher.observe(&operation_key, failure, elapsed_ms);
        match &outcome {
            Ok(rs) => tracing::info!(
                agent = %identity.agent_name,
                count = rs.count,
                elapsed_ms,
                "call completed"
            ),
            Err(e) => tracing::warn!(
                agent = %identity.agent_name,
                kind = e.kind(),
                error = %e,
                elapsed_ms,
                "call failed"
            ),
        }

        self.dispatcher
            .record(CallRecord {
                request_id,
                agent_name: identity.agent_name.clone(),
                tool: request.tool.clone(),
                operation: request.operation.clone(),
                params_digest: params.digest(),
                timing_ms: elapsed_ms,
                outcome: failure.unwrap_or("ok").to_string(),
                recorded_at: Utc::now(),
            })
            .await;

        outcome
    }

    /// Introspection of the active configuration.
    pub async fn describe(&self, token: Option<&str>) -> Result<Value> {
        self.authorize(token, &self.scopes.introspect()).await?;
        Ok(self.registry.current().await.describe())
    }

    /// Force a reload and return the introspection of the resulting snapshot.
    pub async fn reload(&self, token: Option<&str>) -> Result<Value> {
        let identity = self.authorize(token, &self.scopes.admin()).await?;
        tracing::info!(
            target: "tool_gateway::audit",
            agent = %identity.agent_name,
            "reload requested"
        );
        Ok(self.registry.reload().await?.describe())
    }

    async fn authorize(
        &self,
        token: Option<&str>,
        required: &BTreeSet<String>,
    ) -> Result<crate::auth::AgentIdentity> {
        let token = token.ok_or(AuthError::MissingToken)?;
        self.verifier.authenticate(token, required).await
    }

    /// Health probe body.
    pub async fn health(&self) -> Value {
        let snapshot = self.registry.current().await;
        let report: SystemHealthReport = self
            .dispatcher
            .health_report(&snapshot.operation_keys());
        json!({
            "status": report.status,
            "config": snapshot.config.name,
            "generation": snapshot.generation,
            "tools": report,
        })
    }

    /// JSON Schema of configuration documents.
    pub fn config_schema() -> Value {
        ToolConfig::json_schema()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{mint, Claims};
    use crate::embed::MockEmbeddingProvider;
    use crate::history::MemoryHistorySink;
    use crate::store::MemoryDocumentStore;
    use crate::test_support::{airbnb_document, identity};
    use crate::types::StoreError;
    use std::time::Duration;

    struct Harness {
        gateway: Gateway,
        store: Arc<MemoryDocumentStore>,
        history: Arc<MemoryHistorySink>,
    }

    fn listings() -> Namespace {
        Namespace::new("sample_airbnb", "listingsAndReviews")
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryDocumentStore::new());
        store.seed(&Namespace::new("gateway", "tool_configs"), airbnb_document());
        for i in 0..15 {
            store.seed(&listings(), json!({"name": format!("listing {}", i), "property_type": "Apartment"}));
        }
        let history = Arc::new(MemoryHistorySink::new());
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1, 0.2, 0.3]));

        let deps = GatewayDeps {
            store: store.clone(),
            config_source: Arc::new(StoreConfigSource::new(
                store.clone(),
                Namespace::new("gateway", "tool_configs"),
            )),
            identities: Arc::new(StaticIdentityStore::new(vec![
                identity("k-search", "listing-bot", "s-search", &[]),
                identity("k-admin", "ops", "s-admin", &[]),
            ])),
            embedder: Arc::new(embedder),
            history: Some(history.clone()),
        };
        let gateway = Gateway::start(&Config::default(), deps).await.unwrap();
        Harness {
            gateway,
            store,
            history,
        }
    }

    fn token(key: &str, name: &str, secret: &str, scope: &[&str]) -> String {
        let now = Utc::now().timestamp();
        mint(
            key,
            &Claims {
                agent_name: name.to_string(),
                scope: scope.iter().map(|s| s.to_string()).collect(),
                iat: Some(now),
                exp: now + 300,
            },
            secret.as_bytes(),
        )
        .unwrap()
    }

    fn request(operation: &str, params: Value) -> InvocationRequest {
        InvocationRequest {
            tool: "AirbnbSearch".to_string(),
            operation: operation.to_string(),
            params,
            timeout_ms: None,
        }
    }

    fn listing_calls(store: &MemoryDocumentStore) -> usize {
        store.calls_for(&listings()).len()
    }

    #[tokio::test]
    async fn test_vector_search_succeeds_and_records_history() {
        let h = harness().await;
        let t = token("k-search", "listing-bot", "s-search", &["vectorize"]);
        let rs = h
            .gateway
            .invoke(Some(&t), request("vector_search", json!({"query_text": "bright loft"})))
            .await
            .unwrap();
        assert_eq!(rs.count, 10);

        let records = h.history.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, "ok");
        assert_eq!(records[0].agent_name, "listing-bot");
        assert_eq!(records[0].params_digest.len(), 64);
    }

    #[tokio::test]
    async fn test_missing_token() {
        let h = harness().await;
        let err = h
            .gateway
            .invoke(None, request("vector_search", json!({"query_text": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.detail().unwrap()["reason"], "missing_token");
    }

    #[tokio::test]
    async fn test_unknown_operation_after_auth() {
        let h = harness().await;
        let t = token("k-search", "listing-bot", "s-search", &[]);
        let err = h
            .gateway
            .invoke(Some(&t), request("drop_collection", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_not_found");

        // An unauthenticated caller learns nothing about the catalog.
        let err = h
            .gateway
            .invoke(Some("garbage"), request("drop_collection", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "auth_error");
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let h = harness().await;
        let t = token("k-search", "listing-bot", "s-search", &["vectorize"]);
        let err = h
            .gateway
            .invoke(Some(&t), request("vector_search", json!({"limit": 5})))
            .await
            .unwrap_err();
        assert_eq!(err.detail().unwrap()["reason"], "missing");
        assert_eq!(listing_calls(&h.store), 0);
        assert!(h.history.records().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_recorded_with_kind() {
        let h = harness().await;
        h.store.fail_next(StoreError::fatal("bad shape"));
        let t = token("k-search", "listing-bot", "s-search", &["tools:read"]);
        let err = h
            .gateway
            .invoke(Some(&t), request("get_unique_values", json!({"field": "property_type"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "backing_store_error");
        assert_eq!(h.history.records()[0].outcome, "backing_store_error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let h = harness().await;
        h.store.set_latency(Duration::from_secs(5));
        let t = token("k-search", "listing-bot", "s-search", &["tools:read"]);
        let mut req = request("get_unique_values", json!({"field": "property_type"}));
        req.timeout_ms = Some(50);
        let err = h.gateway.invoke(Some(&t), req).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_admin_scopes() {
        let h = harness().await;
        let reader = token("k-search", "listing-bot", "s-search", &["tools:read"]);
        let view = h.gateway.describe(Some(&reader)).await.unwrap();
        assert_eq!(view["name"], "AirbnbSearch");

        let err = h.gateway.reload(Some(&reader)).await.unwrap_err();
        assert_eq!(err.detail().unwrap()["reason"], "forbidden_scope");

        let admin = token("k-admin", "ops", "s-admin", &["admin"]);
        let view = h.gateway.reload(Some(&admin)).await.unwrap();
        assert_eq!(view["generation"], 2);
    }

    #[tokio::test]
    async fn test_health_lists_configured_operations() {
        let h = harness().await;
        let health = h.gateway.health().await;
        assert_eq!(health["config"], "AirbnbSearch");
        assert_eq!(health["generation"], 1);
        assert_eq!(health["tools"]["operations"].as_array().unwrap().len(), 2);
    }
}
