//! Config registry.
//!
//! Holds the active tool configuration as an immutable snapshot. Callers
//! capture an `Arc<RegistrySnapshot>` at the start of a request and keep
//! using it even if a reload swaps in a newer one meanwhile. A failed
//! reload leaves the previous snapshot in place.

mod source;

pub use source::{ConfigSource, FileConfigSource, StoreConfigSource};

use crate::tools::{ModuleInfo, OperationKind, ToolConfig, ToolSpec};
use crate::types::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

const AUDIT: &str = "tool_gateway::audit";

/// One loaded configuration.
#[derive(Debug)]
pub struct RegistrySnapshot {
    pub config: ToolConfig,
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
}

/// A resolved `tool.operation`.
#[derive(Debug, Clone, Copy)]
pub struct ToolTarget<'a> {
    pub module: &'a ModuleInfo,
    pub operation: &'a str,
    pub spec: &'a ToolSpec,
    pub kind: OperationKind,
}

impl RegistrySnapshot {
    pub fn resolve<'a>(&'a self, tool: &str, operation: &'a str) -> Result<ToolTarget<'a>> {
        let not_found = || Error::tool_not_found(format!("{}.{}", tool, operation));
        if tool != self.config.name {
            return Err(not_found());
        }
        let spec = self.config.get(operation).ok_or_else(not_found)?;
        // Checked at load time; a miss here means the snapshot was built by hand.
        let kind = spec.resolved_kind(operation).ok_or_else(not_found)?;
        Ok(ToolTarget {
            module: &self.config.module_info,
            operation,
            spec,
            kind,
        })
    }

    /// `tool.operation` keys of every configured operation.
    pub fn operation_keys(&self) -> Vec<String> {
        self.config
            .tools
            .keys()
            .map(|op| format!("{}.{}", self.config.name, op))
            .collect()
    }

    /// Introspection view. Contains no secret material.
    pub fn describe(&self) -> Value {
        let tools: Vec<Value> = self
            .config
            .tools
            .iter()
            .map(|(operation, spec)| {
                json!({
                    "operation": operation,
                    "kind": spec.resolved_kind(operation),
                    "description": spec.description,
                    "parameters": spec.parameters,
                    "required": spec.required,
                    "returns_description": spec.returns_description,
                })
            })
            .collect();

        json!({
            "name": self.config.name,
            "generation": self.generation,
            "loaded_at": self.loaded_at.to_rfc3339(),
            "module_info": self.config.module_info,
            "tools": tools,
            "prompts": self.config.prompts,
        })
    }
}

/// Loads, caches and reloads the selected configuration.
pub struct ConfigRegistry {
    source: Arc<dyn ConfigSource>,
    selector: String,
    active: RwLock<Arc<RegistrySnapshot>>,
    generation: AtomicU64,
}

impl fmt::Debug for ConfigRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRegistry")
            .field("source", &self.source.location())
            .field("selector", &self.selector)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConfigRegistry {
    /// Load `selector` and start serving it. Fails if it cannot be loaded.
    pub async fn start(source: Arc<dyn ConfigSource>, selector: impl Into<String>) -> Result<Self> {
        let selector = selector.into();
        let config = load_from(source.as_ref(), &selector).await.map_err(|e| {
            tracing::error!(
                target: AUDIT,
                selector = %selector,
                source = %source.location(),
                error = %e,
                "initial configuration load failed"
            );
            e
        })?;
        let snapshot = Arc::new(RegistrySnapshot {
            config,
            generation: 1,
            loaded_at: Utc::now(),
        });
        tracing::info!(
            target: AUDIT,
            selector = %selector,
            source = %source.location(),
            generation = 1,
            operations = snapshot.config.tools.len(),
            "configuration loaded"
        );
        Ok(Self {
            source,
            selector,
            active: RwLock::new(snapshot),
            generation: AtomicU64::new(1),
        })
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Fetch a configuration by name without activating it.
    pub async fn load(&self, name: &str) -> Result<ToolConfig> {
        load_from(self.source.as_ref(), name).await
    }

    /// The last successfully loaded snapshot.
    pub async fn current(&self) -> Arc<RegistrySnapshot> {
        self.active.read().await.clone()
    }

    /// Reload the selected configuration and swap it in.
    pub async fn reload(&self) -> Result<Arc<RegistrySnapshot>> {
        let config = match self.load(&self.selector).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    target: AUDIT,
                    selector = %self.selector,
                    error = %e,
                    kind = e.kind(),
                    "reload failed; keeping previous configuration"
                );
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(RegistrySnapshot {
            config,
            generation,
            loaded_at: Utc::now(),
        });

        let active = {
            let mut active = self.active.write().await;
            // A slower concurrent reload must not replace a newer snapshot.
            if active.generation < generation {
                *active = snapshot;
            }
            active.clone()
        };

        tracing::info!(
            target: AUDIT,
            selector = %self.selector,
            generation = active.generation,
            operations = active.config.tools.len(),
            "configuration reloaded"
        );
        Ok(active)
    }
}

async fn load_from(source: &dyn ConfigSource, name: &str) -> Result<ToolConfig> {
    let config = source.fetch(name).await?;
    if config.name != name {
        return Err(Error::config_invalid(format!(
            "requested '{}' but the document is named '{}'",
            name, config.name
        )));
    }
    if !config.active {
        return Err(Error::config_not_found(format!(
            "configuration '{}' is inactive",
            name
        )));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDocumentStore, Namespace};
    use crate::test_support::airbnb_document;
    use crate::types::StoreError;

    fn ns() -> Namespace {
        Namespace::new("gateway", "tool_configs")
    }

    async fn registry() -> (ConfigRegistry, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        store.seed(&ns(), airbnb_document());
        let source = Arc::new(StoreConfigSource::new(store.clone(), ns()));
        (
            ConfigRegistry::start(source, "AirbnbSearch").await.unwrap(),
            store,
        )
    }

    #[tokio::test]
    async fn test_start_requires_config() {
        let store = Arc::new(MemoryDocumentStore::new());
        let source = Arc::new(StoreConfigSource::new(store, ns()));
        let err = ConfigRegistry::start(source, "AirbnbSearch")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config_not_found");
    }

    #[tokio::test]
    async fn test_inactive_config_not_found() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut doc = airbnb_document();
        doc["active"] = json!(false);
        store.seed(&ns(), doc);
        let source = Arc::new(StoreConfigSource::new(store, ns()));
        let err = ConfigRegistry::start(source, "AirbnbSearch")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config_not_found");
    }

    #[tokio::test]
    async fn test_resolve() {
        let (registry, _) = registry().await;
        let snapshot = registry.current().await;
        let target = snapshot.resolve("AirbnbSearch", "vector_search").unwrap();
        assert_eq!(target.kind, OperationKind::VectorSearch);
        assert_eq!(target.module.collection, "listingsAndReviews");

        assert_eq!(
            snapshot
                .resolve("AirbnbSearch", "drop_everything")
                .unwrap_err()
                .kind(),
            "tool_not_found"
        );
        assert_eq!(
            snapshot.resolve("Other", "vector_search").unwrap_err().kind(),
            "tool_not_found"
        );
    }

    #[tokio::test]
    async fn test_reload_swaps_atomically() {
        let (registry, store) = registry().await;
        let held = registry.current().await;
        assert_eq!(held.generation, 1);

        let mut updated = airbnb_document();
        updated["tools"]["get_collection_info"] = json!({
            "description": "Collection statistics",
            "parameters": {}
        });
        store.replace_where(&ns(), "name", &json!("AirbnbSearch"), updated);

        let fresh = registry.reload().await.unwrap();
        assert_eq!(fresh.generation, 2);
        assert!(fresh.config.get("get_collection_info").is_some());

        // The snapshot captured earlier is untouched.
        assert_eq!(held.generation, 1);
        assert!(held.config.get("get_collection_info").is_none());
        assert_eq!(registry.current().await.generation, 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous() {
        let (registry, store) = registry().await;
        store.fail_next(StoreError::transient("unreachable"));
        assert!(registry.reload().await.is_err());
        let current = registry.current().await;
        assert_eq!(current.generation, 1);
        assert_eq!(current.config.tools.len(), 2);

        let mut broken = airbnb_document();
        broken["tools"]["vector_search"]["required"] = json!(["nope"]);
        store.replace_where(&ns(), "name", &json!("AirbnbSearch"), broken);
        assert_eq!(
            registry.reload().await.unwrap_err().kind(),
            "config_invalid"
        );
        assert_eq!(registry.current().await.generation, 1);
    }

    #[tokio::test]
    async fn test_describe_shape() {
        let (registry, _) = registry().await;
        let view = registry.current().await.describe();
        assert_eq!(view["name"], "AirbnbSearch");
        assert_eq!(view["generation"], 1);
        assert_eq!(view["tools"][1]["operation"], "vector_search");
        assert_eq!(view["tools"][1]["kind"], "vector_search");
        assert_eq!(view["tools"][1]["required"][0], "query_text");
    }

    #[tokio::test]
    async fn test_operation_keys() {
        let (registry, _) = registry().await;
        assert_eq!(
            registry.current().await.operation_keys(),
            vec![
                "AirbnbSearch.get_unique_values".to_string(),
                "AirbnbSearch.vector_search".to_string()
            ]
        );
    }
}
