//! Configuration structures.
//!
//! Configuration is loaded from an optional JSON file, then overridden by
//! `GATEWAY_*` environment variables.

use crate::tools::HealthConfig;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Which tool configuration is active and where it is read from.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Backing document store coordinates.
    #[serde(default)]
    pub store: StoreConfig,

    /// Agent identity source.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Call history sink.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Embedding provider.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Transient store failure retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-call limits.
    #[serde(default)]
    pub limits: CallLimits,

    /// Stage policy for caller-supplied aggregation pipelines.
    #[serde(default)]
    pub aggregate: AggregatePolicy,

    /// Scopes required per operation variant.
    #[serde(default)]
    pub scopes: ScopeConfig,

    /// Tool health thresholds.
    #[serde(default)]
    pub health: HealthConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load from an optional JSON file and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::config_invalid(format!("gateway config {}: {}", path.display(), e))
        })
    }

    /// Apply `GATEWAY_*` overrides from the given lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GATEWAY_CONFIG_SELECTOR") {
            self.registry.selector = v;
        }
        if let Some(v) = lookup("GATEWAY_CONFIG_DIR") {
            self.registry.source = SourceKind::File;
            self.registry.config_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GATEWAY_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = lookup("GATEWAY_STORE_URL") {
            self.store.base_url = v;
        }
        if let Some(v) = lookup("GATEWAY_STORE_API_KEY") {
            self.store.api_key = Some(v);
        }
        if let Some(v) = lookup("GATEWAY_IDENTITIES_FILE") {
            self.identity.source = SourceKind::File;
            self.identity.identities_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("GATEWAY_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup("GATEWAY_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("GATEWAY_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = lookup("GATEWAY_HISTORY_ENABLED") {
            self.history.enabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub listen_addr: String,

    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Where configuration documents and identities are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Store,
    File,
}

/// Tool configuration registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name of the tool configuration served by this instance.
    pub selector: String,

    pub source: SourceKind,

    /// Directory holding `<name>.json` documents (file source).
    pub config_dir: Option<PathBuf>,

    /// Database and collection holding configuration documents (store source).
    pub database: String,
    pub collection: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            selector: "AirbnbSearch".to_string(),
            source: SourceKind::Store,
            config_dir: None,
            database: "gateway".to_string(),
            collection: "tool_configs".to_string(),
        }
    }
}

/// Backing document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the store's HTTP data API.
    pub base_url: String,

    /// API key sent as the `api-key` header.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Optional data source (cluster) name forwarded with every action.
    pub data_source: Option<String>,

    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            api_key: None,
            data_source: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Agent identity source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub source: SourceKind,

    /// JSON array of identities (file source).
    pub identities_file: Option<PathBuf>,

    pub database: String,
    pub collection: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Store,
            identities_file: None,
            database: "gateway".to_string(),
            collection: "agents".to_string(),
        }
    }
}

/// Call history sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub database: String,
    pub collection: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: "gateway".to_string(),
            collection: "call_history".to_string(),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.voyageai.com/v1".to_string(),
            model: "voyage-2".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Bounded exponential backoff for transient store errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exp);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Per-call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallLimits {
    /// Deadline applied when the request does not carry `timeout_ms`.
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Upper bound on client-requested deadlines.
    #[serde(with = "humantime_serde")]
    pub max_timeout: Duration,
}

impl CallLimits {
    /// Resolve the deadline for a call, capping client-requested values.
    pub fn resolve_timeout(&self, requested_ms: Option<u64>) -> Duration {
        match requested_ms {
            Some(0) | None => self.default_timeout,
            Some(ms) => Duration::from_millis(ms).min(self.max_timeout),
        }
    }
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
            max_timeout: Duration::from_secs(60),
        }
    }
}

/// Stage policy for `aggregate_query` pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatePolicy {
    /// When set, only these stages are accepted.
    pub allowed_stages: Option<Vec<String>>,

    /// Stages always rejected.
    pub denied_stages: Vec<String>,
}

impl AggregatePolicy {
    pub fn permits(&self, stage: &str) -> bool {
        if self.denied_stages.iter().any(|s| s == stage) {
            return false;
        }
        match &self.allowed_stages {
            Some(allowed) => allowed.iter().any(|s| s == stage),
            None => true,
        }
    }
}

impl Default for AggregatePolicy {
    fn default() -> Self {
        Self {
            allowed_stages: None,
            denied_stages: vec!["$out".to_string(), "$merge".to_string()],
        }
    }
}

/// Scopes required per operation variant and admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub vector_search: Vec<String>,
    pub text_search: Vec<String>,
    pub get_unique_values: Vec<String>,
    pub get_collection_info: Vec<String>,

    /// Elevated scope required by every `aggregate_query` call.
    pub aggregate: String,

    /// Scope for configuration introspection.
    pub introspect: String,

    /// Scope for forced reload.
    pub admin: String,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            vector_search: vec!["vectorize".to_string()],
            text_search: vec!["search".to_string()],
            get_unique_values: vec!["tools:read".to_string()],
            get_collection_info: vec!["tools:read".to_string()],
            aggregate: "aggregate".to_string(),
            introspect: "tools:read".to_string(),
            admin: "admin".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
