//! Where configuration documents come from.

use crate::store::{DocumentStore, Namespace};
use crate::tools::ToolConfig;
use crate::types::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A source of named configuration documents.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch and check the document called `name`.
    async fn fetch(&self, name: &str) -> Result<ToolConfig>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;
}

/// Documents stored as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    dir: PathBuf,
}

impl FileConfigSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn fetch(&self, name: &str) -> Result<ToolConfig> {
        if !is_plain_name(name) {
            return Err(Error::config_not_found(format!(
                "'{}' is not a valid configuration name",
                name
            )));
        }
        let path = self.dir.join(format!("{}.json", name));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::config_not_found(format!(
                    "{} does not exist",
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let document: Value = serde_json::from_str(&raw).map_err(|e| {
            Error::config_invalid(format!("{}: not JSON: {}", path.display(), e))
        })?;
        ToolConfig::from_document(document)
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

/// Documents kept in a document store collection, matched on `name`.
pub struct StoreConfigSource {
    store: Arc<dyn DocumentStore>,
    namespace: Namespace,
}

impl fmt::Debug for StoreConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfigSource")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl StoreConfigSource {
    pub fn new(store: Arc<dyn DocumentStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl ConfigSource for StoreConfigSource {
    async fn fetch(&self, name: &str) -> Result<ToolConfig> {
        let pipeline = [json!({"$match": {"name": name}}), json!({"$limit": 2})];
        let mut documents = self.store.aggregate(&self.namespace, &pipeline).await?;
        match documents.len() {
            0 => Err(Error::config_not_found(format!(
                "no document named '{}' in {}",
                name, self.namespace
            ))),
            1 => {
                let mut document = documents.remove(0);
                if let Some(obj) = document.as_object_mut() {
                    obj.remove("_id");
                }
                ToolConfig::from_document(document)
            }
            _ => Err(Error::config_invalid(format!(
                "several documents named '{}' in {}",
                name, self.namespace
            ))),
        }
    }

    fn location(&self) -> String {
        format!("store:{}", self.namespace)
    }
}
