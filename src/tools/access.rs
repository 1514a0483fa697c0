//! Scope policy — which capabilities an operation demands of the caller.
//!
//! Every variant carries a default scope set; a tool entry may add more.
//! Aggregation always demands the elevated aggregation scope, whatever the
//! configuration document says.

use crate::tools::catalog::{OperationKind, ToolSpec};
use crate::types::ScopeConfig;
use std::collections::BTreeSet;

/// Operation → required scopes.
#[derive(Debug, Clone, Default)]
pub struct ScopePolicy {
    config: ScopeConfig,
}

impl ScopePolicy {
    pub fn new(config: ScopeConfig) -> Self {
        Self { config }
    }

    /// Scopes a caller must hold to invoke `spec` as `kind`.
    pub fn required_for(&self, kind: OperationKind, spec: &ToolSpec) -> BTreeSet<String> {
        let mut required: BTreeSet<String> = match kind {
            OperationKind::VectorSearch => self.config.vector_search.iter().cloned().collect(),
            OperationKind::TextSearch => self.config.text_search.iter().cloned().collect(),
            OperationKind::GetUniqueValues => {
                self.config.get_unique_values.iter().cloned().collect()
            }
            OperationKind::GetCollectionInfo => {
                self.config.get_collection_info.iter().cloned().collect()
            }
            OperationKind::AggregateQuery => BTreeSet::new(),
        };
        if kind == OperationKind::AggregateQuery {
            required.insert(self.config.aggregate.clone());
        }
        required.extend(spec.scope.iter().cloned());
        required
    }

    /// Scope for configuration introspection.
    pub fn introspect(&self) -> BTreeSet<String> {
        BTreeSet::from([self.config.introspect.clone()])
    }

    /// Scope for forced reload.
    pub fn admin(&self) -> BTreeSet<String> {
        BTreeSet::from([self.config.admin.clone()])
    }
}

/// Scopes in `required` that `granted` lacks, sorted.
pub fn missing_scopes(required: &BTreeSet<String>, granted: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|r| !granted.iter().any(|g| g == *r))
        .cloned()
        .collect()
}
