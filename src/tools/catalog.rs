//! Tool configuration documents — typed metadata, structural and semantic checks.
//!
//! A configuration document supplies *data* (names, descriptions, parameter
//! constraints, index names, projections). The set of operations it can
//! parameterize is closed: every tool entry resolves to one [`OperationKind`].

use crate::tools::validate::{check_constraints, coerce};
use crate::types::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

// =============================================================================
// Operation variants
// =============================================================================

/// The closed set of compiled operation variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    VectorSearch,
    TextSearch,
    AggregateQuery,
    GetUniqueValues,
    GetCollectionInfo,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::VectorSearch,
        OperationKind::TextSearch,
        OperationKind::AggregateQuery,
        OperationKind::GetUniqueValues,
        OperationKind::GetCollectionInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::VectorSearch => "vector_search",
            OperationKind::TextSearch => "text_search",
            OperationKind::AggregateQuery => "aggregate_query",
            OperationKind::GetUniqueValues => "get_unique_values",
            OperationKind::GetCollectionInfo => "get_collection_info",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Parameter types
// =============================================================================

/// Declared parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    List,
    Object,
}

impl ParamType {
    /// Human-readable type name for prompt generation.
    pub fn display_name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "integer",
            ParamType::Float => "number",
            ParamType::Bool => "boolean",
            ParamType::List => "list",
            ParamType::Object => "object",
        }
    }
}

/// Inclusive numeric/size bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Constraints {
    pub fn admits(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    /// Render the allowed range for error messages, e.g. `between 1 and 50`.
    pub fn describe(&self) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("between {} and {}", min, max),
            (Some(min), None) => format!("at least {}", min),
            (None, Some(max)) => format!("at most {}", max),
            (None, None) => "any".to_string(),
        }
    }
}

/// A single parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// Tool spec
// =============================================================================

/// One callable operation declared by a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolSpec {
    pub description: String,

    /// Explicit variant; when absent the operation name must name a variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OperationKind>,

    #[serde(default)]
    pub required: BTreeSet<String>,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,

    /// Search index name (vector or text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Field holding embedding vectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_path: Option<String>,

    /// Field mask applied to results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<BTreeMap<String, Value>>,

    /// Extra scopes required on top of the variant's default.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,

    #[serde(default)]
    pub returns_description: String,
}

impl ToolSpec {
    /// Variant this operation compiles to.
    pub fn resolved_kind(&self, operation: &str) -> Option<OperationKind> {
        self.kind.or_else(|| OperationKind::parse(operation))
    }

    /// Generate a prompt line for this operation.
    ///
    /// Format: `- tool.operation(param1: type, param2?: type): description`
    pub fn to_prompt_line(&self, tool: &str, operation: &str) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(name, p)| {
                let optional = if self.required.contains(name) { "" } else { "?" };
                format!("{}{}: {}", name, optional, p.param_type.display_name())
            })
            .collect();

        format!(
            "- {}.{}({}): {}",
            tool,
            operation,
            params.join(", "),
            self.description
        )
    }
}

// =============================================================================
// Tool configuration document
// =============================================================================

/// Target database/collection of a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleInfo {
    pub database: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

fn default_active() -> bool {
    true
}

/// A named tool configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolConfig {
    pub name: String,
    pub module_info: ModuleInfo,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSpec>,
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl ToolConfig {
    /// JSON Schema of the configuration document.
    pub fn json_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(ToolConfig)).unwrap_or(Value::Null)
    }

    /// Parse a raw document: schema check, deserialize, semantic check.
    pub fn from_document(raw: Value) -> Result<Self> {
        check_against_schema(&raw)?;
        let config: ToolConfig = serde_json::from_value(raw)
            .map_err(|e| Error::config_invalid(format!("document does not deserialize: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Semantic checks the schema cannot express.
    pub fn check(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config_invalid("configuration name cannot be empty"));
        }
        if self.module_info.database.is_empty() || self.module_info.collection.is_empty() {
            return Err(Error::config_invalid(format!(
                "{}: module_info requires database and collection",
                self.name
            )));
        }

        for (operation, spec) in &self.tools {
            let ctx = format!("{}.{}", self.name, operation);

            let kind = spec.resolved_kind(operation).ok_or_else(|| {
                Error::config_invalid(format!(
                    "{}: operation does not name a known variant and declares no kind",
                    ctx
                ))
            })?;

            if let Some(name) = spec.required.iter().find(|r| !spec.parameters.contains_key(*r)) {
                return Err(Error::config_invalid(format!(
                    "{}: required parameter '{}' is not declared",
                    ctx, name
                )));
            }

            if kind == OperationKind::VectorSearch && spec.index.is_none() {
                return Err(Error::config_invalid(format!(
                    "{}: vector_search requires an index",
                    ctx
                )));
            }

            for (name, param) in &spec.parameters {
                if let Some(c) = &param.constraints {
                    if let (Some(min), Some(max)) = (c.min, c.max) {
                        if min > max {
                            return Err(Error::config_invalid(format!(
                                "{}: parameter '{}' has min {} above max {}",
                                ctx, name, min, max
                            )));
                        }
                    }
                }
                if let Some(default) = &param.default {
                    coerce(name, param.param_type, default)
                        .and_then(|v| check_constraints(name, param, &v))
                        .map_err(|e| {
                            Error::config_invalid(format!("{}: default rejected: {}", ctx, e))
                        })?;
                }
            }
        }
        Ok(())
    }

    /// Get an operation by name.
    pub fn get(&self, operation: &str) -> Option<&ToolSpec> {
        self.tools.get(operation)
    }

    /// List all operation names.
    pub fn list_operations(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Generate formatted prompt section for LLM consumption.
    pub fn generate_prompt(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }

        let mut lines = Vec::with_capacity(self.tools.len() + 1);
        lines.push("Available tools:".to_string());
        for (operation, spec) in &self.tools {
            lines.push(spec.to_prompt_line(&self.name, operation));
        }
        lines.join("\n")
    }
}

static DOCUMENT_VALIDATOR: OnceLock<std::result::Result<jsonschema::Validator, String>> =
    OnceLock::new();

fn check_against_schema(raw: &Value) -> Result<()> {
    let validator = DOCUMENT_VALIDATOR
        .get_or_init(|| {
            jsonschema::validator_for(&ToolConfig::json_schema()).map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| Error::internal(format!("configuration schema does not compile: {}", e)))?;

    let problems: Vec<String> = validator
        .iter_errors(raw)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::config_invalid(problems.join("; ")))
    }
}

// =============================================================================
// Tests
// =============================================================================
