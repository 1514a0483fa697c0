//! Tool infrastructure — configuration documents, parameter validation,
//! scope policy and health tracking.

pub mod access;
pub mod catalog;
pub mod health;
pub mod validate;

pub use access::ScopePolicy;
pub use catalog::{
    Constraints, ModuleInfo, OperationKind, ParamSpec, ParamType, ToolConfig, ToolSpec,
};
pub use health::{HealthConfig, HealthStatus, OperationHealthTracker, SystemHealthReport};
pub use validate::{validate, ValidatedParams};
