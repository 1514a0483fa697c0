//! Pipeline builder.
//!
//! Compiles a validated operation into a [`BackingQuery`]. Each
//! [`OperationKind`] has exactly one compilation; bounds on result sizes are
//! enforced here so the dispatcher never runs an unbounded search.

mod filters;

pub use filters::{check_field_path, equality_filter};

use crate::embed::EmbeddingProvider;
use crate::store::Namespace;
use crate::tools::{ModuleInfo, OperationKind, ToolSpec, ValidatedParams};
use crate::types::{AggregatePolicy, Error, Result, ValidationError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Hard cap on vector search results.
pub const MAX_VECTOR_LIMIT: i64 = 50;
/// Hard cap on vector search candidates.
pub const MAX_NUM_CANDIDATES: i64 = 1000;
pub const DEFAULT_SEARCH_LIMIT: i64 = 10;
/// Hard cap on the trailing `$limit` of caller pipelines.
pub const MAX_AGGREGATE_LIMIT: i64 = 1000;

const DEFAULT_VECTOR_PATH: &str = "embedding";
const DEFAULT_TEXT_INDEX: &str = "default";

/// What the dispatcher runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryBody {
    Aggregate { pipeline: Vec<Value> },
    Distinct { field: String, filter: Value },
    CollectionInfo,
}

/// A compiled backing-store query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackingQuery {
    pub namespace: Namespace,
    pub body: QueryBody,
    /// Results beyond this bound are dropped.
    pub result_limit: Option<usize>,
}

/// Compiles operations into backing-store queries.
pub struct PipelineBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    aggregate: AggregatePolicy,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("aggregate", &self.aggregate)
            .finish_non_exhaustive()
    }
}

impl PipelineBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, aggregate: AggregatePolicy) -> Self {
        Self {
            embedder,
            aggregate,
        }
    }

    pub async fn build(
        &self,
        module: &ModuleInfo,
        spec: &ToolSpec,
        kind: OperationKind,
        params: &ValidatedParams,
    ) -> Result<BackingQuery> {
        let namespace = Namespace::new(&module.database, &module.collection);
        match kind {
            OperationKind::VectorSearch => self.vector_search(namespace, spec, params).await,
            OperationKind::TextSearch => text_search(namespace, spec, params),
            OperationKind::AggregateQuery => self.aggregate_query(namespace, params),
            OperationKind::GetUniqueValues => get_unique_values(namespace, params),
            OperationKind::GetCollectionInfo => Ok(BackingQuery {
                namespace,
                body: QueryBody::CollectionInfo,
                result_limit: None,
            }),
        }
    }

    async fn vector_search(
        &self,
        namespace: Namespace,
        spec: &ToolSpec,
        params: &ValidatedParams,
    ) -> Result<BackingQuery> {
        let index = spec.index.as_deref().ok_or_else(|| {
            Error::config_invalid(format!("{}: vector_search declares no index", namespace))
        })?;
        let query_text = query_text(params)?;

        let limit = params.i64("limit").unwrap_or(DEFAULT_SEARCH_LIMIT);
        if !(1..=MAX_VECTOR_LIMIT).contains(&limit) {
            return Err(ValidationError::out_of_range(
                "limit",
                format!("between 1 and {}", MAX_VECTOR_LIMIT),
            )
            .into());
        }
        let num_candidates = match params.i64("num_candidates") {
            Some(n) if (limit..=MAX_NUM_CANDIDATES).contains(&n) => n,
            Some(_) => {
                return Err(ValidationError::out_of_range(
                    "num_candidates",
                    format!("between {} and {}", limit, MAX_NUM_CANDIDATES),
                )
                .into())
            }
            None => (limit * 20).clamp(100, MAX_NUM_CANDIDATES),
        };
        let filter = equality_filter("filters", params.get("filters"))?;

        let vector = self.embedder.embed(query_text).await?;

        let mut stage = json!({
            "index": index,
            "path": spec.vector_path.as_deref().unwrap_or(DEFAULT_VECTOR_PATH),
            "queryVector": vector,
            "limit": limit,
            "numCandidates": num_candidates,
        });
        if let Some(filter) = filter {
            stage["filter"] = filter;
        }

        let mut pipeline = vec![
            json!({ "$vectorSearch": stage }),
            json!({ "$project": projection_with_score(spec, "vectorSearchScore") }),
            json!({ "$sort": { "score": -1 } }),
        ];
        if let Some(min_score) = params.f64("min_score") {
            pipeline.push(json!({ "$match": { "score": { "$gte": min_score } } }));
        }

        Ok(BackingQuery {
            namespace,
            body: QueryBody::Aggregate { pipeline },
            result_limit: Some(limit as usize),
        })
    }

    fn aggregate_query(
        &self,
        namespace: Namespace,
        params: &ValidatedParams,
    ) -> Result<BackingQuery> {
        let stages = params
            .list("pipeline")
            .ok_or_else(|| ValidationError::missing("pipeline"))?;
        if stages.is_empty() {
            return Err(ValidationError::out_of_range("pipeline", "at least one stage").into());
        }

        for (i, stage) in stages.iter().enumerate() {
            let operator = stage
                .as_object()
                .filter(|obj| obj.len() == 1)
                .and_then(|obj| obj.keys().next())
                .filter(|key| key.starts_with('$'))
                .ok_or_else(|| {
                    ValidationError::type_mismatch(
                        "pipeline",
                        format!("stage {} must be a single-operator document", i),
                    )
                })?;
            if !self.aggregate.permits(operator) {
                return Err(ValidationError::out_of_range(
                    "pipeline",
                    format!("{} ({} is not permitted)", self.describe_policy(), operator),
                )
                .into());
            }
        }

        let mut pipeline = stages.clone();
        let result_limit = match params.i64("limit") {
            Some(n) if (1..=MAX_AGGREGATE_LIMIT).contains(&n) => {
                pipeline.push(json!({ "$limit": n }));
                Some(n as usize)
            }
            Some(_) => {
                return Err(ValidationError::out_of_range(
                    "limit",
                    format!("between 1 and {}", MAX_AGGREGATE_LIMIT),
                )
                .into())
            }
            None => None,
        };

        Ok(BackingQuery {
            namespace,
            body: QueryBody::Aggregate { pipeline },
            result_limit,
        })
    }

    fn describe_policy(&self) -> String {
        match &self.aggregate.allowed_stages {
            Some(allowed) => format!("stages among {}", allowed.join(", ")),
            None => format!("any stage except {}", self.aggregate.denied_stages.join(", ")),
        }
    }
}

fn query_text(params: &ValidatedParams) -> Result<&str> {
    let text = params
        .str("query_text")
        .ok_or_else(|| ValidationError::missing("query_text"))?;
    if text.trim().is_empty() {
        return Err(ValidationError::out_of_range("query_text", "non-empty text").into());
    }
    Ok(text)
}

fn projection_with_score(spec: &ToolSpec, meta: &str) -> Value {
    let mut projection: Map<String, Value> = spec
        .projection
        .as_ref()
        .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    projection.insert("score".to_string(), json!({ "$meta": meta }));
    Value::Object(projection)
}

fn text_search(
    namespace: Namespace,
    spec: &ToolSpec,
    params: &ValidatedParams,
) -> Result<BackingQuery> {
    let query = query_text(params)?;
    let limit = params.i64("limit").unwrap_or(DEFAULT_SEARCH_LIMIT);
    if !(1..=MAX_VECTOR_LIMIT).contains(&limit) {
        return Err(ValidationError::out_of_range(
            "limit",
            format!("between 1 and {}", MAX_VECTOR_LIMIT),
        )
        .into());
    }

    let pipeline = vec![
        json!({ "$search": {
            "index": spec.index.as_deref().unwrap_or(DEFAULT_TEXT_INDEX),
            "text": { "query": query, "path": { "wildcard": "*" } },
        }}),
        json!({ "$limit": limit }),
        json!({ "$project": projection_with_score(spec, "searchScore") }),
    ];

    Ok(BackingQuery {
        namespace,
        body: QueryBody::Aggregate { pipeline },
        result_limit: Some(limit as usize),
    })
}

fn get_unique_values(namespace: Namespace, params: &ValidatedParams) -> Result<BackingQuery> {
    let field = params
        .str("field")
        .ok_or_else(|| ValidationError::missing("field"))?;
    check_field_path("field", field)?;
    let filter = equality_filter("filters", params.get("filters"))?.unwrap_or_else(|| json!({}));
    let result_limit = match params.i64("limit") {
        Some(n) if n >= 1 => Some(n as usize),
        Some(_) => return Err(ValidationError::out_of_range("limit", "at least 1").into()),
        None => None,
    };

    Ok(BackingQuery {
        namespace,
        body: QueryBody::Distinct {
            field: field.to_string(),
            filter,
        },
        result_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::MockEmbeddingProvider;
    use crate::test_support::airbnb_document;
    use crate::tools::ToolConfig;
    use crate::types::EmbeddingError;
    use pretty_assertions::assert_eq;

    fn config() -> ToolConfig {
        ToolConfig::from_document(airbnb_document()).unwrap()
    }

    fn builder_with(embedder: MockEmbeddingProvider) -> PipelineBuilder {
        PipelineBuilder::new(Arc::new(embedder), AggregatePolicy::default())
    }

    fn embedding_once() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .times(1)
            .returning(|_| Ok(vec![0.5, -0.25]));
        embedder
    }

    fn no_embedding() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().never();
        embedder
    }

    fn params(value: Value) -> ValidatedParams {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn pipeline_of(query: &BackingQuery) -> &Vec<Value> {
        match &query.body {
            QueryBody::Aggregate { pipeline } => pipeline,
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    async fn build(
        builder: &PipelineBuilder,
        operation: &str,
        kind: OperationKind,
        p: Value,
    ) -> Result<BackingQuery> {
        let config = config();
        let spec = config
            .get(operation)
            .cloned()
            .unwrap_or_else(|| ToolSpec {
                description: String::new(),
                kind: Some(kind),
                required: Default::default(),
                parameters: Default::default(),
                index: None,
                vector_path: None,
                projection: None,
                scope: vec![],
                returns_description: String::new(),
            });
        builder
            .build(&config.module_info, &spec, kind, &params(p))
            .await
    }

    #[tokio::test]
    async fn test_vector_search_pipeline() {
        let b = builder_with(embedding_once());
        let query = build(
            &b,
            "vector_search",
            OperationKind::VectorSearch,
            json!({"query_text": "sunny loft", "limit": 5, "filters": [["property_type", "Loft"]]}),
        )
        .await
        .unwrap();

        assert_eq!(
            query.namespace,
            Namespace::new("sample_airbnb", "listingsAndReviews")
        );
        assert_eq!(query.result_limit, Some(5));
        assert_eq!(
            pipeline_of(&query),
            &vec![
                json!({"$vectorSearch": {
                    "index": "vector_index",
                    "path": "embedding",
                    "queryVector": [0.5, -0.25],
                    "limit": 5,
                    "numCandidates": 100,
                    "filter": {"property_type": "Loft"}
                }}),
                json!({"$project": {
                    "embedding": 0,
                    "images": 0,
                    "score": {"$meta": "vectorSearchScore"}
                }}),
                json!({"$sort": {"score": -1}}),
            ]
        );
    }

    #[tokio::test]
    async fn test_vector_search_defaults_and_min_score() {
        let b = builder_with(embedding_once());
        let query = build(
            &b,
            "vector_search",
            OperationKind::VectorSearch,
            json!({"query_text": "quiet cabin", "min_score": 0.7}),
        )
        .await
        .unwrap();
        let pipeline = pipeline_of(&query);
        assert_eq!(pipeline[0]["$vectorSearch"]["limit"], 10);
        assert_eq!(pipeline[0]["$vectorSearch"]["numCandidates"], 200);
        assert!(pipeline[0]["$vectorSearch"].get("filter").is_none());
        assert_eq!(pipeline[3], json!({"$match": {"score": {"$gte": 0.7}}}));
    }

    #[tokio::test]
    async fn test_candidates_below_limit_rejected_before_embedding() {
        let b = builder_with(no_embedding());
        let err = build(
            &b,
            "vector_search",
            OperationKind::VectorSearch,
            json!({"query_text": "loft", "limit": 20, "num_candidates": 10}),
        )
        .await
        .unwrap_err();
        match err {
            Error::Validation(e) => {
                assert_eq!(e.reason(), "out_of_range");
                assert_eq!(e.param(), "num_candidates");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_limit_cap_enforced() {
        let b = builder_with(no_embedding());
        let err = build(
            &b,
            "vector_search",
            OperationKind::VectorSearch,
            json!({"query_text": "loft", "limit": 51}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_embedding_failure_surfaces() {
        let mut embedder = MockEmbeddingProvider::new();
        embedder
            .expect_embed()
            .returning(|_| Err(EmbeddingError::Request("provider down".to_string())));
        let b = builder_with(embedder);
        let err = build(
            &b,
            "vector_search",
            OperationKind::VectorSearch,
            json!({"query_text": "loft"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "embedding_error");
    }

    #[tokio::test]
    async fn test_text_search_pipeline() {
        let b = builder_with(no_embedding());
        let query = build(
            &b,
            "text_search",
            OperationKind::TextSearch,
            json!({"query_text": "harbour view", "limit": 3}),
        )
        .await
        .unwrap();
        assert_eq!(
            pipeline_of(&query),
            &vec![
                json!({"$search": {
                    "index": "default",
                    "text": {"query": "harbour view", "path": {"wildcard": "*"}}
                }}),
                json!({"$limit": 3}),
                json!({"$project": {"score": {"$meta": "searchScore"}}}),
            ]
        );
        assert_eq!(query.result_limit, Some(3));
    }

    #[tokio::test]
    async fn test_aggregate_appends_limit() {
        let b = builder_with(no_embedding());
        let query = build(
            &b,
            "aggregate_query",
            OperationKind::AggregateQuery,
            json!({
                "pipeline": [{"$group": {"_id": "$property_type", "n": {"$sum": 1}}}],
                "limit": 10
            }),
        )
        .await
        .unwrap();
        let pipeline = pipeline_of(&query);
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline[1], json!({"$limit": 10}));
    }

    #[tokio::test]
    async fn test_aggregate_write_stage_denied() {
        let b = builder_with(no_embedding());
        let err = build(
            &b,
            "aggregate_query",
            OperationKind::AggregateQuery,
            json!({"pipeline": [{"$match": {}}, {"$out": "stolen"}]}),
        )
        .await
        .unwrap_err();
        let detail = err.detail().unwrap();
        assert_eq!(detail["reason"], "out_of_range");
        assert_eq!(detail["param"], "pipeline");
        assert!(detail["allowed"].as_str().unwrap().contains("$out"));
    }

    #[tokio::test]
    async fn test_aggregate_allowlist() {
        let b = PipelineBuilder::new(
            Arc::new(no_embedding()),
            AggregatePolicy {
                allowed_stages: Some(vec!["$match".to_string(), "$group".to_string()]),
                ..Default::default()
            },
        );
        let err = build(
            &b,
            "aggregate_query",
            OperationKind::AggregateQuery,
            json!({"pipeline": [{"$lookup": {"from": "users"}}]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_aggregate_stage_shape() {
        let b = builder_with(no_embedding());
        let err = build(
            &b,
            "aggregate_query",
            OperationKind::AggregateQuery,
            json!({"pipeline": [{"$match": {}, "$limit": 1}]}),
        )
        .await
        .unwrap_err();
        match err {
            Error::Validation(e) => assert_eq!(e.reason(), "type_mismatch"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unique_values() {
        let b = builder_with(no_embedding());
        let query = build(
            &b,
            "get_unique_values",
            OperationKind::GetUniqueValues,
            json!({"field": "address.country", "filters": {"property_type": "House"}}),
        )
        .await
        .unwrap();
        assert_eq!(
            query.body,
            QueryBody::Distinct {
                field: "address.country".to_string(),
                filter: json!({"property_type": "House"}),
            }
        );
    }

    #[tokio::test]
    async fn test_unique_values_rejects_operator_path() {
        let b = builder_with(no_embedding());
        let err = build(
            &b,
            "get_unique_values",
            OperationKind::GetUniqueValues,
            json!({"field": "$where"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_collection_info() {
        let b = builder_with(no_embedding());
        let query = build(
            &b,
            "get_collection_info",
            OperationKind::GetCollectionInfo,
            json!({}),
        )
        .await
        .unwrap();
        assert_eq!(query.body, QueryBody::CollectionInfo);
        assert_eq!(query.result_limit, None);
    }
}
