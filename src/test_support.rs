//! Shared fixtures for unit tests.

use crate::auth::AgentIdentity;
use crate::types::AgentKey;
use serde_json::{json, Value};

/// The Airbnb listings configuration document.
pub(crate) fn airbnb_document() -> Value {
    json!({
        "name": "AirbnbSearch",
        "module_info": {
            "database": "sample_airbnb",
            "collection": "listingsAndReviews",
            "source_url": "https://github.com/neelabalan/mongodb-sample-dataset"
        },
        "tools": {
            "vector_search": {
                "description": "Find listings semantically similar to a text query",
                "required": ["query_text"],
                "parameters": {
                    "query_text": {"type": "string", "description": "What the guest is looking for"},
                    "limit": {
                        "type": "int",
                        "default": 10,
                        "constraints": {"min": 1, "max": 50}
                    },
                    "num_candidates": {
                        "type": "int",
                        "constraints": {"min": 1, "max": 1000}
                    },
                    "filters": {"type": "list", "description": "[field, value] equality pairs"}
                },
                "index": "vector_index",
                "projection": {"embedding": 0, "images": 0},
                "returns_description": "Listings ordered by similarity score"
            },
            "get_unique_values": {
                "description": "Distinct values of a field",
                "required": ["field"],
                "parameters": {
                    "field": {"type": "string"}
                },
                "returns_description": "Distinct values"
            }
        },
        "prompts": {
            "system": "You help guests find Airbnb listings."
        },
        "active": true
    })
}

pub(crate) fn identity(key: &str, name: &str, secret: &str, scope: &[&str]) -> AgentIdentity {
    AgentIdentity {
        agent_key: AgentKey::from_string(key.to_string()).unwrap(),
        agent_name: name.to_string(),
        signing_secret: secret.to_string(),
        scope: scope.iter().map(|s| s.to_string()).collect(),
    }
}
