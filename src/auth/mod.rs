//! Agent authentication.
//!
//! Each agent signs its own tokens with a per-agent secret. The verifier
//! reads the lookup key from the token header, resolves exactly one
//! identity, and only then checks the signature, expiry, identity binding
//! and scope, in that order.

pub mod token;

use crate::store::{DocumentStore, Namespace};
use crate::tools::access::missing_scopes;
use crate::types::{AgentKey, AuthError, Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use token::UnverifiedToken;

pub use token::{mint, Claims, TokenHeader};

// =============================================================================
// Identities
// =============================================================================

/// A registered agent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_key: AgentKey,
    pub agent_name: String,
    #[serde(skip_serializing)]
    pub signing_secret: String,
    /// Scopes this agent may claim. Empty means unrestricted.
    #[serde(default)]
    pub scope: BTreeSet<String>,
}

impl fmt::Debug for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentIdentity")
            .field("agent_key", &self.agent_key)
            .field("agent_name", &self.agent_name)
            .field("signing_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

/// Lookup of agent identities by key.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Every identity registered under `agent_key`. More than one is a
    /// data error the verifier reports as ambiguous.
    async fn find_by_key(&self, agent_key: &str) -> Result<Vec<AgentIdentity>>;
}

/// Identities held in memory, optionally seeded from a JSON file.
#[derive(Debug, Default)]
pub struct StaticIdentityStore {
    identities: RwLock<Vec<AgentIdentity>>,
}

impl StaticIdentityStore {
    pub fn new(identities: Vec<AgentIdentity>) -> Self {
        Self {
            identities: RwLock::new(identities),
        }
    }

    /// Load a JSON array of identities.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let identities: Vec<AgentIdentity> = serde_json::from_str(&raw).map_err(|e| {
            Error::config_invalid(format!("identities file {}: {}", path.display(), e))
        })?;
        Ok(Self::new(identities))
    }

    /// Replace every identity with the same key, or add a new one.
    pub fn upsert(&self, identity: AgentIdentity) {
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        identities.retain(|i| i.agent_key != identity.agent_key);
        identities.push(identity);
    }

    pub fn remove(&self, agent_key: &str) {
        self.identities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|i| i.agent_key.as_str() != agent_key);
    }
}

#[async_trait]
impl IdentityStore for StaticIdentityStore {
    async fn find_by_key(&self, agent_key: &str) -> Result<Vec<AgentIdentity>> {
        Ok(self
            .identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|i| i.agent_key.as_str() == agent_key)
            .cloned()
            .collect())
    }
}

/// Identities kept in a document store collection.
pub struct StoreIdentityStore {
    store: Arc<dyn DocumentStore>,
    namespace: Namespace,
}

impl fmt::Debug for StoreIdentityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreIdentityStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl StoreIdentityStore {
    pub fn new(store: Arc<dyn DocumentStore>, namespace: Namespace) -> Self {
        Self { store, namespace }
    }
}

#[async_trait]
impl IdentityStore for StoreIdentityStore {
    async fn find_by_key(&self, agent_key: &str) -> Result<Vec<AgentIdentity>> {
        // Two is enough to tell unique from ambiguous.
        let pipeline = [
            json!({"$match": {"agent_key": agent_key}}),
            json!({"$limit": 2}),
        ];
        let documents = self.store.aggregate(&self.namespace, &pipeline).await?;
        documents
            .into_iter()
            .map(|doc| {
                serde_json::from_value(doc).map_err(|e| {
                    Error::internal(format!("identity record in {}: {}", self.namespace, e))
                })
            })
            .collect()
    }
}

// =============================================================================
// Verifier
// =============================================================================

/// Verifies agent tokens against the identity store.
pub struct AuthVerifier {
    identities: Arc<dyn IdentityStore>,
}

impl fmt::Debug for AuthVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthVerifier").finish_non_exhaustive()
    }
}

impl AuthVerifier {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Authenticate `token` and check it grants `required`.
    pub async fn authenticate(
        &self,
        token: &str,
        required: &BTreeSet<String>,
    ) -> Result<AgentIdentity> {
        self.authenticate_at(token, required, chrono::Utc::now().timestamp())
            .await
    }

    /// [`authenticate`](Self::authenticate) with an explicit clock, in epoch seconds.
    pub async fn authenticate_at(
        &self,
        token: &str,
        required: &BTreeSet<String>,
        now: i64,
    ) -> Result<AgentIdentity> {
        let result = self.verify(token, required, now).await;
        match &result {
            Ok(identity) => {
                tracing::debug!(agent = %identity.agent_name, "agent authenticated");
            }
            Err(Error::Auth(e)) => {
                tracing::warn!(reason = e.reason(), "authentication rejected");
            }
            Err(e) => {
                tracing::error!(error = %e, "identity lookup failed");
            }
        }
        result
    }

    async fn verify(
        &self,
        token: &str,
        required: &BTreeSet<String>,
        now: i64,
    ) -> Result<AgentIdentity> {
        let unverified = UnverifiedToken::parse(token)?;

        let mut candidates = self
            .identities
            .find_by_key(&unverified.header.api_key)
            .await?;
        let identity = match candidates.len() {
            0 => return Err(AuthError::UnknownAgent.into()),
            1 => candidates.remove(0),
            n => return Err(AuthError::AmbiguousAgent(n).into()),
        };

        let claims = unverified.verify(identity.signing_secret.as_bytes())?;

        if claims.exp <= now {
            return Err(AuthError::Expired.into());
        }
        if claims.agent_name != identity.agent_name {
            return Err(AuthError::IdentityMismatch.into());
        }

        let granted: Vec<String> = if identity.scope.is_empty() {
            claims.scope
        } else {
            claims
                .scope
                .into_iter()
                .filter(|s| identity.scope.contains(s))
                .collect()
        };
        let missing = missing_scopes(required, &granted);
        if !missing.is_empty() {
            return Err(AuthError::ForbiddenScope { missing }.into());
        }

        Ok(identity)
    }
}
