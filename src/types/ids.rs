//! Strongly-typed identifiers.
//!
//! `RequestId` is minted per call; `AgentKey` is the lookup key carried in a
//! token header and is never empty.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Defines a string newtype with `as_str()` and Display.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

define_id!(
    /// Correlates one invocation across logs and call history.
    #[derive(Deserialize)]
    RequestId
);
define_id!(
    #[derive(Deserialize)]
    #[serde(try_from = "String")]
    AgentKey
);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentKey {
    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.trim().is_empty() {
            return Err("AgentKey cannot be empty");
        }
        Ok(Self(s))
    }
}

impl TryFrom<String> for AgentKey {
    type Error = &'static str;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_string(s)
    }
}
