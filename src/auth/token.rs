//! Agent token format.
//!
//! A token is a compact JWS: `base64url(header).base64url(payload).signature`.
//! The header carries the agent's lookup key (`api_key`) next to `alg`, so
//! the verifier can find the signing secret before it trusts anything else
//! in the token. Signing and verification use HS256.

use crate::types::{AuthError, Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};

/// The only accepted signing algorithm.
pub const TOKEN_ALGORITHM: &str = "HS256";

/// Token header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Agent lookup key.
    pub api_key: String,
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub agent_name: String,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// A token split into its parts. Nothing in it is trusted yet.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    pub header: TokenHeader,
    signing_input: String,
    payload: Vec<u8>,
    signature: String,
}

impl UnverifiedToken {
    /// Split and decode a compact token without checking the signature.
    pub fn parse(token: &str) -> std::result::Result<Self, AuthError> {
        let mut parts = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        };
        if header.is_empty() || payload.is_empty() || signature.is_empty() {
            return Err(AuthError::MalformedToken("empty segment".to_string()));
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header)
            .map_err(|_| AuthError::MalformedToken("header is not base64url".to_string()))?;
        let parsed: TokenHeader = serde_json::from_slice(&header_bytes)
            .map_err(|_| AuthError::MalformedToken("header lacks alg or api_key".to_string()))?;
        if parsed.api_key.is_empty() {
            return Err(AuthError::MalformedToken("empty api_key".to_string()));
        }
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::MalformedToken("payload is not base64url".to_string()))?;

        Ok(Self {
            header: parsed,
            signing_input: format!("{}.{}", header, payload),
            payload: payload_bytes,
            signature: signature.to_string(),
        })
    }

    /// Check the HS256 signature against `secret`, then decode the claims.
    pub fn verify(&self, secret: &[u8]) -> std::result::Result<Claims, AuthError> {
        if self.header.alg != TOKEN_ALGORITHM {
            return Err(AuthError::BadSignature);
        }
        let valid = jsonwebtoken::crypto::verify(
            &self.signature,
            self.signing_input.as_bytes(),
            &DecodingKey::from_secret(secret),
            Algorithm::HS256,
        )
        .unwrap_or(false);
        if !valid {
            return Err(AuthError::BadSignature);
        }
        serde_json::from_slice(&self.payload)
            .map_err(|_| AuthError::MalformedToken("payload lacks agent_name or exp".to_string()))
    }
}

/// Sign `claims` for the agent identified by `api_key`.
pub fn mint(api_key: &str, claims: &Claims, secret: &[u8]) -> Result<String> {
    let header = TokenHeader {
        alg: TOKEN_ALGORITHM.to_string(),
        typ: Some("JWT".to_string()),
        api_key: api_key.to_string(),
    };
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
    );
    let signature = jsonwebtoken::crypto::sign(
        signing_input.as_bytes(),
        &EncodingKey::from_secret(secret),
        Algorithm::HS256,
    )
    .map_err(|e| Error::internal(format!("token signing failed: {}", e)))?;
    Ok(format!("{}.{}", signing_input, signature))
}
