//! Account identifiers derived from token responses.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::{IdentityError, Result};

/// Decoded `client_info` (`{"uid": .., "utid": ..}`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientInfo {
    /// Object id of the user in the home tenant
    pub uid: String,
    /// Home tenant id
    pub utid: String,
}

impl ClientInfo {
    /// Decode the base64url `client_info` value
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Deserialization`] if the value is not base64url JSON
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        decode_json_segment(encoded, "client_info")
    }

    /// `<uid>.<utid>`
    pub fn home_account_id(&self) -> String {
        format!("{}.{}", self.uid, self.utid)
    }
}

/// Id token claims used for account identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload of a JWT without verifying its signature
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Deserialization`] if the token is not a JWT
    pub fn from_jwt(id_token: &str) -> Result<Self> {
        let payload = id_token.split('.').nth(1).ok_or_else(|| {
            IdentityError::Deserialization("id_token is not a JWT".to_string())
        })?;
        decode_json_segment(payload, "id_token")
    }

    /// Object id, falling back to the subject
    pub fn object_id(&self) -> Option<&str> {
        self.oid.as_deref().or(self.sub.as_deref())
    }
}

fn decode_json_segment<T: DeserializeOwned>(encoded: &str, what: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .map_err(|e| IdentityError::Deserialization(format!("Invalid {} encoding: {}", what, e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| IdentityError::Deserialization(format!("Invalid {} payload: {}", what, e)))
}
