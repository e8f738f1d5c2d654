//! Wire types for the discovery, OpenID configuration and token endpoints.

use serde::{Deserialize, Serialize};

use crate::instance::InstanceDiscoveryMetadata;

/// OAuth2 error document returned with a non-success status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthErrorResponse {
    /// Error code (required)
    pub error: String,
    /// Human-readable description
    #[serde(default)]
    pub error_description: Option<String>,
    /// AAD refinement of `error`
    #[serde(default)]
    pub suberror: Option<String>,
    /// Numeric AAD error codes
    #[serde(default)]
    pub error_codes: Vec<i64>,
    /// Server correlation id
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Claims challenge
    #[serde(default)]
    pub claims: Option<String>,
}

/// Instance discovery response document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDiscoveryResponse {
    /// OpenID configuration endpoint for the queried tenant
    #[serde(default)]
    pub tenant_discovery_endpoint: Option<String>,
    /// Known directories
    #[serde(default)]
    pub metadata: Vec<InstanceDiscoveryMetadata>,
}

/// Subset of the OpenID configuration document used for token acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIdConfiguration {
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Issuer
    pub issuer: String,
}

/// Successful token endpoint response
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Token type (normally `Bearer`)
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access token
    pub access_token: String,
    /// Granted scopes, space separated
    #[serde(default)]
    pub scope: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Extended lifetime in seconds (resilience)
    #[serde(default)]
    pub ext_expires_in: Option<u64>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OpenID Connect id token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Base64url encoded `{"uid": .., "utid": ..}` document
    #[serde(default)]
    pub client_info: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

// Tokens are credentials and stay out of logs
impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("access_token", &"<redacted>")
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("client_info", &self.client_info.is_some())
            .finish()
    }
}
