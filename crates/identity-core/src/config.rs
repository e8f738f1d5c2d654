//! Application Configuration Types
//!
//! Configuration consumed by the authority model, instance discovery and the
//! token acquisition pipeline. Every field has a serde default so a minimal
//! document only needs a `client_id`:
//!
//! ```rust
//! use identity_core::ApplicationConfig;
//!
//! let config: ApplicationConfig = serde_json::from_str(r#"{
//!     "client_id": "d3adb33f-c0de-ed0c-c0de-deadb33fc0d3",
//!     "authority": "https://login.microsoftonline.com/contoso.onmicrosoft.com/"
//! }"#).unwrap();
//!
//! assert!(config.validate_authority);
//! config.validate().unwrap();
//! ```

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IdentityError, Result};
use crate::instance::{AuthorityInfo, AuthorityType};

/// Authority used when none is configured
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common/";

/// First path segment that marks a B2C authority
pub const DEFAULT_B2C_POLICY_PREFIX: &str = "tfp";

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application (client) id registered with the identity platform
    pub client_id: String,
    /// Default authority for requests that do not override it
    #[serde(default = "default_authority")]
    pub authority: String,
    /// Whether untrusted authority hosts must be confirmed by instance discovery
    #[serde(default = "default_validate_authority")]
    pub validate_authority: bool,
    /// Forces the default authority type instead of inferring it from the URL
    #[serde(default)]
    pub authority_type: Option<AuthorityType>,
    /// First path segment identifying B2C authorities
    #[serde(default = "default_b2c_policy_prefix")]
    pub b2c_policy_prefix: String,
    /// Instance discovery endpoint override (sovereign clouds, tests)
    #[serde(default)]
    pub instance_discovery_endpoint: Option<String>,
    /// Redirect URI used when redeeming authorization codes
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Client secret for confidential clients (never serialized)
    #[serde(
        default,
        skip_serializing,
        deserialize_with = "deserialize_optional_secret"
    )]
    pub client_secret: Option<SecretString>,
    /// HTTP transport settings
    #[serde(default)]
    pub http: HttpConfig,
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpConfig {
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// Secrets are accepted from configuration documents but never written back
fn deserialize_optional_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.map(SecretString::new))
}

fn default_authority() -> String {
    DEFAULT_AUTHORITY.to_string()
}

fn default_validate_authority() -> bool {
    true
}

fn default_b2c_policy_prefix() -> String {
    DEFAULT_B2C_POLICY_PREFIX.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("identity-core/{}", env!("CARGO_PKG_VERSION"))
}

impl ApplicationConfig {
    /// Create a configuration with defaults for everything but the client id
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authority: default_authority(),
            validate_authority: default_validate_authority(),
            authority_type: None,
            b2c_policy_prefix: default_b2c_policy_prefix(),
            instance_discovery_endpoint: None,
            redirect_uri: None,
            client_secret: None,
            http: HttpConfig::default(),
        }
    }

    /// Set the default authority
    pub fn with_authority(mut self, authority: impl Into<String>, validate_authority: bool) -> Self {
        self.authority = authority.into();
        self.validate_authority = validate_authority;
        self
    }

    /// Force the default authority type
    pub fn with_authority_type(mut self, authority_type: AuthorityType) -> Self {
        self.authority_type = Some(authority_type);
        self
    }

    /// Override the instance discovery endpoint
    pub fn with_instance_discovery_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.instance_discovery_endpoint = Some(endpoint.into());
        self
    }

    /// Set the redirect URI
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Set a client secret (confidential client)
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Set HTTP transport settings
    pub fn with_http(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Parse the configured default authority
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if the authority URL is malformed
    pub fn default_authority_info(&self) -> Result<AuthorityInfo> {
        let mut info = AuthorityInfo::from_authority_uri(
            &self.authority,
            self.validate_authority,
            &self.b2c_policy_prefix,
        )?;
        if let Some(authority_type) = self.authority_type {
            info.authority_type = authority_type;
        }
        Ok(info)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] when a field is missing or malformed
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(IdentityError::Configuration(
                "client_id must not be empty".to_string(),
            ));
        }

        if self.b2c_policy_prefix.trim().is_empty() || self.b2c_policy_prefix.contains('/') {
            return Err(IdentityError::Configuration(format!(
                "Invalid B2C policy prefix: {:?}",
                self.b2c_policy_prefix
            )));
        }

        self.default_authority_info()
            .map_err(|e| IdentityError::Configuration(e.to_string()))?;

        if let Some(ref endpoint) = self.instance_discovery_endpoint {
            Url::parse(endpoint).map_err(|e| {
                IdentityError::Configuration(format!("Invalid instance discovery endpoint: {e}"))
            })?;
        }

        if let Some(ref redirect_uri) = self.redirect_uri {
            Url::parse(redirect_uri)
                .map_err(|e| IdentityError::Configuration(format!("Invalid redirect URI: {e}")))?;
        }

        if self.http.request_timeout_secs == 0 {
            return Err(IdentityError::Configuration(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
