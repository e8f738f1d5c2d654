//! Error taxonomy for authority resolution and token acquisition.
//!
//! Every fallible operation in this crate returns [`IdentityError`]. The
//! variants map onto what a caller can do about the failure:
//!
//! - [`IdentityError::UiRequired`] - the user must re-authenticate interactively
//! - [`IdentityError::Service`] - the service rejected the request; retry policy
//!   belongs to the caller and can be driven by [`IdentityError::is_retryable`]
//! - [`IdentityError::NonParsableOAuthError`] - the service answered outside the
//!   OAuth2 error contract
//! - [`IdentityError::InvalidAuthorityType`] / [`IdentityError::InvalidAuthority`] -
//!   configuration or usage errors, never retryable
//!
//! A correlation id mismatch on a successful response is deliberately *not*
//! represented here; it is only logged.

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::transport::TransportError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Well-known error codes carried by [`ServiceError`] and [`IdentityError::error_code`]
pub mod codes {
    /// Refresh token or authorization code rejected; interactive sign-in needed
    pub const INVALID_GRANT: &str = "invalid_grant";
    /// Device code polling: the user has not completed sign-in yet
    pub const AUTHORIZATION_PENDING: &str = "authorization_pending";
    /// Authority type is not supported (ADFS) or conflicts with configuration
    pub const INVALID_AUTHORITY_TYPE: &str = "invalid_authority_type";
    /// Authority URL could not be parsed into a canonical authority
    pub const INVALID_AUTHORITY: &str = "invalid_authority";
    /// Non-success response whose body is not an OAuth2 error document
    pub const NON_PARSABLE_OAUTH_ERROR: &str = "non_parsable_oauth_error";
    /// Instance discovery returned a success body that is not a discovery document
    pub const INVALID_INSTANCE_DISCOVERY_RESPONSE: &str = "invalid_instance_discovery_response";
    /// Instance discovery did not name a tenant discovery endpoint
    pub const MISSING_TENANT_DISCOVERY_ENDPOINT: &str = "missing_tenant_discovery_endpoint";
    /// OpenID configuration document is missing or has invalid endpoints
    pub const INVALID_OPENID_CONFIGURATION: &str = "invalid_openid_configuration";
    /// Silent acquisition found nothing usable in the token cache
    pub const NO_TOKENS_FOUND: &str = "no_tokens_found";
}

/// Structured details of an OAuth2 error returned by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// HTTP status of the response (0 when synthesized locally)
    pub status: u16,
    /// OAuth2 `error` code
    pub error_code: String,
    /// OAuth2 `error_description`
    pub description: Option<String>,
    /// AAD `suberror` refinement (e.g. `consent_required`)
    pub suberror: Option<String>,
    /// Server-side correlation id echoed in the error body
    pub correlation_id: Option<String>,
    /// Raw response body, attached for diagnostics
    pub response_body: Option<String>,
}

impl ServiceError {
    /// Create a service error with a code and description
    pub fn new(status: u16, error_code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            status,
            error_code: error_code.into(),
            description: Some(description.into()),
            suberror: None,
            correlation_id: None,
            response_body: None,
        }
    }

    /// The HTTP status as a [`StatusCode`], if it was a valid one
    pub fn status_code(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status).ok()
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (HTTP {})", self.error_code, self.status)?;
        if let Some(ref description) = self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

/// Errors produced by authority resolution, discovery, the protocol client and the token cache
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Authority type is unsupported or conflicts with the application default
    #[error("Invalid authority type: {0}")]
    InvalidAuthorityType(String),

    /// Authority URL is malformed
    #[error("Invalid authority: {0}")]
    InvalidAuthority(String),

    /// Non-success response that does not follow the OAuth2 error schema
    #[error("Service returned a non-parsable error response (HTTP {status})")]
    NonParsableOAuthError {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// Interactive authentication is required
    #[error("User interaction required: {0}")]
    UiRequired(ServiceError),

    /// Any other OAuth2 error returned by the service
    #[error("Service error: {0}")]
    Service(ServiceError),

    /// Transport failure, passed through unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request context was cancelled while a network call was in flight
    #[error("Request was cancelled")]
    Cancelled,

    /// The request context timeout elapsed while a network call was in flight
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// A success response body did not match the expected shape
    #[error("Failed to deserialize response: {0}")]
    Deserialization(String),

    /// Application configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Token cache serialization or persistence failed
    #[error("Token cache error: {0}")]
    Cache(String),
}

impl IdentityError {
    /// Build a UI-required error without a server response
    pub fn ui_required(error_code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::UiRequired(ServiceError::new(0, error_code, description))
    }

    /// Whether an outer retry policy may retry the failed call
    ///
    /// Transient service statuses (429, 5xx), timeouts and transport failures are
    /// retryable. UI-required, configuration and protocol anomalies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Service(err) => err.status == 429 || (500..600).contains(&err.status),
            Self::Timeout(_) | Self::Transport(_) => true,
            _ => false,
        }
    }

    /// Whether the caller has to fall back to interactive authentication
    pub fn is_ui_required(&self) -> bool {
        matches!(self, Self::UiRequired(_))
    }

    /// Stable error code for logging and telemetry
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidAuthorityType(_) => codes::INVALID_AUTHORITY_TYPE,
            Self::InvalidAuthority(_) => codes::INVALID_AUTHORITY,
            Self::NonParsableOAuthError { .. } => codes::NON_PARSABLE_OAUTH_ERROR,
            Self::UiRequired(err) | Self::Service(err) => &err.error_code,
            Self::Transport(_) => "transport_error",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Deserialization(_) => "deserialization_error",
            Self::Configuration(_) => "configuration_error",
            Self::Cache(_) => "token_cache_error",
        }
    }

    /// Service error details for UI-required and service errors
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::UiRequired(err) | Self::Service(err) => Some(err),
            _ => None,
        }
    }
}

impl From<url::ParseError> for IdentityError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidAuthority(e.to_string())
    }
}
