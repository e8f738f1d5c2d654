//! OAuth2 Protocol Client
//!
//! This module provides the HTTP-level protocol layer:
//! - Request building with last-write-wins query, body and header parameters
//! - Correlation id headers and soft verification of the echoed id
//! - Classification of error responses into [`crate::IdentityError`]
//! - One [`HttpEvent`] per exchange for the injected [`TelemetryReceiver`]
//!
//! ## Submodules
//!
//! - `client` - [`OAuth2Client`] and its factory
//! - `response` - wire types for discovery, OpenID configuration and token responses
//! - `telemetry` - [`HttpEvent`], [`TelemetryReceiver`] and `x-ms-clitelem` parsing

pub mod client;
pub mod response;
pub mod telemetry;

pub use client::{CorrelationCheck, OAuth2Client, OAuth2ClientFactory, verify_correlation_id_header};
pub use response::{InstanceDiscoveryResponse, OAuthErrorResponse, OpenIdConfiguration, TokenResponse};
pub use telemetry::{HttpEvent, NoopTelemetry, TelemetryReceiver, XmsCliTelemInfo};

/// Header names (lower-case, as stored in `http::HeaderMap`)
pub mod headers {
    /// Correlation id sent with each request and echoed by the service
    pub const CLIENT_REQUEST_ID: &str = "client-request-id";
    /// Asks the service to echo `client-request-id`
    pub const RETURN_CLIENT_REQUEST_ID: &str = "return-client-request-id";
    /// Server request id
    pub const REQUEST_ID: &str = "x-ms-request-id";
    /// Server telemetry
    pub const CLI_TELEM: &str = "x-ms-clitelem";
    /// Client SKU
    pub const CLIENT_SKU: &str = "x-client-sku";
    /// Client version
    pub const CLIENT_VER: &str = "x-client-ver";
}

/// Token request body parameter names
pub mod params {
    pub const GRANT_TYPE: &str = "grant_type";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const CLIENT_INFO: &str = "client_info";
    pub const SCOPE: &str = "scope";
    pub const CODE: &str = "code";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// `grant_type` values
pub mod grant_types {
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}
