//! HTTP transport seam
//!
//! The protocol client never talks to the network directly. Every outbound
//! call goes through an injected [`HttpTransport`], which keeps the core
//! testable and lets applications bring their own HTTP stack (proxies,
//! custom TLS, platform brokers).
//!
//! [`ReqwestTransport`] is the default implementation.

mod reqwest_transport;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use reqwest_transport::ReqwestTransport;

/// Type alias for the HTTP request handed to a transport
pub type HttpRequest = http::Request<Vec<u8>>;
/// Type alias for the HTTP response returned by a transport
pub type HttpResponse = http::Response<Vec<u8>>;

/// Transport collaborator able to send GET and form-encoded POST requests
///
/// Implementations must perform exactly one network exchange per call and
/// must not retry internally.
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Send a request and return the raw response (any status code)
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Error type for transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request execution failed (connection, TLS, timeout inside the client)
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Request could not be built (bad method, header or URI)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid header value in the response
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    /// Response body read failed
    #[error("Failed to read response body: {0}")]
    BodyRead(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e.to_string())
    }
}
