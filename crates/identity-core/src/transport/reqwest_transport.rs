//! reqwest-backed transport
//!
//! Bridges [`http::Request`]/[`http::Response`] values used by the protocol
//! client to a pooled [`reqwest::Client`].
//!
//! The client is configured to:
//! - NOT follow redirects (token and discovery endpoints never redirect)
//! - Use rustls for TLS (no OpenSSL dependency)
//! - Apply the request timeout and user agent from [`HttpConfig`]

use async_trait::async_trait;
use http::{HeaderValue, StatusCode};

use super::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::config::HttpConfig;

/// Default [`HttpTransport`] built on reqwest
#[derive(Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport from HTTP configuration
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the underlying client cannot be built
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let inner = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { inner })
    }

    /// Create from an existing reqwest client
    ///
    /// The client should be configured with `redirect::Policy::none()`.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        // Split the http::Request into what reqwest needs
        let (parts, body) = request.into_parts();

        let url = parts.uri.to_string();
        let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("Invalid method: {}", parts.method)))?;

        let mut req_builder = self.inner.request(method, &url);

        // Copy request headers
        for (name, value) in parts.headers.iter() {
            req_builder = req_builder.header(name.as_str(), value.as_bytes());
        }

        // Empty bodies are not sent
        if !body.is_empty() {
            req_builder = req_builder.body(body);
        }

        // Send; redirects are returned as-is
        let response = req_builder.send().await?;

        // Rebuild the reqwest::Response as an http::Response
        let status = StatusCode::from_u16(response.status().as_u16())
            .map_err(|_| TransportError::InvalidHeader("Invalid status code".to_string()))?;

        let mut builder = http::Response::builder().status(status);

        // Copy response headers
        for (name, value) in response.headers().iter() {
            let header_value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
            builder = builder.header(name.as_str(), header_value);
        }

        // Read the full body; status classification happens in the caller
        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::BodyRead(e.to_string()))?;

        builder
            .body(body_bytes.to_vec())
            .map_err(|e| TransportError::InvalidHeader(e.to_string()))
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("inner", &"<reqwest::Client>")
            .finish()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.execute(request).await
    }
}
