//! OAuth2 protocol client
//!
//! [`OAuth2Client`] accumulates query, body and header parameters, performs
//! exactly one HTTP exchange per [`OAuth2Client::execute_request`] call and
//! maps the wire response onto the crate's error taxonomy:
//!
//! | Response | Outcome |
//! |---|---|
//! | 200, body matches `T` | `Ok(T)` |
//! | 200, body does not match `T` | [`IdentityError::Deserialization`] |
//! | non-200, `error = invalid_grant` | [`IdentityError::UiRequired`] |
//! | non-200, any other `error` | [`IdentityError::Service`] |
//! | non-200, not an OAuth2 error document | [`IdentityError::NonParsableOAuthError`] |
//!
//! Error responses are logged at `error` level, except `authorization_pending`
//! (device code polling) which is logged at `info`. A correlation id mismatch on
//! a 200 response is only a warning.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use http::{HeaderMap, Method, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::headers;
use super::response::{InstanceDiscoveryResponse, OAuthErrorResponse, OpenIdConfiguration, TokenResponse};
use super::telemetry::{HttpEvent, TelemetryReceiver, XmsCliTelemInfo};
use crate::context::RequestContext;
use crate::error::{IdentityError, Result, ServiceError, codes};
use crate::transport::{HttpRequest, HttpTransport, TransportError};

/// SKU reported in `x-client-SKU`
pub const CLIENT_SKU: &str = "identity-core.rust";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Result of comparing the echoed correlation id with the one sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationCheck {
    /// The response echoed the correlation id
    Matched,
    /// The response did not echo a correlation id
    Missing,
    /// The response echoed a different correlation id
    Mismatched,
}

/// Compare the `client-request-id` response header with `expected`
///
/// Header names are matched case-insensitively; the value is trimmed and
/// compared case-insensitively. A mismatch is logged as a warning.
pub fn verify_correlation_id_header(response_headers: &HeaderMap, expected: Uuid) -> CorrelationCheck {
    let Some(echoed) = response_headers
        .get(headers::CLIENT_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
    else {
        return CorrelationCheck::Missing;
    };

    if echoed.eq_ignore_ascii_case(&expected.to_string()) {
        CorrelationCheck::Matched
    } else {
        warn!(
            sent = %expected,
            received = %echoed,
            "Returned correlation id does not match the sent correlation id"
        );
        CorrelationCheck::Mismatched
    }
}

/// Creates [`OAuth2Client`]s sharing one transport, telemetry sink and user agent
#[derive(Debug, Clone)]
pub struct OAuth2ClientFactory {
    transport: Arc<dyn HttpTransport>,
    telemetry: Arc<dyn TelemetryReceiver>,
    user_agent: Option<String>,
}

impl OAuth2ClientFactory {
    /// Create a factory
    pub fn new(transport: Arc<dyn HttpTransport>, telemetry: Arc<dyn TelemetryReceiver>) -> Self {
        Self {
            transport,
            telemetry,
            user_agent: None,
        }
    }

    /// Send `user-agent` with every request
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// A fresh client with the default headers set
    pub fn create(&self) -> OAuth2Client {
        let mut client = OAuth2Client::new(Arc::clone(&self.transport), Arc::clone(&self.telemetry));
        if let Some(ref user_agent) = self.user_agent {
            client.add_header(header::USER_AGENT.as_str(), user_agent.clone());
        }
        client
    }
}

/// Single-use protocol client
pub struct OAuth2Client {
    transport: Arc<dyn HttpTransport>,
    telemetry: Arc<dyn TelemetryReceiver>,
    query_parameters: BTreeMap<String, String>,
    body_parameters: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

impl fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Body values carry credentials
        f.debug_struct("OAuth2Client")
            .field("query_parameters", &self.query_parameters)
            .field("body_parameters", &self.body_parameters.keys().collect::<Vec<_>>())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OAuth2Client {
    /// Create a client with the SKU headers set
    pub fn new(transport: Arc<dyn HttpTransport>, telemetry: Arc<dyn TelemetryReceiver>) -> Self {
        let mut client = Self {
            transport,
            telemetry,
            query_parameters: BTreeMap::new(),
            body_parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
        };
        client.add_header(headers::CLIENT_SKU, CLIENT_SKU);
        client.add_header(headers::CLIENT_VER, env!("CARGO_PKG_VERSION"));
        client
    }

    /// Set a query parameter (last write wins)
    pub fn add_query_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query_parameters.insert(key.into(), value.into());
    }

    /// Set a form body parameter (last write wins)
    pub fn add_body_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.body_parameters.insert(key.into(), value.into());
    }

    /// Set a request header (last write wins, names are case-insensitive)
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
    }

    /// Current query parameters
    pub fn query_parameters(&self) -> &BTreeMap<String, String> {
        &self.query_parameters
    }

    /// Current body parameters
    pub fn body_parameters(&self) -> &BTreeMap<String, String> {
        &self.body_parameters
    }

    /// Query the instance discovery endpoint
    ///
    /// # Errors
    ///
    /// See [`OAuth2Client::execute_request`].
    pub async fn discover_aad_instance(
        &self,
        endpoint: &Url,
        ctx: &RequestContext,
    ) -> Result<InstanceDiscoveryResponse> {
        self.execute_request(endpoint, Method::GET, ctx).await
    }

    /// Fetch an OpenID configuration document
    ///
    /// # Errors
    ///
    /// See [`OAuth2Client::execute_request`].
    pub async fn get_openid_configuration(
        &self,
        endpoint: &Url,
        ctx: &RequestContext,
    ) -> Result<OpenIdConfiguration> {
        self.execute_request(endpoint, Method::GET, ctx).await
    }

    /// POST the body parameters to a token endpoint
    ///
    /// # Errors
    ///
    /// See [`OAuth2Client::execute_request`].
    pub async fn get_token(&self, endpoint: &Url, ctx: &RequestContext) -> Result<TokenResponse> {
        self.execute_request(endpoint, Method::POST, ctx).await
    }

    /// Send one request and classify the response
    ///
    /// # Errors
    ///
    /// - [`IdentityError::UiRequired`] for `invalid_grant`
    /// - [`IdentityError::Service`] for any other OAuth2 error
    /// - [`IdentityError::NonParsableOAuthError`] for non-OAuth2 error bodies
    /// - [`IdentityError::Deserialization`] when a 200 body does not match `T`
    /// - [`IdentityError::Transport`], [`IdentityError::Cancelled`] or
    ///   [`IdentityError::Timeout`] when the exchange itself fails
    pub async fn execute_request<T: DeserializeOwned>(
        &self,
        endpoint: &Url,
        method: Method,
        ctx: &RequestContext,
    ) -> Result<T> {
        let request = self.build_request(endpoint, &method, ctx)?;

        debug!(
            correlation_id = ?ctx.correlation_id,
            client_id = ctx.client_id.as_deref(),
            method = %method,
            endpoint = %endpoint.path(),
            host = ?endpoint.host_str(),
            "Sending OAuth2 request"
        );

        let started = Instant::now();
        let transport = Arc::clone(&self.transport);
        let response = ctx
            .run(async move { transport.send(request).await.map_err(IdentityError::from) })
            .await?;

        let status = response.status();
        let outcome = if status == StatusCode::OK {
            Ok(())
        } else {
            Err(classify_error_response(status, response.body(), ctx))
        };

        self.telemetry.on_http_event(HttpEvent {
            request_id: ctx.telemetry_request_id.clone(),
            method: method.to_string(),
            path: endpoint.path().to_string(),
            query_parameters: self.query_parameters.keys().cloned().collect(),
            status: status.as_u16(),
            user_agent: self.headers.get(header::USER_AGENT.as_str()).cloned(),
            server_request_id: header_str(response.headers(), headers::REQUEST_ID),
            server_telemetry: header_str(response.headers(), headers::CLI_TELEM)
                .and_then(|value| XmsCliTelemInfo::parse(&value)),
            oauth_error_code: outcome
                .as_ref()
                .err()
                .and_then(IdentityError::service_error)
                .map(|e| e.error_code.clone()),
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        });

        outcome?;

        if let Some(correlation_id) = ctx.correlation_id {
            verify_correlation_id_header(response.headers(), correlation_id);
        }

        serde_json::from_slice(response.body()).map_err(|e| {
            debug!(error = %e, endpoint = %endpoint.path(), "Failed to deserialize success response");
            IdentityError::Deserialization(e.to_string())
        })
    }

    fn build_request(
        &self,
        endpoint: &Url,
        method: &Method,
        ctx: &RequestContext,
    ) -> Result<HttpRequest> {
        let mut url = endpoint.clone();
        if !self.query_parameters.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query_parameters);
        }

        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(url.as_str());

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(correlation_id) = ctx.correlation_id {
            builder = builder
                .header(headers::CLIENT_REQUEST_ID, correlation_id.to_string())
                .header(headers::RETURN_CLIENT_REQUEST_ID, "true");
        }

        let body = if *method == Method::POST {
            builder = builder.header(header::CONTENT_TYPE, FORM_CONTENT_TYPE);
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.body_parameters)
                .finish()
                .into_bytes()
        } else {
            Vec::new()
        };

        builder
            .body(body)
            .map_err(|e| IdentityError::Transport(TransportError::InvalidRequest(e.to_string())))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn classify_error_response(status: StatusCode, body: &[u8], ctx: &RequestContext) -> IdentityError {
    let body_text = String::from_utf8_lossy(body).into_owned();

    let error_response: OAuthErrorResponse = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!(
                correlation_id = ?ctx.correlation_id,
                client_id = ctx.client_id.as_deref(),
                status = status.as_u16(),
                error = %e,
                "Service returned a non-parsable error response"
            );
            return IdentityError::NonParsableOAuthError {
                status: status.as_u16(),
                body: body_text,
            };
        }
    };

    let description = error_response.error_description.clone().unwrap_or_default();
    let polling = error_response
        .error
        .eq_ignore_ascii_case(codes::AUTHORIZATION_PENDING)
        || description
            .to_ascii_lowercase()
            .contains(codes::AUTHORIZATION_PENDING);

    if polling {
        info!(
            correlation_id = ?ctx.correlation_id,
            client_id = ctx.client_id.as_deref(),
            status = status.as_u16(),
            error_code = %error_response.error,
            "Authorization is still pending"
        );
    } else {
        error!(
            correlation_id = ?ctx.correlation_id,
            client_id = ctx.client_id.as_deref(),
            status = status.as_u16(),
            error_code = %error_response.error,
            description = %description,
            "OAuth2 request failed"
        );
    }

    let is_invalid_grant = error_response.error.eq_ignore_ascii_case(codes::INVALID_GRANT);
    let service_error = ServiceError {
        status: status.as_u16(),
        error_code: error_response.error,
        description: error_response.error_description,
        suberror: error_response.suberror,
        correlation_id: error_response.correlation_id,
        response_body: Some(body_text),
    };

    if is_invalid_grant {
        IdentityError::UiRequired(service_error)
    } else {
        IdentityError::Service(service_error)
    }
}
