//! Common test utilities for integration tests
//!
//! This module provides a scripted HTTP transport, canned discovery, OpenID
//! configuration and token responses, and a tracing layer that captures log
//! levels so tests can assert on them.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::{HeaderMap, Method};
use identity_core::oauth2::{HttpEvent, TelemetryReceiver};
use identity_core::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use identity_core::{ApplicationConfig, PublicClientApplication, ServiceBundle};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use url::Url;

pub const CLIENT_ID: &str = "d3adb33f-c0de-ed0c-c0de-deadb33fc0d3";
pub const UID: &str = "my-uid";
pub const UTID: &str = "my-utid";
pub const HOME_ACCOUNT_ID: &str = "my-uid.my-utid";

pub const PREF_NETWORK: &str = "login.microsoftonline.com";
pub const PREF_CACHE: &str = "login.windows.net";
pub const PROD_ALIASES: [&str; 4] = [
    "login.microsoftonline.com",
    "login.windows.net",
    "login.microsoft.com",
    "sts.windows.net",
];

pub const DISCOVERY_URL: &str = "https://login.microsoftonline.com/common/discovery/instance";

/// Request captured by [`MockTransport`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

impl RecordedRequest {
    pub fn query(&self) -> HashMap<String, String> {
        self.url.query_pairs().into_owned().collect()
    }

    pub fn form(&self) -> HashMap<String, String> {
        url::form_urlencoded::parse(self.body.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Debug, Clone)]
struct MockHandler {
    method: Method,
    url_prefix: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

/// Scripted transport: responds by method and URL prefix, records every request
#[derive(Debug, Default)]
pub struct MockTransport {
    handlers: Mutex<Vec<MockHandler>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Respond to `method` requests whose URL starts with `url_prefix`
    ///
    /// Later registrations take precedence over earlier ones.
    pub fn on(&self, method: Method, url_prefix: &str, status: u16, body: impl Into<String>) {
        self.on_with_headers(method, url_prefix, status, &[], body);
    }

    pub fn on_json(&self, method: Method, url_prefix: &str, status: u16, body: Value) {
        self.on(method, url_prefix, status, body.to_string());
    }

    pub fn on_with_headers(
        &self,
        method: Method,
        url_prefix: &str,
        status: u16,
        headers: &[(&str, &str)],
        body: impl Into<String>,
    ) {
        self.handlers.lock().push(MockHandler {
            method,
            url_prefix: url_prefix.to_string(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: body.into(),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn count_matching(&self, url_prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url.as_str().starts_with(url_prefix))
            .count()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (parts, body) = request.into_parts();
        let url = Url::parse(&parts.uri.to_string())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        self.requests.lock().push(RecordedRequest {
            method: parts.method.clone(),
            url: url.clone(),
            headers: parts.headers.clone(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });

        let handler = self
            .handlers
            .lock()
            .iter()
            .rev()
            .find(|h| h.method == parts.method && url.as_str().starts_with(&h.url_prefix))
            .cloned()
            .ok_or_else(|| {
                TransportError::Request(format!("no mock handler for {} {}", parts.method, url))
            })?;

        let mut builder = http::Response::builder().status(handler.status);
        for (name, value) in &handler.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(handler.body.into_bytes())
            .map_err(|e| TransportError::InvalidHeader(e.to_string()))
    }
}

/// Transport whose requests never complete
#[derive(Debug, Default)]
pub struct HangingTransport;

#[async_trait]
impl HttpTransport for HangingTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        std::future::pending().await
    }
}

/// Telemetry receiver that keeps every event
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<HttpEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<HttpEvent> {
        self.events.lock().clone()
    }
}

impl TelemetryReceiver for RecordingTelemetry {
    fn on_http_event(&self, event: HttpEvent) {
        self.events.lock().push(event);
    }
}

// =============================================================================
// CANNED RESPONSES
// =============================================================================

pub fn discovery_response(preferred_network: &str, preferred_cache: &str, aliases: &[&str]) -> Value {
    json!({
        "tenant_discovery_endpoint": format!(
            "https://{}/common/v2.0/.well-known/openid-configuration",
            preferred_network
        ),
        "api-version": "1.1",
        "metadata": [
            {
                "preferred_network": preferred_network,
                "preferred_cache": preferred_cache,
                "aliases": aliases,
            }
        ]
    })
}

pub fn prod_discovery_response() -> Value {
    discovery_response(PREF_NETWORK, PREF_CACHE, &PROD_ALIASES)
}

pub fn openid_configuration(host: &str, tenant: &str) -> Value {
    json!({
        "authorization_endpoint": format!("https://{}/{}/oauth2/v2.0/authorize", host, tenant),
        "token_endpoint": format!("https://{}/{}/oauth2/v2.0/token", host, tenant),
        "issuer": format!("https://{}/{}/v2.0", host, tenant),
    })
}

pub fn openid_configuration_url(host: &str, tenant: &str) -> String {
    format!("https://{}/{}/v2.0/.well-known/openid-configuration", host, tenant)
}

pub fn token_url(host: &str, tenant: &str) -> String {
    format!("https://{}/{}/oauth2/v2.0/token", host, tenant)
}

pub fn encoded_client_info(uid: &str, utid: &str) -> String {
    URL_SAFE_NO_PAD.encode(json!({ "uid": uid, "utid": utid }).to_string())
}

pub fn id_token(oid: &str, tid: &str, username: &str) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(
            json!({ "oid": oid, "tid": tid, "preferred_username": username }).to_string()
        )
    )
}

pub fn token_response(access_token: &str, scope: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "refresh_token": "refresh-token",
        "scope": scope,
        "expires_in": 3599,
        "ext_expires_in": 7199,
        "id_token": id_token(UID, UTID, "user@contoso.com"),
        "client_info": encoded_client_info(UID, UTID),
    })
}

pub fn invalid_grant_response() -> Value {
    json!({
        "error": "invalid_grant",
        "error_description": "AADSTS70000: The refresh token has expired.",
        "error_codes": [70000],
        "correlation_id": "f0f0f0f0-0000-0000-0000-000000000000",
    })
}

/// Application against `authority` using `transport`
pub fn application(authority: &str, transport: Arc<MockTransport>) -> PublicClientApplication {
    let config = ApplicationConfig::new(CLIENT_ID).with_authority(authority, true);
    let bundle = ServiceBundle::new(config, transport).expect("valid configuration");
    PublicClientApplication::new(Arc::new(bundle))
}

// =============================================================================
// LOG CAPTURE
// =============================================================================

/// One captured event: level, message and the remaining fields rendered as strings
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

/// Events captured by [`capture_logs`]
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedLogs {
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.0
            .lock()
            .iter()
            .map(|event| (event.level, event.message.clone()))
            .collect()
    }

    /// Levels of events whose message contains `needle`
    pub fn levels_of(&self, needle: &str) -> Vec<Level> {
        self.0
            .lock()
            .iter()
            .filter(|event| event.message.contains(needle))
            .map(|event| event.level)
            .collect()
    }

    pub fn contains_at(&self, level: Level, needle: &str) -> bool {
        self.levels_of(needle).contains(&level)
    }

    /// Value of `field` on the first event whose message contains `needle`
    pub fn field_of(&self, needle: &str, field: &str) -> Option<String> {
        self.0
            .lock()
            .iter()
            .find(|event| event.message.contains(needle))
            .and_then(|event| event.fields.get(field).cloned())
    }
}

impl fmt::Debug for CapturedLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.lock().iter()).finish()
    }
}

struct CaptureLayer(CapturedLogs);

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for EventVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.insert(field.name().to_string(), rendered);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.0.0.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Capture every event emitted on this thread until the guard is dropped
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::registry().with(CaptureLayer(logs.clone()));
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}
