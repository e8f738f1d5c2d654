//! HTTP telemetry events
//!
//! Every protocol exchange produces one [`HttpEvent`], handed to the injected
//! [`TelemetryReceiver`]. Events are write-only: nothing in this crate reads
//! them back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Record of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpEvent {
    /// Telemetry request id of the owning [`crate::RequestContext`]
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Request path (no query)
    pub path: String,
    /// Request query parameter names (values are not recorded)
    pub query_parameters: Vec<String>,
    /// Response status code
    pub status: u16,
    /// User agent sent with the request
    pub user_agent: Option<String>,
    /// Server request id (`x-ms-request-id`)
    pub server_request_id: Option<String>,
    /// Parsed `x-ms-clitelem` header
    pub server_telemetry: Option<XmsCliTelemInfo>,
    /// OAuth2 error code when the response was an error
    pub oauth_error_code: Option<String>,
    /// When the response was received
    pub timestamp: DateTime<Utc>,
    /// Round-trip time in milliseconds
    pub duration_ms: u64,
}

/// Sink for [`HttpEvent`]s
pub trait TelemetryReceiver: Send + Sync + fmt::Debug {
    /// Called once per completed HTTP exchange
    fn on_http_event(&self, event: HttpEvent);
}

/// Receiver that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryReceiver for NoopTelemetry {
    fn on_http_event(&self, _event: HttpEvent) {}
}

/// Server-side telemetry echoed in the `x-ms-clitelem` header
///
/// Format (version 1): `1,<error_code>,<sub_error_code>,<token_age>,<spe_info>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct XmsCliTelemInfo {
    /// Header format version
    pub version: String,
    /// Server error code
    pub server_error_code: String,
    /// Server sub-error code
    pub server_sub_error_code: String,
    /// Age of the refresh token used, as reported by the server
    pub token_age: String,
    /// Server-side feature information
    pub spe_info: String,
}

impl XmsCliTelemInfo {
    const SUPPORTED_VERSION: &'static str = "1";
    const EXPECTED_FIELDS: usize = 5;

    /// Parse the header value; unsupported formats are logged and ignored
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        if header.is_empty() {
            return None;
        }

        let fields: Vec<&str> = header.split(',').map(str::trim).collect();
        if fields[0] != Self::SUPPORTED_VERSION {
            warn!(header = %header, "Unsupported x-ms-clitelem header version");
            return None;
        }
        if fields.len() != Self::EXPECTED_FIELDS {
            warn!(
                header = %header,
                fields = fields.len(),
                "Malformed x-ms-clitelem header"
            );
            return None;
        }

        Some(Self {
            version: fields[0].to_string(),
            server_error_code: fields[1].to_string(),
            server_sub_error_code: fields[2].to_string(),
            token_age: fields[3].to_string(),
            spe_info: fields[4].to_string(),
        })
    }
}
