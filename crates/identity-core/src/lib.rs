//! # identity-core - OAuth2 / OpenID Connect Client Engine
//!
//! Client-side engine for Microsoft identity platform authentication: authority
//! resolution, instance discovery with alias caching, an OAuth2 protocol client
//! with a precise error taxonomy, and a token cache that stays consistent
//! across environment aliases.
//!
//! ## Key Features
//!
//! - **Authority model** - canonical AAD and B2C authorities, ADFS rejection,
//!   tenant extraction and rewriting
//! - **Instance discovery** - alias index shared by every alias of a directory,
//!   populated atomically per response
//! - **Endpoint resolution** - OpenID configuration lookup with a validated
//!   authority cache
//! - **Protocol client** - correlation id echo, `invalid_grant` as UI-required,
//!   non-parsable error detection, server telemetry parsing
//! - **Token cache** - every item keyed by the preferred cache alias, so a token
//!   cached through `login.windows.net` is found through `login.microsoftonline.com`
//!
//! ## Architecture
//!
//! - [`config`] - [`ApplicationConfig`] and [`HttpConfig`]
//! - [`error`] - [`IdentityError`] taxonomy
//! - [`context`] - per-request [`RequestContext`] (correlation id, cancellation, timeout)
//! - [`transport`] - [`HttpTransport`] seam and the default [`ReqwestTransport`]
//! - [`instance`] - authorities, instance discovery and OpenID configuration
//! - [`oauth2`] - protocol client, wire types and telemetry events
//! - [`cache`] - alias-aware token cache
//! - [`bundle`] - [`ServiceBundle`] owning the shared collaborators
//! - [`application`] - [`PublicClientApplication`] token acquisition pipeline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use identity_core::{ApplicationConfig, PublicClientApplication, ServiceBundle};
//!
//! # async fn example() -> identity_core::Result<()> {
//! let config = ApplicationConfig::new("d3adb33f-c0de-ed0c-c0de-deadb33fc0d3")
//!     .with_authority("https://login.windows.net/common/", true);
//!
//! let bundle = Arc::new(ServiceBundle::create_default(config)?);
//! let app = PublicClientApplication::new(bundle);
//!
//! let ctx = app.request_context();
//! let result = app
//!     .acquire_token_by_authorization_code(&["User.Read"], "auth-code", Some("http://localhost"), &ctx)
//!     .await?;
//!
//! // Later: served from the cache, whichever alias is named
//! let silent = app
//!     .acquire_token_silent(
//!         &["User.Read"],
//!         &result.account,
//!         Some("https://login.microsoftonline.com/common/"),
//!         false,
//!         &app.request_context(),
//!     )
//!     .await?;
//! assert!(silent.from_cache);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! | Error | Meaning | Caller action |
//! |---|---|---|
//! | [`IdentityError::UiRequired`] | `invalid_grant`, empty cache | interactive sign-in |
//! | [`IdentityError::Service`] | other OAuth2 errors | retry if [`IdentityError::is_retryable`] |
//! | [`IdentityError::NonParsableOAuthError`] | response outside the OAuth2 contract | fail |
//! | [`IdentityError::InvalidAuthorityType`] | ADFS or conflicting configuration | fix configuration |
//! | [`IdentityError::Transport`] | network failure | retry policy |
//!
//! ## Logging
//!
//! All diagnostics are emitted through [`tracing`] with structured fields
//! (`correlation_id`, `host`, `endpoint`, `status`). The library never installs
//! a subscriber.

pub mod application;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod instance;
pub mod oauth2;
pub mod transport;

pub use application::{AuthenticationResult, PublicClientApplication};
pub use bundle::ServiceBundle;
pub use cache::{Account, ScopeSet, TokenCache, TokenCachePersistence};
pub use config::{ApplicationConfig, HttpConfig};
pub use context::RequestContext;
pub use error::{IdentityError, Result, ServiceError};
pub use instance::{Authority, AuthorityInfo, AuthorityType, InstanceDiscoveryCache};
pub use oauth2::{HttpEvent, NoopTelemetry, OAuth2Client, TelemetryReceiver};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};
