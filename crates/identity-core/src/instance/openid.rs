//! OpenID configuration resolution
//!
//! [`OpenIdConfigurationEndpointManager`] decides where the OpenID
//! configuration document for an authority lives. For validated authorities on
//! untrusted hosts that location comes from a forced instance discovery call;
//! for everything else it is derived directly from the canonical authority.
//!
//! [`AuthorityEndpointResolver`] fetches that document and caches the resulting
//! [`AuthorityEndpoints`] per canonical authority, so repeat requests against
//! an already validated authority make no network calls.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};
use url::Url;

use super::authority::{Authority, AuthorityInfo, AuthorityType};
use super::discovery::InstanceDiscoveryCache;
use super::trust;
use crate::context::RequestContext;
use crate::error::{IdentityError, Result, ServiceError, codes};
use crate::oauth2::OAuth2ClientFactory;

/// Path of the OpenID configuration document relative to a canonical authority
pub const OPENID_CONFIGURATION_SUFFIX: &str = "v2.0/.well-known/openid-configuration";

const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Locates the OpenID configuration document for an authority
#[derive(Debug, Clone)]
pub struct OpenIdConfigurationEndpointManager {
    discovery: Arc<InstanceDiscoveryCache>,
}

impl OpenIdConfigurationEndpointManager {
    /// Create a manager backed by the shared discovery cache
    pub fn new(discovery: Arc<InstanceDiscoveryCache>) -> Self {
        Self { discovery }
    }

    /// OpenID configuration endpoint for `authority`
    ///
    /// # Errors
    ///
    /// Propagates discovery failures, and returns [`IdentityError::Service`] with
    /// code `missing_tenant_discovery_endpoint` when discovery names no endpoint.
    pub async fn get_openid_configuration_endpoint(
        &self,
        authority: &AuthorityInfo,
        ctx: &RequestContext,
    ) -> Result<String> {
        if authority.validate_authority
            && authority.authority_type == AuthorityType::Aad
            && !trust::is_trusted_host(authority.host())
        {
            let result = self
                .discovery
                .do_instance_discovery_and_cache(authority, true, ctx)
                .await?;

            return result.tenant_discovery_endpoint.ok_or_else(|| {
                IdentityError::Service(ServiceError::new(
                    200,
                    codes::MISSING_TENANT_DISCOVERY_ENDPOINT,
                    format!(
                        "Instance discovery returned no tenant_discovery_endpoint for {}",
                        authority.host()
                    ),
                ))
            });
        }

        Ok(format!(
            "{}{}",
            authority.canonical_authority(),
            OPENID_CONFIGURATION_SUFFIX
        ))
    }
}

/// Endpoints resolved from an OpenID configuration document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityEndpoints {
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Token issuer
    pub issuer: String,
}

/// Resolves and caches token-issuance endpoints per canonical authority
#[derive(Debug)]
pub struct AuthorityEndpointResolver {
    endpoint_manager: OpenIdConfigurationEndpointManager,
    clients: OAuth2ClientFactory,
    validated: DashMap<String, AuthorityEndpoints>,
}

impl AuthorityEndpointResolver {
    /// Create a resolver with an empty validated-authority cache
    pub fn new(discovery: Arc<InstanceDiscoveryCache>, clients: OAuth2ClientFactory) -> Self {
        Self {
            endpoint_manager: OpenIdConfigurationEndpointManager::new(discovery),
            clients,
            validated: DashMap::new(),
        }
    }

    /// Endpoint manager used for document location
    pub fn endpoint_manager(&self) -> &OpenIdConfigurationEndpointManager {
        &self.endpoint_manager
    }

    /// Resolve the endpoints for `authority`
    ///
    /// `{tenant}` placeholders in the document are replaced by the authority's tenant.
    ///
    /// # Errors
    ///
    /// Propagates discovery and protocol errors. A document that is not an
    /// OpenID configuration, or whose endpoints are not URLs, yields
    /// [`IdentityError::Service`] with code `invalid_openid_configuration`.
    pub async fn resolve_endpoints(
        &self,
        authority: &Authority,
        ctx: &RequestContext,
    ) -> Result<AuthorityEndpoints> {
        let key = authority.canonical_authority().to_string();
        if let Some(endpoints) = self.validated.get(&key) {
            debug!(authority = %key, "Using cached authority endpoints");
            return Ok(endpoints.clone());
        }

        let endpoint = self
            .endpoint_manager
            .get_openid_configuration_endpoint(authority.info(), ctx)
            .await?;
        let endpoint = Url::parse(&endpoint).map_err(|e| invalid_configuration(e.to_string()))?;

        let document = match self
            .clients
            .create()
            .get_openid_configuration(&endpoint, ctx)
            .await
        {
            Ok(document) => document,
            Err(IdentityError::Deserialization(detail)) => {
                warn!(endpoint = %endpoint, "OpenID configuration response is not a configuration document");
                return Err(invalid_configuration(detail));
            }
            Err(e) => return Err(e),
        };

        let tenant = authority.tenant_id().unwrap_or_default();
        let substitute = |value: &str| value.replace(TENANT_PLACEHOLDER, tenant);

        let endpoints = AuthorityEndpoints {
            authorization_endpoint: substitute(&document.authorization_endpoint),
            token_endpoint: substitute(&document.token_endpoint),
            issuer: substitute(&document.issuer),
        };

        for value in [&endpoints.authorization_endpoint, &endpoints.token_endpoint] {
            Url::parse(value).map_err(|e| {
                invalid_configuration(format!("Endpoint {:?} is not a valid URL: {}", value, e))
            })?;
        }

        debug!(
            authority = %key,
            token_endpoint = %endpoints.token_endpoint,
            "Resolved authority endpoints"
        );
        self.validated.insert(key, endpoints.clone());

        Ok(endpoints)
    }

    /// Forget every resolved authority
    pub fn clear_cache(&self) {
        self.validated.clear();
    }

    /// Number of resolved authorities
    pub fn cached_authorities(&self) -> usize {
        self.validated.len()
    }
}

fn invalid_configuration(detail: impl Into<String>) -> IdentityError {
    IdentityError::Service(ServiceError::new(
        200,
        codes::INVALID_OPENID_CONFIGURATION,
        detail,
    ))
}
