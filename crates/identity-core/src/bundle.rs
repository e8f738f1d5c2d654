//! Service bundle
//!
//! Owns the shared collaborators of one application: configuration, HTTP
//! transport, telemetry sink, the instance discovery cache and the validated
//! authority endpoint cache. Components receive what they need from the bundle
//! instead of reaching for process-wide globals, so two bundles never share
//! cached state.

use std::sync::Arc;

use url::Url;

use crate::config::ApplicationConfig;
use crate::error::{IdentityError, Result};
use crate::instance::{AuthorityEndpointResolver, InstanceDiscoveryCache};
use crate::oauth2::{NoopTelemetry, OAuth2Client, OAuth2ClientFactory, TelemetryReceiver};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Shared collaborators for one application
#[derive(Debug)]
pub struct ServiceBundle {
    config: ApplicationConfig,
    clients: OAuth2ClientFactory,
    discovery: Arc<InstanceDiscoveryCache>,
    endpoints: AuthorityEndpointResolver,
}

impl ServiceBundle {
    /// Create a bundle with an explicit transport and no telemetry
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] if `config` is invalid
    pub fn new(config: ApplicationConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        Self::with_telemetry(config, transport, Arc::new(NoopTelemetry))
    }

    /// Create a bundle with an explicit transport and telemetry sink
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] if `config` is invalid
    pub fn with_telemetry(
        config: ApplicationConfig,
        transport: Arc<dyn HttpTransport>,
        telemetry: Arc<dyn TelemetryReceiver>,
    ) -> Result<Self> {
        config.validate()?;

        let discovery_endpoint = config
            .instance_discovery_endpoint
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| IdentityError::Configuration(e.to_string()))?;

        let clients = OAuth2ClientFactory::new(transport, telemetry)
            .with_user_agent(config.http.user_agent.clone());
        let discovery = Arc::new(InstanceDiscoveryCache::new(
            clients.clone(),
            discovery_endpoint,
        ));
        let endpoints = AuthorityEndpointResolver::new(Arc::clone(&discovery), clients.clone());

        Ok(Self {
            config,
            clients,
            discovery,
            endpoints,
        })
    }

    /// Create a bundle using the default reqwest transport
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] if `config` is invalid, or
    /// [`IdentityError::Transport`] if the HTTP client cannot be built
    pub fn create_default(config: ApplicationConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config.http)?;
        Self::new(config, Arc::new(transport))
    }

    /// Application configuration
    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    /// Instance discovery cache
    pub fn discovery(&self) -> &Arc<InstanceDiscoveryCache> {
        &self.discovery
    }

    /// Validated authority endpoint cache
    pub fn endpoint_resolver(&self) -> &AuthorityEndpointResolver {
        &self.endpoints
    }

    /// Factory for protocol clients
    pub fn client_factory(&self) -> &OAuth2ClientFactory {
        &self.clients
    }

    /// A fresh protocol client
    pub fn oauth2_client(&self) -> OAuth2Client {
        self.clients.create()
    }

    /// Reset the discovery and endpoint caches
    pub fn clear_caches(&self) {
        self.discovery.clear_cache();
        self.endpoints.clear_cache();
    }
}
