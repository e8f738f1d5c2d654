//! # Instance Discovery Cache
//!
//! Caches the environment metadata returned by the AAD instance discovery
//! endpoint. A discovery response lists one or more directories, each with a
//! preferred network host, a preferred cache host and a set of aliases. Every
//! alias is indexed to the same shared [`InstanceDiscoveryMetadata`] so that a
//! lookup through any alias resolves identically.
//!
//! ## Concurrency
//!
//! The alias index lives behind a single [`parking_lot::RwLock`]. A response is
//! parsed completely before the write lock is taken, and all of its alias
//! entries are inserted under that one lock. Readers therefore never observe a
//! partially indexed directory, and a cancelled or failed discovery call leaves
//! the cache untouched. No lock is held across an `.await`.
//!
//! ## Lifecycle
//!
//! Entries never expire. [`InstanceDiscoveryCache::clear_cache`] drops the
//! whole index at once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::authority::{AuthorityInfo, AuthorityType};
use super::trust;
use crate::context::RequestContext;
use crate::error::{IdentityError, Result, ServiceError, codes};
use crate::oauth2::{InstanceDiscoveryResponse, OAuth2ClientFactory};

/// Instance discovery API version
pub const DISCOVERY_API_VERSION: &str = "1.1";

/// Environment metadata for one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDiscoveryMetadata {
    /// Host used for outbound network calls
    pub preferred_network: String,
    /// Host used as the token cache partition key
    pub preferred_cache: String,
    /// Interchangeable hosts for the directory
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl InstanceDiscoveryMetadata {
    /// Metadata describing only `host` itself
    pub fn self_entry(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        Self {
            preferred_network: host.clone(),
            preferred_cache: host.clone(),
            aliases: vec![host],
        }
    }

    /// Lower-case every host and make both preferred hosts members of `aliases`
    pub fn normalized(self) -> Self {
        let preferred_network = self.preferred_network.to_ascii_lowercase();
        let preferred_cache = self.preferred_cache.to_ascii_lowercase();

        let mut seen = HashSet::new();
        let aliases = self
            .aliases
            .iter()
            .map(|alias| alias.to_ascii_lowercase())
            .chain([preferred_network.clone(), preferred_cache.clone()])
            .filter(|alias| !alias.is_empty() && seen.insert(alias.clone()))
            .collect();

        Self {
            preferred_network,
            preferred_cache,
            aliases,
        }
    }

    /// Whether `host` is one of the aliases (case-insensitive)
    pub fn contains_alias(&self, host: &str) -> bool {
        self.aliases
            .iter()
            .any(|alias| alias.eq_ignore_ascii_case(host))
    }
}

/// Outcome of [`InstanceDiscoveryCache::do_instance_discovery_and_cache`]
#[derive(Debug, Clone)]
pub struct InstanceDiscoveryResult {
    /// OpenID configuration endpoint for the tenant (network lookups only)
    pub tenant_discovery_endpoint: Option<String>,
    /// Metadata for the queried host
    pub metadata: Arc<InstanceDiscoveryMetadata>,
}

/// Discovery cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryCacheStats {
    /// Number of hosts in the alias index
    pub indexed_hosts: usize,
    /// Number of distinct metadata blocks
    pub distinct_entries: usize,
}

/// Process-wide alias index, owned by the service bundle
#[derive(Debug)]
pub struct InstanceDiscoveryCache {
    clients: OAuth2ClientFactory,
    discovery_endpoint: Option<Url>,
    entries: RwLock<HashMap<String, Arc<InstanceDiscoveryMetadata>>>,
}

impl InstanceDiscoveryCache {
    /// Create an empty cache
    ///
    /// `discovery_endpoint` overrides the well-known endpoint for every host.
    pub fn new(clients: OAuth2ClientFactory, discovery_endpoint: Option<Url>) -> Self {
        Self {
            clients,
            discovery_endpoint,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cache-only lookup by host (case-insensitive)
    pub fn get_metadata(&self, host: &str) -> Option<Arc<InstanceDiscoveryMetadata>> {
        self.entries
            .read()
            .get(&host.to_ascii_lowercase())
            .cloned()
    }

    /// Return cached metadata for the authority's host or query the discovery endpoint
    ///
    /// With `force_network_lookup = false` a cached entry is returned without
    /// any network call. Otherwise one discovery request is sent and every
    /// alias of every returned directory is indexed.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Service`] / [`IdentityError::UiRequired`] /
    ///   [`IdentityError::NonParsableOAuthError`] for error responses
    /// - [`IdentityError::Service`] with code `invalid_instance_discovery_response`
    ///   when a success body is not a discovery document
    /// - [`IdentityError::Transport`], [`IdentityError::Cancelled`] and
    ///   [`IdentityError::Timeout`] unchanged
    pub async fn do_instance_discovery_and_cache(
        &self,
        authority: &AuthorityInfo,
        force_network_lookup: bool,
        ctx: &RequestContext,
    ) -> Result<InstanceDiscoveryResult> {
        let host = authority.host().to_ascii_lowercase();

        if !force_network_lookup && let Some(metadata) = self.get_metadata(&host) {
            debug!(host = %host, "Instance discovery cache hit");
            return Ok(InstanceDiscoveryResult {
                tenant_discovery_endpoint: None,
                metadata,
            });
        }

        let response = self.send_discovery_request(authority, ctx).await?;
        let metadata = self.ingest(&host, response.metadata);

        Ok(InstanceDiscoveryResult {
            tenant_discovery_endpoint: response.tenant_discovery_endpoint,
            metadata,
        })
    }

    /// Metadata used to map an authority onto its preferred hosts
    ///
    /// Validated AAD authorities go through discovery (cached when possible).
    /// Anything else is served from the cache, falling back to an uncached self
    /// entry without touching the network.
    ///
    /// # Errors
    ///
    /// Same as [`InstanceDiscoveryCache::do_instance_discovery_and_cache`].
    pub async fn metadata_for(
        &self,
        authority: &AuthorityInfo,
        ctx: &RequestContext,
    ) -> Result<Arc<InstanceDiscoveryMetadata>> {
        if authority.validate_authority && authority.authority_type == AuthorityType::Aad {
            return Ok(self
                .do_instance_discovery_and_cache(authority, false, ctx)
                .await?
                .metadata);
        }

        Ok(self
            .get_metadata(authority.host())
            .unwrap_or_else(|| Arc::new(InstanceDiscoveryMetadata::self_entry(authority.host()))))
    }

    /// Drop every cached entry
    pub fn clear_cache(&self) {
        let mut entries = self.entries.write();
        debug!(count = entries.len(), "Clearing instance discovery cache");
        entries.clear();
    }

    /// Current cache statistics
    pub fn cache_stats(&self) -> DiscoveryCacheStats {
        let entries = self.entries.read();
        let distinct: HashSet<*const InstanceDiscoveryMetadata> =
            entries.values().map(Arc::as_ptr).collect();

        DiscoveryCacheStats {
            indexed_hosts: entries.len(),
            distinct_entries: distinct.len(),
        }
    }

    /// Discovery endpoint for `host`
    ///
    /// The configured override wins; trusted hosts are asked directly and
    /// everything else goes through the default trusted host.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if `host` does not form a valid URL
    pub fn discovery_endpoint_for(&self, host: &str) -> Result<Url> {
        if let Some(ref endpoint) = self.discovery_endpoint {
            return Ok(endpoint.clone());
        }

        let discovery_host = if trust::is_trusted_host(host) {
            host
        } else {
            trust::DEFAULT_TRUSTED_HOST
        };

        Ok(Url::parse(&format!(
            "https://{}/common/discovery/instance",
            discovery_host
        ))?)
    }

    async fn send_discovery_request(
        &self,
        authority: &AuthorityInfo,
        ctx: &RequestContext,
    ) -> Result<InstanceDiscoveryResponse> {
        let endpoint = self.discovery_endpoint_for(authority.host())?;
        let authorize_endpoint = format!("{}oauth2/v2.0/authorize", authority.canonical_authority());

        debug!(
            host = %authority.host(),
            endpoint = %endpoint,
            "Sending instance discovery request"
        );

        let mut client = self.clients.create();
        client.add_query_parameter("api-version", DISCOVERY_API_VERSION);
        client.add_query_parameter("authorization_endpoint", authorize_endpoint);

        match client.discover_aad_instance(&endpoint, ctx).await {
            Ok(response) => Ok(response),
            Err(IdentityError::Deserialization(detail)) => {
                warn!(host = %authority.host(), "Instance discovery response is not a discovery document");
                Err(IdentityError::Service(ServiceError::new(
                    200,
                    codes::INVALID_INSTANCE_DISCOVERY_RESPONSE,
                    detail,
                )))
            }
            Err(e) => {
                warn!(host = %authority.host(), error = %e, "Instance discovery failed");
                Err(e)
            }
        }
    }

    /// Index one discovery response under a single write lock
    fn ingest(
        &self,
        host: &str,
        metadata: Vec<InstanceDiscoveryMetadata>,
    ) -> Arc<InstanceDiscoveryMetadata> {
        let blocks: Vec<Arc<InstanceDiscoveryMetadata>> = metadata
            .into_iter()
            .map(|block| Arc::new(block.normalized()))
            .collect();

        let resolved = blocks
            .iter()
            .find(|block| block.contains_alias(host))
            .cloned()
            .unwrap_or_else(|| {
                debug!(host = %host, "Host absent from discovery response, caching self entry");
                Arc::new(InstanceDiscoveryMetadata::self_entry(host))
            });

        let mut entries = self.entries.write();
        for block in blocks.iter().chain(std::iter::once(&resolved)) {
            for alias in &block.aliases {
                entries.insert(alias.clone(), Arc::clone(block));
            }
        }

        debug!(
            host = %host,
            directories = blocks.len(),
            indexed_hosts = entries.len(),
            "Cached instance discovery metadata"
        );

        resolved
    }
}
