//! Authority model
//!
//! An authority is the directory endpoint a request targets. The URL given by
//! the caller is normalized once into an [`AuthorityInfo`], and the variant
//! ([`Authority::Aad`] or [`Authority::B2C`]) is selected from its first path
//! segment. ADFS authorities are recognised so that they can be rejected.
//!
//! Canonical forms:
//!
//! - AAD: `https://host/tenant/`
//! - B2C: `https://host/tfp/tenant/policy/`

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::discovery::InstanceDiscoveryCache;
use super::trust;
use crate::config::ApplicationConfig;
use crate::context::RequestContext;
use crate::error::{IdentityError, Result};

const ADFS_SEGMENT: &str = "adfs";

/// Kind of authority, as determined by the first path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityType {
    /// Azure AD (including the tenant-less `common` endpoints)
    Aad,
    /// Azure AD B2C (`/tfp/<tenant>/<policy>/`)
    B2C,
    /// Active Directory Federation Services (unsupported)
    Adfs,
}

impl fmt::Display for AuthorityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aad => write!(f, "AAD"),
            Self::B2C => write!(f, "B2C"),
            Self::Adfs => write!(f, "ADFS"),
        }
    }
}

/// Normalized authority description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityInfo {
    /// Authority type
    pub authority_type: AuthorityType,
    /// Whether the host must be confirmed by instance discovery
    pub validate_authority: bool,
    canonical_authority: Url,
}

impl AuthorityInfo {
    /// Parse and normalize an authority URL
    ///
    /// The result always uses `https`, a lower-cased host, no query or fragment,
    /// and a path that ends with `/`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if the URL cannot be parsed, is
    /// not `https`, has no tenant segment, or is a B2C URL without a policy.
    pub fn from_authority_uri(
        authority_uri: &str,
        validate_authority: bool,
        b2c_policy_prefix: &str,
    ) -> Result<Self> {
        let url = Url::parse(authority_uri.trim())?;

        if url.scheme() != "https" {
            return Err(IdentityError::InvalidAuthority(format!(
                "Authority must use the https scheme: {}",
                authority_uri
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(IdentityError::InvalidAuthority(format!(
                "Authority has no host: {}",
                authority_uri
            )));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default();

        let Some(first) = segments.first() else {
            return Err(IdentityError::InvalidAuthority(format!(
                "Authority must contain a tenant: {}",
                authority_uri
            )));
        };

        let (authority_type, keep) = if first.eq_ignore_ascii_case(ADFS_SEGMENT) {
            (AuthorityType::Adfs, 1)
        } else if first.eq_ignore_ascii_case(b2c_policy_prefix) {
            if segments.len() < 3 {
                return Err(IdentityError::InvalidAuthority(format!(
                    "B2C authority must be of the form https://host/{}/tenant/policy/: {}",
                    b2c_policy_prefix, authority_uri
                )));
            }
            (AuthorityType::B2C, 3)
        } else {
            (AuthorityType::Aad, 1)
        };

        let mut canonical_authority = url.clone();
        canonical_authority.set_query(None);
        canonical_authority.set_fragment(None);
        // Userinfo never belongs in an authority; both setters only fail for
        // cannot-be-a-base URLs, which https URLs are not.
        let _ = canonical_authority.set_username("");
        let _ = canonical_authority.set_password(None);
        canonical_authority.set_path(&format!("/{}/", segments[..keep].join("/")));

        Ok(Self {
            authority_type,
            validate_authority,
            canonical_authority,
        })
    }

    /// Canonical authority URL, always ending with `/`
    pub fn canonical_authority(&self) -> &str {
        self.canonical_authority.as_str()
    }

    /// Canonical authority as a parsed URL
    pub fn canonical_url(&self) -> &Url {
        &self.canonical_authority
    }

    /// Lower-cased host (without port)
    pub fn host(&self) -> &str {
        self.canonical_authority.host_str().unwrap_or_default()
    }

    /// Non-empty path segments of the canonical authority
    pub fn path_segments(&self) -> Vec<&str> {
        self.canonical_authority
            .path_segments()
            .map(|s| s.filter(|segment| !segment.is_empty()).collect())
            .unwrap_or_default()
    }

    /// The same authority against another host
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if `host` is not a valid host name
    pub fn with_host(&self, host: &str) -> Result<Self> {
        let mut rewritten = self.clone();
        rewritten
            .canonical_authority
            .set_host(Some(&host.to_ascii_lowercase()))?;
        Ok(rewritten)
    }

    fn path_segment(&self, index: usize) -> Option<&str> {
        self.path_segments().get(index).copied()
    }

    fn replace_path_segment(&mut self, index: usize, value: &str) -> Result<()> {
        if value.is_empty() || value.contains('/') {
            return Err(IdentityError::InvalidAuthority(format!(
                "Invalid tenant id: {:?}",
                value
            )));
        }

        let mut segments: Vec<String> = self
            .path_segments()
            .into_iter()
            .map(str::to_string)
            .collect();
        let Some(slot) = segments.get_mut(index) else {
            return Err(IdentityError::InvalidAuthority(format!(
                "Authority has no path segment {} to replace: {}",
                index,
                self.canonical_authority()
            )));
        };
        *slot = value.to_string();

        self.canonical_authority
            .set_path(&format!("/{}/", segments.join("/")));
        Ok(())
    }
}

impl fmt::Display for AuthorityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_authority())
    }
}

/// Authority variant selected once at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authority {
    /// Azure AD authority
    Aad(AuthorityInfo),
    /// Azure AD B2C authority
    B2C(AuthorityInfo),
}

impl Authority {
    /// Build an authority from an explicit URL
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] for malformed URLs and
    /// [`IdentityError::InvalidAuthorityType`] for ADFS authorities or when the
    /// application default authority type is ADFS.
    pub fn create_authority(
        config: &ApplicationConfig,
        authority_uri: &str,
        validate_authority: bool,
    ) -> Result<Self> {
        let info = AuthorityInfo::from_authority_uri(
            authority_uri,
            validate_authority,
            &config.b2c_policy_prefix,
        )?;
        Self::create_with_override(config, info)
    }

    /// Build the application default authority
    ///
    /// # Errors
    ///
    /// Same as [`Authority::create_authority`].
    pub fn create_default(config: &ApplicationConfig) -> Result<Self> {
        Self::create_with_override(config, config.default_authority_info()?)
    }

    /// Build an authority from already-parsed info, checked against the application default
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthorityType`] when either the default
    /// authority type or `info` is ADFS.
    pub fn create_with_override(config: &ApplicationConfig, info: AuthorityInfo) -> Result<Self> {
        if config.default_authority_info()?.authority_type == AuthorityType::Adfs {
            return Err(IdentityError::InvalidAuthorityType(
                "ADFS is not a supported authority".to_string(),
            ));
        }

        match info.authority_type {
            AuthorityType::Aad => Ok(Self::Aad(info)),
            AuthorityType::B2C => Ok(Self::B2C(info)),
            AuthorityType::Adfs => Err(IdentityError::InvalidAuthorityType(format!(
                "ADFS is not a supported authority: {}",
                info.canonical_authority()
            ))),
        }
    }

    /// Shared authority description
    pub fn info(&self) -> &AuthorityInfo {
        match self {
            Self::Aad(info) | Self::B2C(info) => info,
        }
    }

    fn info_mut(&mut self) -> &mut AuthorityInfo {
        match self {
            Self::Aad(info) | Self::B2C(info) => info,
        }
    }

    /// Authority type
    pub fn authority_type(&self) -> AuthorityType {
        self.info().authority_type
    }

    /// Canonical authority URL
    pub fn canonical_authority(&self) -> &str {
        self.info().canonical_authority()
    }

    /// Lower-cased host
    pub fn host(&self) -> &str {
        self.info().host()
    }

    fn tenant_segment_index(&self) -> usize {
        match self {
            Self::Aad(_) => 0,
            Self::B2C(_) => 1,
        }
    }

    /// Tenant named by the authority; tenant-less names are returned as-is
    pub fn tenant_id(&self) -> Option<&str> {
        self.info().path_segment(self.tenant_segment_index())
    }

    /// Whether the authority names no concrete tenant (`common`, `organizations`, `consumers`)
    pub fn is_tenantless(&self) -> bool {
        self.tenant_id().is_none_or(trust::is_tenantless)
    }

    /// Replace the tenant segment unconditionally
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if `tenant_id` is empty or contains `/`
    pub fn update_tenant_id(&mut self, tenant_id: &str) -> Result<()> {
        let index = self.tenant_segment_index();
        self.info_mut().replace_path_segment(index, tenant_id)
    }

    /// Apply a discovered tenant only when the authority is tenant-less
    ///
    /// Returns whether the authority was rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if `tenant_id` is not a valid segment
    pub fn update_tenant_id_if_tenantless(&mut self, tenant_id: &str) -> Result<bool> {
        if !self.is_tenantless() {
            return Ok(false);
        }
        self.update_tenant_id(tenant_id)?;
        Ok(true)
    }

    /// The same authority against another host
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidAuthority`] if `host` is not a valid host name
    pub fn with_host(&self, host: &str) -> Result<Self> {
        Ok(match self {
            Self::Aad(info) => Self::Aad(info.with_host(host)?),
            Self::B2C(info) => Self::B2C(info.with_host(host)?),
        })
    }

    /// Rewrite the host to the discovered preferred network alias
    ///
    /// Only validated AAD authorities on untrusted hosts are rewritten. The
    /// lookup is served from the discovery cache when possible, so calling
    /// this twice without an intervening cache change yields the same result.
    ///
    /// # Errors
    ///
    /// Propagates instance discovery failures.
    pub async fn update_canonical_authority(
        &mut self,
        discovery: &InstanceDiscoveryCache,
        ctx: &RequestContext,
    ) -> Result<()> {
        let Self::Aad(info) = self else {
            return Ok(());
        };

        if !info.validate_authority || trust::is_trusted_host(info.host()) {
            return Ok(());
        }

        let result = discovery
            .do_instance_discovery_and_cache(info, false, ctx)
            .await?;
        let preferred_network = result.metadata.preferred_network.as_str();

        if !preferred_network.eq_ignore_ascii_case(info.host()) {
            debug!(
                from = %info.host(),
                to = %preferred_network,
                "Rewriting authority host to preferred network alias"
            );
            *info = info.with_host(preferred_network)?;
        }

        Ok(())
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} authority {}", self.authority_type(), self.canonical_authority())
    }
}
