//! # Authority Resolution
//!
//! Everything needed to turn an authority URL supplied by the caller into the
//! endpoints a token request is sent to:
//!
//! - [`trust`] - static trusted host table and tenant-less tenant names
//! - [`authority`] - canonical [`AuthorityInfo`] and the [`Authority`] variants
//! - [`discovery`] - the [`InstanceDiscoveryCache`] alias index
//! - [`openid`] - OpenID configuration endpoint location and the validated
//!   authority endpoint cache
//!
//! ## Resolution flow
//!
//! ```text
//! authority URL ──► AuthorityInfo ──► Authority::{Aad, B2C}
//!                                        │
//!                     untrusted + validated? ──► instance discovery (cached)
//!                                        │            │
//!                                        ▼            ▼
//!                          OpenID configuration ◄── preferred_network rewrite
//!                                        │
//!                                        ▼
//!                              AuthorityEndpoints (cached)
//! ```

pub mod authority;
pub mod discovery;
pub mod openid;
pub mod trust;

pub use authority::{Authority, AuthorityInfo, AuthorityType};
pub use discovery::{
    DiscoveryCacheStats, InstanceDiscoveryCache, InstanceDiscoveryMetadata,
    InstanceDiscoveryResult,
};
pub use openid::{AuthorityEndpointResolver, AuthorityEndpoints, OpenIdConfigurationEndpointManager};
pub use trust::{is_tenantless, is_trusted_host};
