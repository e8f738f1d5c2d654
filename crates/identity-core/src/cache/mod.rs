//! # Token Cache
//!
//! Access, refresh and id tokens plus accounts, keyed by the preferred cache
//! alias of their directory.
//!
//! ## Alias handling
//!
//! | Operation | Environment used |
//! |---|---|
//! | write | `preferred_cache` of the authority's discovery metadata |
//! | read | `preferred_cache` of the requested authority, exact match |
//! | legacy read | raw host of the requested authority, exact match |
//!
//! Because every write is normalized, a read never needs to scan alias sets.

pub mod client_info;
pub mod items;
pub mod token_cache;

pub use client_info::{ClientInfo, IdTokenClaims};
pub use items::{
    Account, AccessTokenCacheItem, AccountCacheItem, IdTokenCacheItem, LegacyCacheEntry,
    RefreshTokenCacheItem, ScopeSet, TokenSecret,
};
pub use token_cache::{CachedTokens, TokenCache, TokenCachePersistence};
