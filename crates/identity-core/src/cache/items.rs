//! Token cache items and their identity keys.
//!
//! Every item carries an `environment`, which is always the preferred cache
//! alias of its directory. Keys are precise enough that concurrent writes for
//! different accounts, realms or scope sets never address the same entry.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Access tokens expiring within this many seconds are treated as expired
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// Scopes added to every request and never used for token matching
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Credential value with a redacted `Debug`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);

impl TokenSecret {
    /// Wrap a credential
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The credential value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// Normalized scope set: lower-cased, trimmed, de-duplicated, sorted, reserved scopes removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Normalize a list of scopes
    pub fn from_scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            scopes
                .into_iter()
                .flat_map(|scope| {
                    scope
                        .as_ref()
                        .split_whitespace()
                        .map(str::to_ascii_lowercase)
                        .collect::<Vec<_>>()
                })
                .filter(|scope| !RESERVED_SCOPES.contains(&scope.as_str()))
                .collect(),
        )
    }

    /// Normalize a space separated scope string
    pub fn parse(scopes: &str) -> Self {
        Self::from_scopes([scopes])
    }

    /// Whether every scope in `other` is present
    pub fn is_superset_of(&self, other: &ScopeSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Whether at least one scope is shared
    pub fn intersects(&self, other: &ScopeSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scopes in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(" "))
    }
}

/// Access token key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessTokenKey {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub realm: String,
    pub scopes: ScopeSet,
}

/// Refresh token key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefreshTokenKey {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
}

/// Id token key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdTokenKey {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub realm: String,
}

/// Account key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountKey {
    pub home_account_id: String,
    pub environment: String,
    pub realm: String,
}

/// Legacy entry key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegacyKey {
    pub authority: String,
    pub client_id: String,
    pub home_account_id: String,
}

/// Cached access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenCacheItem {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub realm: String,
    pub scopes: ScopeSet,
    pub secret: TokenSecret,
    pub cached_at: DateTime<Utc>,
    pub expires_on: DateTime<Utc>,
    #[serde(default)]
    pub extended_expires_on: Option<DateTime<Utc>>,
}

impl AccessTokenCacheItem {
    /// Identity key
    pub fn key(&self) -> AccessTokenKey {
        AccessTokenKey {
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            client_id: self.client_id.clone(),
            realm: self.realm.clone(),
            scopes: self.scopes.clone(),
        }
    }

    /// Whether the token expires within [`EXPIRY_SKEW_SECS`] of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_on <= now + Duration::seconds(EXPIRY_SKEW_SECS)
    }
}

/// Cached refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenCacheItem {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub secret: TokenSecret,
}

impl RefreshTokenCacheItem {
    /// Identity key
    pub fn key(&self) -> RefreshTokenKey {
        RefreshTokenKey {
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            client_id: self.client_id.clone(),
        }
    }
}

/// Cached id token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenCacheItem {
    pub home_account_id: String,
    pub environment: String,
    pub client_id: String,
    pub realm: String,
    pub secret: TokenSecret,
}

impl IdTokenCacheItem {
    /// Identity key
    pub fn key(&self) -> IdTokenKey {
        IdTokenKey {
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            client_id: self.client_id.clone(),
            realm: self.realm.clone(),
        }
    }
}

/// Cached account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCacheItem {
    pub home_account_id: String,
    pub environment: String,
    pub realm: String,
    #[serde(default)]
    pub local_account_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl AccountCacheItem {
    /// Identity key
    pub fn key(&self) -> AccountKey {
        AccountKey {
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            realm: self.realm.clone(),
        }
    }

    /// Public view of the account
    pub fn to_account(&self) -> Account {
        Account {
            home_account_id: self.home_account_id.clone(),
            environment: self.environment.clone(),
            username: self.username.clone(),
        }
    }
}

/// Entry written in the pre-normalization format
///
/// The authority is stored exactly as it was used and is only ever matched by
/// exact host equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCacheEntry {
    pub authority: String,
    pub client_id: String,
    pub home_account_id: String,
    pub refresh_token: TokenSecret,
}

impl LegacyCacheEntry {
    /// Identity key
    pub fn key(&self) -> LegacyKey {
        LegacyKey {
            authority: self.authority.clone(),
            client_id: self.client_id.clone(),
            home_account_id: self.home_account_id.clone(),
        }
    }

    /// Host of the stored authority, lower-cased
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.authority)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
    }
}

/// Account as seen by applications
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// `<uid>.<utid>` identifier
    pub home_account_id: String,
    /// Preferred cache alias the account was stored under
    pub environment: String,
    /// Sign-in name
    pub username: Option<String>,
}

impl Account {
    /// Home tenant, the part after the last `.` of the home account id
    pub fn home_tenant_id(&self) -> Option<&str> {
        self.home_account_id
            .rsplit_once('.')
            .map(|(_, tenant)| tenant)
            .filter(|tenant| !tenant.is_empty())
    }
}
