//! Alias-aware token cache
//!
//! Writes normalize the `environment` of every item to the preferred cache
//! alias of the authority's directory. Reads resolve the requested authority to
//! that same alias and match it exactly, so a token stored while talking to one
//! alias is found through any other alias of the same directory without
//! scanning alias sets.
//!
//! With a [`TokenCachePersistence`] configured, every operation loads the
//! persisted blob, works on it and saves it back while holding one async lock,
//! so a persisted cache has a single writer at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::client_info::{ClientInfo, IdTokenClaims};
use super::items::{
    Account, AccessTokenCacheItem, AccessTokenKey, AccountCacheItem, AccountKey, IdTokenCacheItem,
    IdTokenKey, LegacyCacheEntry, LegacyKey, RefreshTokenCacheItem, RefreshTokenKey, ScopeSet,
    TokenSecret,
};
use crate::context::RequestContext;
use crate::error::{IdentityError, Result};
use crate::instance::{Authority, InstanceDiscoveryCache};
use crate::oauth2::TokenResponse;

/// Lifetime assumed when a token response has no `expires_in`
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Durable storage for the serialized cache
#[async_trait]
pub trait TokenCachePersistence: Send + Sync + fmt::Debug {
    /// Load the last saved blob, if any
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the saved blob
    async fn save(&self, data: Vec<u8>) -> Result<()>;
}

/// Items written by one [`TokenCache::save_token_response`] call
#[derive(Debug, Clone)]
pub struct CachedTokens {
    /// Stored access token
    pub access_token: AccessTokenCacheItem,
    /// Stored id token
    pub id_token: Option<IdTokenCacheItem>,
    /// Account the tokens belong to
    pub account: Account,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheSnapshot {
    #[serde(default)]
    access_tokens: Vec<AccessTokenCacheItem>,
    #[serde(default)]
    refresh_tokens: Vec<RefreshTokenCacheItem>,
    #[serde(default)]
    id_tokens: Vec<IdTokenCacheItem>,
    #[serde(default)]
    accounts: Vec<AccountCacheItem>,
    #[serde(default)]
    legacy: Vec<LegacyCacheEntry>,
}

#[derive(Debug, Default)]
struct CacheItems {
    access_tokens: HashMap<AccessTokenKey, AccessTokenCacheItem>,
    refresh_tokens: HashMap<RefreshTokenKey, RefreshTokenCacheItem>,
    id_tokens: HashMap<IdTokenKey, IdTokenCacheItem>,
    accounts: HashMap<AccountKey, AccountCacheItem>,
    legacy: HashMap<LegacyKey, LegacyCacheEntry>,
}

impl CacheItems {
    fn from_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            access_tokens: snapshot
                .access_tokens
                .into_iter()
                .map(|item| (item.key(), item))
                .collect(),
            refresh_tokens: snapshot
                .refresh_tokens
                .into_iter()
                .map(|item| (item.key(), item))
                .collect(),
            id_tokens: snapshot
                .id_tokens
                .into_iter()
                .map(|item| (item.key(), item))
                .collect(),
            accounts: snapshot
                .accounts
                .into_iter()
                .map(|item| (item.key(), item))
                .collect(),
            legacy: snapshot
                .legacy
                .into_iter()
                .map(|item| (item.key(), item))
                .collect(),
        }
    }

    fn to_snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            access_tokens: self.access_tokens.values().cloned().collect(),
            refresh_tokens: self.refresh_tokens.values().cloned().collect(),
            id_tokens: self.id_tokens.values().cloned().collect(),
            accounts: self.accounts.values().cloned().collect(),
            legacy: self.legacy.values().cloned().collect(),
        }
    }

    /// Realm of the stored account item, preferring the home tenant when the
    /// account is known in several realms
    fn home_realm(&self, account: &Account, environment: &str) -> Option<String> {
        let home_tenant = account.home_tenant_id();
        let mut realms: Vec<&str> = self
            .accounts
            .values()
            .filter(|item| {
                item.home_account_id == account.home_account_id && item.environment == environment
            })
            .map(|item| item.realm.as_str())
            .collect();
        realms.sort_unstable();

        realms
            .iter()
            .find(|realm| Some(**realm) == home_tenant)
            .or(realms.first())
            .map(|realm| realm.to_string())
            .or_else(|| home_tenant.map(str::to_string))
    }
}

/// In-memory token cache
pub struct TokenCache {
    discovery: Arc<InstanceDiscoveryCache>,
    items: RwLock<CacheItems>,
    persistence: Option<Arc<dyn TokenCachePersistence>>,
    persistence_lock: Mutex<()>,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.items.read();
        f.debug_struct("TokenCache")
            .field("access_tokens", &items.access_tokens.len())
            .field("refresh_tokens", &items.refresh_tokens.len())
            .field("id_tokens", &items.id_tokens.len())
            .field("accounts", &items.accounts.len())
            .field("legacy", &items.legacy.len())
            .field("persistence", &self.persistence.is_some())
            .finish()
    }
}

impl TokenCache {
    /// Create an empty cache resolving environments through `discovery`
    pub fn new(discovery: Arc<InstanceDiscoveryCache>) -> Self {
        Self {
            discovery,
            items: RwLock::new(CacheItems::default()),
            persistence: None,
            persistence_lock: Mutex::new(()),
        }
    }

    /// Load before reads and save after writes through `persistence`
    pub fn with_persistence(mut self, persistence: Arc<dyn TokenCachePersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    async fn preferred_environment(
        &self,
        authority: &Authority,
        ctx: &RequestContext,
    ) -> Result<String> {
        Ok(self
            .discovery
            .metadata_for(authority.info(), ctx)
            .await?
            .preferred_cache
            .clone())
    }

    /// Store a token response under the preferred cache alias of `authority`
    ///
    /// Access tokens of the same account, realm and client whose scopes overlap
    /// the new token are replaced.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Deserialization`] when the response identifies no account
    /// - discovery errors while resolving the preferred cache alias
    /// - [`IdentityError::Cache`] when persistence fails
    pub async fn save_token_response(
        &self,
        authority: &Authority,
        client_id: &str,
        requested_scopes: &ScopeSet,
        response: &TokenResponse,
        ctx: &RequestContext,
    ) -> Result<CachedTokens> {
        let environment = self.preferred_environment(authority, ctx).await?;

        let client_info = response
            .client_info
            .as_deref()
            .map(ClientInfo::from_encoded)
            .transpose()?;
        let claims = response
            .id_token
            .as_deref()
            .map(IdTokenClaims::from_jwt)
            .transpose()?
            .unwrap_or_default();

        let home_account_id = match (&client_info, claims.object_id(), claims.tid.as_deref()) {
            (Some(info), _, _) => info.home_account_id(),
            (None, Some(oid), Some(tid)) => format!("{}.{}", oid, tid),
            _ => {
                return Err(IdentityError::Deserialization(
                    "Token response carries neither client_info nor an id_token with oid and tid"
                        .to_string(),
                ));
            }
        };

        let realm = claims
            .tid
            .clone()
            .or_else(|| client_info.as_ref().map(|info| info.utid.clone()))
            .or_else(|| authority.tenant_id().map(str::to_string))
            .unwrap_or_default();

        let scopes = match response.scope.as_deref() {
            Some(granted) if !ScopeSet::parse(granted).is_empty() => ScopeSet::parse(granted),
            _ => requested_scopes.clone(),
        };

        let now = Utc::now();
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let access_token = AccessTokenCacheItem {
            home_account_id: home_account_id.clone(),
            environment: environment.clone(),
            client_id: client_id.to_string(),
            realm: realm.clone(),
            scopes,
            secret: TokenSecret::new(response.access_token.clone()),
            cached_at: now,
            expires_on: now + Duration::seconds(expires_in as i64),
            extended_expires_on: response
                .ext_expires_in
                .map(|ext| now + Duration::seconds(ext as i64)),
        };

        let refresh_token = response.refresh_token.as_ref().map(|secret| {
            let item = RefreshTokenCacheItem {
                home_account_id: home_account_id.clone(),
                environment: environment.clone(),
                client_id: client_id.to_string(),
                secret: TokenSecret::new(secret.clone()),
            };
            let legacy = LegacyCacheEntry {
                authority: format!("https://{}/{}/", environment, realm),
                client_id: client_id.to_string(),
                home_account_id: home_account_id.clone(),
                refresh_token: TokenSecret::new(secret.clone()),
            };
            (item, legacy)
        });

        let id_token = response.id_token.as_ref().map(|secret| IdTokenCacheItem {
            home_account_id: home_account_id.clone(),
            environment: environment.clone(),
            client_id: client_id.to_string(),
            realm: realm.clone(),
            secret: TokenSecret::new(secret.clone()),
        });

        let account = AccountCacheItem {
            home_account_id,
            environment,
            realm,
            local_account_id: claims.object_id().map(str::to_string),
            username: claims.preferred_username.clone(),
        };

        let _guard = self.load_persisted().await?;
        {
            let mut items = self.items.write();
            items.access_tokens.retain(|_, item| {
                !(item.home_account_id == access_token.home_account_id
                    && item.environment == access_token.environment
                    && item.client_id == access_token.client_id
                    && item.realm == access_token.realm
                    && item.scopes.intersects(&access_token.scopes))
            });
            items
                .access_tokens
                .insert(access_token.key(), access_token.clone());

            if let Some((item, legacy)) = refresh_token {
                items.refresh_tokens.insert(item.key(), item);
                items.legacy.insert(legacy.key(), legacy);
            }
            if let Some(ref item) = id_token {
                items.id_tokens.insert(item.key(), item.clone());
            }
            items.accounts.insert(account.key(), account.clone());
        }

        debug!(
            environment = %account.environment,
            realm = %account.realm,
            scopes = %access_token.scopes,
            "Saved token response to cache"
        );

        self.persist().await?;

        Ok(CachedTokens {
            access_token,
            id_token,
            account: account.to_account(),
        })
    }

    /// Find an unexpired access token covering `scopes`
    ///
    /// For tenant-less authorities the realm recorded for the account is used,
    /// falling back to its home tenant.
    ///
    /// # Errors
    ///
    /// Discovery errors while resolving the preferred cache alias, or
    /// [`IdentityError::Cache`] when loading from persistence fails.
    pub async fn find_access_token(
        &self,
        authority: &Authority,
        client_id: &str,
        account: &Account,
        scopes: &ScopeSet,
        ctx: &RequestContext,
    ) -> Result<Option<AccessTokenCacheItem>> {
        let environment = self.preferred_environment(authority, ctx).await?;
        let _guard = self.load_persisted().await?;
        let items = self.items.read();

        let realm = if authority.is_tenantless() {
            items.home_realm(account, &environment)
        } else {
            authority.tenant_id().map(str::to_string)
        };
        let Some(realm) = realm else {
            return Ok(None);
        };

        let now = Utc::now();
        let mut expired = 0usize;
        let found = items
            .access_tokens
            .values()
            .filter(|item| {
                item.home_account_id == account.home_account_id
                    && item.environment == environment
                    && item.client_id == client_id
                    && item.realm.eq_ignore_ascii_case(&realm)
                    && item.scopes.is_superset_of(scopes)
            })
            .find_map(|item| {
                if item.is_expired_at(now) {
                    expired += 1;
                    None
                } else {
                    Some(item.clone())
                }
            });

        debug!(
            environment = %environment,
            realm = %realm,
            hit = found.is_some(),
            expired,
            "Access token cache lookup"
        );

        Ok(found)
    }

    /// Id token stored alongside `access_token`
    pub fn find_id_token(&self, access_token: &AccessTokenCacheItem) -> Option<IdTokenCacheItem> {
        let key = IdTokenKey {
            home_account_id: access_token.home_account_id.clone(),
            environment: access_token.environment.clone(),
            client_id: access_token.client_id.clone(),
            realm: access_token.realm.clone(),
        };
        self.items.read().id_tokens.get(&key).cloned()
    }

    /// Find the refresh token for `account`
    ///
    /// Normalized entries are matched under the preferred cache alias. Legacy
    /// entries are matched only when their host equals the authority host.
    ///
    /// # Errors
    ///
    /// Discovery errors while resolving the preferred cache alias, or
    /// [`IdentityError::Cache`] when loading from persistence fails.
    pub async fn find_refresh_token(
        &self,
        authority: &Authority,
        client_id: &str,
        account: &Account,
        ctx: &RequestContext,
    ) -> Result<Option<TokenSecret>> {
        let environment = self.preferred_environment(authority, ctx).await?;
        let _guard = self.load_persisted().await?;
        let items = self.items.read();

        let key = RefreshTokenKey {
            home_account_id: account.home_account_id.clone(),
            environment,
            client_id: client_id.to_string(),
        };
        if let Some(item) = items.refresh_tokens.get(&key) {
            return Ok(Some(item.secret.clone()));
        }

        let host = authority.host();
        let legacy = items
            .legacy
            .values()
            .find(|item| {
                item.client_id == client_id
                    && item.home_account_id == account.home_account_id
                    && item.host().as_deref() == Some(host)
            })
            .map(|item| item.refresh_token.clone());

        if legacy.is_some() {
            debug!(host = %host, "Using legacy refresh token");
        }

        Ok(legacy)
    }

    /// Accounts in the cache, optionally restricted to the directory of `authority`
    ///
    /// # Errors
    ///
    /// Discovery errors while resolving the preferred cache alias, or
    /// [`IdentityError::Cache`] when loading from persistence fails.
    pub async fn get_accounts(
        &self,
        authority: Option<&Authority>,
        ctx: &RequestContext,
    ) -> Result<Vec<Account>> {
        let environment = match authority {
            Some(authority) => Some(self.preferred_environment(authority, ctx).await?),
            None => None,
        };
        let _guard = self.load_persisted().await?;

        let mut accounts: Vec<Account> = self
            .items
            .read()
            .accounts
            .values()
            .filter(|item| environment.as_deref().is_none_or(|env| item.environment == env))
            .map(AccountCacheItem::to_account)
            .collect();

        accounts.sort_by(|a, b| {
            (&a.environment, &a.home_account_id).cmp(&(&b.environment, &b.home_account_id))
        });
        accounts.dedup_by(|a, b| {
            a.home_account_id == b.home_account_id && a.environment == b.environment
        });

        Ok(accounts)
    }

    /// Remove every item belonging to `account`
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Cache`] when persistence fails.
    pub async fn remove_account(&self, account: &Account) -> Result<()> {
        let _guard = self.load_persisted().await?;

        let owned = |home_account_id: &str, environment: &str| {
            home_account_id == account.home_account_id && environment == account.environment
        };
        {
            let mut items = self.items.write();
            items
                .access_tokens
                .retain(|_, item| !owned(&item.home_account_id, &item.environment));
            items
                .refresh_tokens
                .retain(|_, item| !owned(&item.home_account_id, &item.environment));
            items
                .id_tokens
                .retain(|_, item| !owned(&item.home_account_id, &item.environment));
            items
                .accounts
                .retain(|_, item| !owned(&item.home_account_id, &item.environment));
            items
                .legacy
                .retain(|_, item| item.home_account_id != account.home_account_id);
        }

        debug!(environment = %account.environment, "Removed account from cache");

        self.persist().await
    }

    /// Serialize the whole cache to JSON
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Cache`] if serialization fails
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let snapshot = self.items.read().to_snapshot();
        serde_json::to_vec(&snapshot).map_err(|e| IdentityError::Cache(e.to_string()))
    }

    /// Replace the cache contents with a serialized snapshot
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Cache`] if `data` is not a cache snapshot; the
    /// current contents are kept in that case.
    pub fn deserialize(&self, data: &[u8]) -> Result<()> {
        let snapshot: CacheSnapshot =
            serde_json::from_slice(data).map_err(|e| IdentityError::Cache(e.to_string()))?;
        let items = CacheItems::from_snapshot(snapshot);
        *self.items.write() = items;
        Ok(())
    }

    /// Drop every item
    pub fn clear(&self) {
        *self.items.write() = CacheItems::default();
    }

    /// Insert an entry in the pre-normalization format
    pub fn add_legacy_entry(&self, entry: LegacyCacheEntry) {
        self.items.write().legacy.insert(entry.key(), entry);
    }

    /// All access tokens
    pub fn all_access_tokens(&self) -> Vec<AccessTokenCacheItem> {
        self.items.read().access_tokens.values().cloned().collect()
    }

    /// All refresh tokens
    pub fn all_refresh_tokens(&self) -> Vec<RefreshTokenCacheItem> {
        self.items.read().refresh_tokens.values().cloned().collect()
    }

    /// All id tokens
    pub fn all_id_tokens(&self) -> Vec<IdTokenCacheItem> {
        self.items.read().id_tokens.values().cloned().collect()
    }

    /// All account items
    pub fn all_accounts(&self) -> Vec<AccountCacheItem> {
        self.items.read().accounts.values().cloned().collect()
    }

    /// All legacy entries
    pub fn legacy_entries(&self) -> Vec<LegacyCacheEntry> {
        self.items.read().legacy.values().cloned().collect()
    }

    // Returns the guard that keeps other persisted operations out until the
    // caller has saved its changes
    async fn load_persisted(&self) -> Result<Option<MutexGuard<'_, ()>>> {
        let Some(ref persistence) = self.persistence else {
            return Ok(None);
        };
        let guard = self.persistence_lock.lock().await;
        if let Some(data) = persistence.load().await? {
            self.deserialize(&data)?;
        }
        Ok(Some(guard))
    }

    async fn persist(&self) -> Result<()> {
        let Some(ref persistence) = self.persistence else {
            return Ok(());
        };
        let data = self.serialize()?;
        persistence.save(data).await.inspect_err(|e| {
            warn!(error = %e, "Failed to persist token cache");
        })
    }
}
