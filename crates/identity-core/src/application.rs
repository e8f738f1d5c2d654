//! Token acquisition pipeline
//!
//! [`PublicClientApplication`] wires the authority model, instance discovery,
//! endpoint resolution, the protocol client and the token cache together:
//!
//! 1. the authority is built from configuration or the request
//! 2. validated authorities on untrusted hosts are rewritten to the preferred
//!    network alias
//! 3. the token endpoint is resolved from the OpenID configuration (cached per
//!    canonical authority)
//! 4. the token request is sent and classified
//! 5. the response is stored under the preferred cache alias
//!
//! Silent acquisition first consults the cache and only falls back to a
//! refresh token redemption when no usable access token is found.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::bundle::ServiceBundle;
use crate::cache::{Account, CachedTokens, ScopeSet, TokenCache, TokenSecret};
use crate::context::RequestContext;
use crate::error::{IdentityError, Result, codes};
use crate::instance::Authority;
use crate::oauth2::{grant_types, params};

/// Scopes sent with every token request
const DEFAULT_REQUEST_SCOPES: &str = "openid profile offline_access";

/// Outcome of a successful token acquisition
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    /// Access token
    pub access_token: TokenSecret,
    /// Id token, when one was issued
    pub id_token: Option<TokenSecret>,
    /// Signed-in account
    pub account: Account,
    /// Scopes the access token is valid for
    pub scopes: ScopeSet,
    /// Access token expiry
    pub expires_on: DateTime<Utc>,
    /// Tenant that issued the token
    pub tenant_id: Option<String>,
    /// Correlation id of the request
    pub correlation_id: Option<Uuid>,
    /// Whether the token was served from the cache
    pub from_cache: bool,
}

impl AuthenticationResult {
    fn from_cached(tokens: CachedTokens, correlation_id: Option<Uuid>, from_cache: bool) -> Self {
        let tenant_id = Some(tokens.access_token.realm.clone()).filter(|realm| !realm.is_empty());
        Self {
            access_token: tokens.access_token.secret,
            id_token: tokens.id_token.map(|item| item.secret),
            account: tokens.account,
            scopes: tokens.access_token.scopes,
            expires_on: tokens.access_token.expires_on,
            tenant_id,
            correlation_id,
            from_cache,
        }
    }
}

/// Public client application
#[derive(Debug, Clone)]
pub struct PublicClientApplication {
    bundle: Arc<ServiceBundle>,
    cache: Arc<TokenCache>,
}

impl PublicClientApplication {
    /// Create an application with an empty in-memory token cache
    pub fn new(bundle: Arc<ServiceBundle>) -> Self {
        let cache = Arc::new(TokenCache::new(Arc::clone(bundle.discovery())));
        Self { bundle, cache }
    }

    /// Create an application around an existing token cache
    pub fn with_token_cache(bundle: Arc<ServiceBundle>, cache: Arc<TokenCache>) -> Self {
        Self { bundle, cache }
    }

    /// Service bundle
    pub fn bundle(&self) -> &Arc<ServiceBundle> {
        &self.bundle
    }

    /// Token cache
    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Request context carrying this application's client id
    pub fn request_context(&self) -> RequestContext {
        RequestContext::new().with_client_id(self.bundle.config().client_id.clone())
    }

    /// Redeem an authorization code against the default authority
    ///
    /// `redirect_uri` falls back to the configured redirect URI.
    ///
    /// # Errors
    ///
    /// [`IdentityError::Configuration`] when no redirect URI is given or
    /// configured; authority, discovery, protocol and cache errors unchanged.
    pub async fn acquire_token_by_authorization_code(
        &self,
        scopes: &[&str],
        code: &str,
        redirect_uri: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult> {
        let config = self.bundle.config();
        let Some(redirect_uri) = redirect_uri.or(config.redirect_uri.as_deref()) else {
            return Err(IdentityError::Configuration(
                "redirect_uri is required to redeem an authorization code".to_string(),
            ));
        };
        let authority = Authority::create_default(config)?;
        let grant = [
            (params::GRANT_TYPE, grant_types::AUTHORIZATION_CODE.to_string()),
            (params::CODE, code.to_string()),
            (params::REDIRECT_URI, redirect_uri.to_string()),
        ];
        self.execute_token_request(authority, &ScopeSet::from_scopes(scopes), &grant, ctx)
            .await
    }

    /// Redeem a refresh token against the default authority
    ///
    /// # Errors
    ///
    /// Authority, discovery, protocol and cache errors, unchanged.
    pub async fn acquire_token_by_refresh_token(
        &self,
        scopes: &[&str],
        refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult> {
        let authority = Authority::create_default(self.bundle.config())?;
        self.redeem_refresh_token(authority, &ScopeSet::from_scopes(scopes), refresh_token, ctx)
            .await
    }

    /// Acquire a token without user interaction
    ///
    /// `authority` defaults to the configured authority. A cached, unexpired
    /// access token is returned without any network call unless
    /// `force_refresh` is set.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UiRequired`] with code `no_tokens_found` when
    /// neither an access token nor a refresh token is cached, and propagates
    /// every other error unchanged (including `invalid_grant` as UI-required).
    pub async fn acquire_token_silent(
        &self,
        scopes: &[&str],
        account: &Account,
        authority: Option<&str>,
        force_refresh: bool,
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult> {
        let config = self.bundle.config();
        let authority = match authority {
            Some(uri) => Authority::create_authority(config, uri, config.validate_authority)?,
            None => Authority::create_default(config)?,
        };
        let scopes = ScopeSet::from_scopes(scopes);

        if !force_refresh
            && let Some(access_token) = self
                .cache
                .find_access_token(&authority, &config.client_id, account, &scopes, ctx)
                .await?
        {
            info!(
                correlation_id = ?ctx.correlation_id,
                authority = %authority.canonical_authority(),
                "Returning access token from cache"
            );
            let id_token = self.cache.find_id_token(&access_token);
            let tokens = CachedTokens {
                access_token,
                id_token,
                account: account.clone(),
            };
            return Ok(AuthenticationResult::from_cached(tokens, ctx.correlation_id, true));
        }

        let Some(refresh_token) = self
            .cache
            .find_refresh_token(&authority, &config.client_id, account, ctx)
            .await?
        else {
            return Err(IdentityError::ui_required(
                codes::NO_TOKENS_FOUND,
                "No access or refresh token found in the cache",
            ));
        };

        debug!(
            correlation_id = ?ctx.correlation_id,
            authority = %authority.canonical_authority(),
            "Redeeming cached refresh token"
        );
        self.redeem_refresh_token(authority, &scopes, refresh_token.expose(), ctx)
            .await
    }

    /// Accounts in the token cache
    ///
    /// # Errors
    ///
    /// Cache persistence errors.
    pub async fn get_accounts(&self, ctx: &RequestContext) -> Result<Vec<Account>> {
        self.cache.get_accounts(None, ctx).await
    }

    /// Remove an account and all of its tokens from the cache
    ///
    /// # Errors
    ///
    /// Cache persistence errors.
    pub async fn remove_account(&self, account: &Account) -> Result<()> {
        self.cache.remove_account(account).await
    }

    async fn redeem_refresh_token(
        &self,
        authority: Authority,
        scopes: &ScopeSet,
        refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult> {
        let grant = [
            (params::GRANT_TYPE, grant_types::REFRESH_TOKEN.to_string()),
            (params::REFRESH_TOKEN, refresh_token.to_string()),
        ];
        self.execute_token_request(authority, scopes, &grant, ctx).await
    }

    async fn execute_token_request(
        &self,
        mut authority: Authority,
        scopes: &ScopeSet,
        grant: &[(&str, String)],
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult> {
        let config = self.bundle.config();

        authority
            .update_canonical_authority(self.bundle.discovery(), ctx)
            .await?;
        let endpoints = self
            .bundle
            .endpoint_resolver()
            .resolve_endpoints(&authority, ctx)
            .await?;
        let token_endpoint = Url::parse(&endpoints.token_endpoint)?;

        let mut client = self.bundle.oauth2_client();
        client.add_body_parameter(params::CLIENT_ID, config.client_id.clone());
        client.add_body_parameter(params::CLIENT_INFO, "1");
        client.add_body_parameter(
            params::SCOPE,
            format!("{} {}", scopes, DEFAULT_REQUEST_SCOPES).trim().to_string(),
        );
        for (key, value) in grant {
            client.add_body_parameter(*key, value.clone());
        }
        if let Some(ref secret) = config.client_secret {
            client.add_body_parameter(params::CLIENT_SECRET, secret.expose_secret().clone());
        }

        let response = client.get_token(&token_endpoint, ctx).await?;
        let tokens = self
            .cache
            .save_token_response(&authority, &config.client_id, scopes, &response, ctx)
            .await?;

        info!(
            correlation_id = ?ctx.correlation_id,
            environment = %tokens.account.environment,
            "Acquired token from the token endpoint"
        );

        Ok(AuthenticationResult::from_cached(tokens, ctx.correlation_id, false))
    }
}
