//! End-to-end tests for token caching across authority aliases
//!
//! Tokens acquired through one alias of a directory must be found through any
//! other alias, and every cached item must be keyed by the preferred cache alias.

mod common;

use std::sync::Arc;

use common::*;
use http::Method;
use identity_core::oauth2::TokenResponse;
use identity_core::{
    Account, ApplicationConfig, Authority, IdentityError, PublicClientApplication, RequestContext,
    ScopeSet, ServiceBundle,
};
use pretty_assertions::assert_eq;

fn assert_environment(app: &identity_core::PublicClientApplication, expected: &str) {
    let cache = app.token_cache();
    for item in cache.all_access_tokens() {
        assert_eq!(item.environment, expected);
    }
    for item in cache.all_refresh_tokens() {
        assert_eq!(item.environment, expected);
    }
    for item in cache.all_id_tokens() {
        assert_eq!(item.environment, expected);
    }
    for item in cache.all_accounts() {
        assert_eq!(item.environment, expected);
    }
    for entry in cache.legacy_entries() {
        assert_eq!(entry.host().as_deref(), Some(expected));
    }
    assert!(!cache.all_access_tokens().is_empty());
    assert!(!cache.legacy_entries().is_empty());
}

// =============================================================================
// ACQUIRE THROUGH ONE ALIAS, READ THROUGH ANOTHER
// =============================================================================

#[tokio::test]
async fn test_token_cached_via_windows_net_found_via_microsoftonline() {
    let transport = MockTransport::new();
    transport.on_json(
        Method::GET,
        DISCOVERY_URL,
        200,
        discovery_response(
            "login.microsoftonline.com",
            "login.microsoftonline.com",
            &["login.windows.net", "login.microsoftonline.com"],
        ),
    );
    transport.on_json(
        Method::GET,
        &openid_configuration_url("login.microsoftonline.com", "common"),
        200,
        openid_configuration("login.microsoftonline.com", "common"),
    );
    transport.on_json(
        Method::POST,
        &token_url("login.microsoftonline.com", "common"),
        200,
        token_response("at-1", "user.read"),
    );

    let app = application("https://login.windows.net/common/", transport.clone());

    let result = app
        .acquire_token_by_authorization_code(
            &["user.read"],
            "auth-code",
            Some("http://localhost"),
            &app.request_context(),
        )
        .await
        .unwrap();

    assert!(!result.from_cache);
    assert_eq!(result.access_token.expose(), "at-1");
    assert_eq!(result.account.home_account_id, HOME_ACCOUNT_ID);
    assert_eq!(result.account.environment, "login.microsoftonline.com");
    assert_eq!(result.tenant_id.as_deref(), Some(UTID));

    // One discovery call, one configuration call, one token call
    assert_eq!(transport.count_matching(DISCOVERY_URL), 1);
    assert_eq!(transport.request_count(), 3);

    let token_request = transport.last_request().unwrap();
    let form = token_request.form();
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["code"], "auth-code");
    assert_eq!(form["client_id"], CLIENT_ID);
    assert_eq!(form["client_info"], "1");
    assert!(form["scope"].contains("offline_access"));

    assert_environment(&app, "login.microsoftonline.com");

    let before = transport.request_count();
    let silent = app
        .acquire_token_silent(
            &["user.read"],
            &result.account,
            Some("https://login.microsoftonline.com/common/"),
            false,
            &app.request_context(),
        )
        .await
        .unwrap();

    assert!(silent.from_cache);
    assert_eq!(silent.access_token.expose(), "at-1");
    assert_eq!(transport.request_count(), before);
}

#[tokio::test]
async fn test_every_alias_hits_cache_written_under_preferred_cache() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    transport.on_json(
        Method::GET,
        &openid_configuration_url(PREF_NETWORK, UTID),
        200,
        openid_configuration(PREF_NETWORK, UTID),
    );
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, UTID),
        200,
        token_response("at-alias", "user.read"),
    );

    let app = application(&format!("https://login.microsoft.com/{}/", UTID), transport.clone());
    let result = app
        .acquire_token_by_authorization_code(
            &["user.read"],
            "auth-code",
            Some("http://localhost"),
            &app.request_context(),
        )
        .await
        .unwrap();

    // Network calls go to the preferred network alias
    assert!(
        transport
            .requests()
            .iter()
            .filter(|r| r.method == Method::POST)
            .all(|r| r.url.host_str() == Some(PREF_NETWORK))
    );
    assert_environment(&app, PREF_CACHE);
    assert_eq!(result.account.environment, PREF_CACHE);

    let before = transport.request_count();
    for alias in PROD_ALIASES {
        let authority = format!("https://{}/{}/", alias, UTID);
        let silent = app
            .acquire_token_silent(
                &["user.read"],
                &result.account,
                Some(&authority),
                false,
                &app.request_context(),
            )
            .await
            .unwrap_or_else(|e| panic!("silent acquisition via {} failed: {}", alias, e));

        assert!(silent.from_cache, "expected cache hit via {}", alias);
        assert_eq!(silent.access_token.expose(), "at-alias");
    }
    assert_eq!(transport.request_count(), before);

    // A scope with no cached access token redeems the refresh token at the
    // preferred network alias, whichever alias was named
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, UTID),
        400,
        invalid_grant_response(),
    );

    for (n, alias) in PROD_ALIASES.iter().enumerate() {
        let authority = format!("https://{}/{}/", alias, UTID);
        let err = app
            .acquire_token_silent(
                &["mail.read"],
                &result.account,
                Some(&authority),
                false,
                &app.request_context(),
            )
            .await
            .unwrap_err();

        assert!(err.is_ui_required(), "expected ui required via {}: {}", alias, err);
        assert_eq!(err.error_code(), "invalid_grant");

        let redeemed = transport.last_request().unwrap();
        assert_eq!(redeemed.url.as_str(), token_url(PREF_NETWORK, UTID));
        assert_eq!(redeemed.form()["grant_type"], "refresh_token");
        assert_eq!(redeemed.form()["refresh_token"], "refresh-token");
        // 1 token call from the code redemption plus one per alias so far
        assert_eq!(transport.count_matching(&token_url(PREF_NETWORK, UTID)), n + 2);
    }

    // Discovery was served from the cache after the first call
    assert_eq!(transport.count_matching(DISCOVERY_URL), 1);
}

// =============================================================================
// SILENT ACQUISITION EDGE CASES
// =============================================================================

#[tokio::test]
async fn test_silent_without_tokens_requires_ui() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());

    let app = application("https://login.microsoftonline.com/common/", transport.clone());
    let account = Account {
        home_account_id: HOME_ACCOUNT_ID.to_string(),
        environment: PREF_CACHE.to_string(),
        username: None,
    };

    let err = app
        .acquire_token_silent(&["user.read"], &account, None, false, &app.request_context())
        .await
        .unwrap_err();

    match err {
        IdentityError::UiRequired(ref service) => {
            assert_eq!(service.error_code, "no_tokens_found");
        }
        other => panic!("expected UiRequired, got {:?}", other),
    }
}

#[tokio::test]
async fn test_force_refresh_skips_cached_access_token() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    transport.on_json(
        Method::GET,
        &openid_configuration_url(PREF_NETWORK, "common"),
        200,
        openid_configuration(PREF_NETWORK, "common"),
    );
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, "common"),
        200,
        token_response("first", "user.read"),
    );

    let app = application("https://login.microsoftonline.com/common/", transport.clone());
    let result = app
        .acquire_token_by_authorization_code(&["user.read"], "code", Some("http://localhost"), &app.request_context())
        .await
        .unwrap();

    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, "common"),
        200,
        token_response("second", "user.read"),
    );

    let refreshed = app
        .acquire_token_silent(&["user.read"], &result.account, None, true, &app.request_context())
        .await
        .unwrap();

    assert!(!refreshed.from_cache);
    assert_eq!(refreshed.access_token.expose(), "second");
    assert_eq!(app.token_cache().all_access_tokens().len(), 1);
}

#[tokio::test]
async fn test_accounts_are_listed_and_removed() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    transport.on_json(
        Method::GET,
        &openid_configuration_url(PREF_NETWORK, "organizations"),
        200,
        openid_configuration(PREF_NETWORK, "organizations"),
    );
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, "organizations"),
        200,
        token_response("at", "user.read"),
    );

    let app = application("https://login.microsoftonline.com/organizations/", transport);
    let ctx = RequestContext::new();
    let result = app
        .acquire_token_by_authorization_code(&["user.read"], "code", Some("http://localhost"), &ctx)
        .await
        .unwrap();

    let accounts = app.get_accounts(&ctx).await.unwrap();
    assert_eq!(accounts, vec![result.account.clone()]);
    assert_eq!(accounts[0].username.as_deref(), Some("user@contoso.com"));

    app.remove_account(&result.account).await.unwrap();
    assert!(app.get_accounts(&ctx).await.unwrap().is_empty());
    assert!(app.token_cache().all_refresh_tokens().is_empty());
}

#[tokio::test]
async fn test_b2c_authority_skips_instance_discovery() {
    let transport = MockTransport::new();
    let authority = "https://contoso.b2clogin.com/tfp/contoso.onmicrosoft.com/B2C_1_signin/";
    transport.on_json(
        Method::GET,
        &format!("{}v2.0/.well-known/openid-configuration", authority),
        200,
        serde_json::json!({
            "authorization_endpoint": format!("{}oauth2/v2.0/authorize", authority),
            "token_endpoint": format!("{}oauth2/v2.0/token", authority),
            "issuer": "https://contoso.b2clogin.com/tenant-id/v2.0/",
        }),
    );
    transport.on_json(
        Method::POST,
        &format!("{}oauth2/v2.0/token", authority),
        200,
        token_response("b2c-at", "user.read"),
    );

    let app = application(authority, transport.clone());
    let result = app
        .acquire_token_by_authorization_code(&["user.read"], "code", Some("http://localhost"), &app.request_context())
        .await
        .unwrap();

    assert_eq!(result.account.environment, "contoso.b2clogin.com");
    assert_eq!(transport.count_matching("https://login.microsoftonline.com"), 0);
    assert_eq!(transport.request_count(), 2);
    assert_eq!(app.bundle().discovery().cache_stats().indexed_hosts, 0);
}

#[tokio::test]
async fn test_serialized_cache_serves_silent_requests_in_a_new_application() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    transport.on_json(
        Method::GET,
        &openid_configuration_url(PREF_NETWORK, UTID),
        200,
        openid_configuration(PREF_NETWORK, UTID),
    );
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, UTID),
        200,
        token_response("persisted-at", "user.read"),
    );

    let authority = format!("https://login.windows.net/{}/", UTID);
    let app = application(&authority, transport.clone());
    let result = app
        .acquire_token_by_authorization_code(&["user.read"], "code", Some("http://localhost"), &app.request_context())
        .await
        .unwrap();
    let blob = app.token_cache().serialize().unwrap();

    let restored = application(&authority, transport.clone());
    restored.token_cache().deserialize(&blob).unwrap();
    assert_eq!(restored.token_cache().all_accounts(), app.token_cache().all_accounts());

    let silent = restored
        .acquire_token_silent(
            &["user.read"],
            &result.account,
            Some(&format!("https://sts.windows.net/{}/", UTID)),
            false,
            &restored.request_context(),
        )
        .await
        .unwrap();

    assert!(silent.from_cache);
    assert_eq!(silent.access_token.expose(), "persisted-at");
    assert!(silent.id_token.is_some());
}

// =============================================================================
// REDIRECT URI
// =============================================================================

#[tokio::test]
async fn test_configured_redirect_uri_is_used_by_default() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    transport.on_json(
        Method::GET,
        &openid_configuration_url(PREF_NETWORK, "common"),
        200,
        openid_configuration(PREF_NETWORK, "common"),
    );
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, "common"),
        200,
        token_response("at", "user.read"),
    );

    let config = ApplicationConfig::new(CLIENT_ID)
        .with_authority("https://login.microsoftonline.com/common/", true)
        .with_redirect_uri("https://app.contoso.com/callback");
    let app = PublicClientApplication::new(Arc::new(
        ServiceBundle::new(config, transport.clone()).unwrap(),
    ));

    app.acquire_token_by_authorization_code(&["user.read"], "code", None, &app.request_context())
        .await
        .unwrap();

    let form = transport.last_request().unwrap().form();
    assert_eq!(form["redirect_uri"], "https://app.contoso.com/callback");
    assert_eq!(form["grant_type"], "authorization_code");
}

#[tokio::test]
async fn test_missing_redirect_uri_fails_before_any_request() {
    let transport = MockTransport::new();
    let app = application("https://login.microsoftonline.com/common/", transport.clone());

    let err = app
        .acquire_token_by_authorization_code(&["user.read"], "code", None, &app.request_context())
        .await
        .unwrap_err();

    assert!(matches!(err, IdentityError::Configuration(_)));
    assert_eq!(transport.request_count(), 0);
}

// =============================================================================
// CONCURRENT ACCESS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_silent_requests_on_a_cold_discovery_cache() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    transport.on_json(
        Method::GET,
        &openid_configuration_url(PREF_NETWORK, UTID),
        200,
        openid_configuration(PREF_NETWORK, UTID),
    );
    transport.on_json(
        Method::POST,
        &token_url(PREF_NETWORK, UTID),
        200,
        token_response("shared-at", "user.read"),
    );

    let authority = format!("https://login.windows.net/{}/", UTID);
    let seeded = application(&authority, transport.clone());
    let result = seeded
        .acquire_token_by_authorization_code(&["user.read"], "code", Some("http://localhost"), &seeded.request_context())
        .await
        .unwrap();
    let blob = seeded.token_cache().serialize().unwrap();

    // Fresh discovery cache, same tokens
    let app = application(&authority, transport.clone());
    app.token_cache().deserialize(&blob).unwrap();
    let before = transport.request_count();

    let mut handles = Vec::new();
    for _ in 0..4 {
        for alias in PROD_ALIASES {
            let app = app.clone();
            let account = result.account.clone();
            handles.push(tokio::spawn(async move {
                let uri = format!("https://{}/{}/", alias, UTID);
                app.acquire_token_silent(&["user.read"], &account, Some(&uri), false, &app.request_context())
                    .await
            }));
        }
    }

    for handle in handles {
        let silent = handle.await.unwrap().unwrap();
        assert!(silent.from_cache);
        assert_eq!(silent.access_token.expose(), "shared-at");
    }

    let new_requests = &transport.requests()[before..];
    assert!(!new_requests.is_empty());
    assert!(new_requests.iter().all(|r| r.url.as_str().starts_with(DISCOVERY_URL)));
    assert_eq!(app.bundle().discovery().cache_stats().indexed_hosts, PROD_ALIASES.len());
    assert_eq!(app.bundle().discovery().cache_stats().distinct_entries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_for_different_accounts_do_not_interfere() {
    let transport = MockTransport::new();
    transport.on_json(Method::GET, DISCOVERY_URL, 200, prod_discovery_response());
    let app = application(&format!("https://login.microsoft.com/{}/", UTID), transport.clone());
    let cache = Arc::clone(app.token_cache());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let cache = Arc::clone(&cache);
            let config = app.bundle().config().clone();
            tokio::spawn(async move {
                let alias = PROD_ALIASES[i % PROD_ALIASES.len()];
                let authority =
                    Authority::create_authority(&config, &format!("https://{}/{}/", alias, UTID), true)
                        .unwrap();
                let mut body = token_response(&format!("at-{}", i), "user.read");
                body["client_info"] = encoded_client_info(&format!("user-{}", i), UTID).into();
                body["id_token"] = id_token(&format!("user-{}", i), UTID, "user@contoso.com").into();
                let response: TokenResponse = serde_json::from_value(body).unwrap();

                cache
                    .save_token_response(&authority, CLIENT_ID, &ScopeSet::parse("user.read"), &response, &RequestContext::new())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut saved = Vec::new();
    for handle in handles {
        saved.push(handle.await.unwrap());
    }

    assert_eq!(cache.all_access_tokens().len(), 16);
    assert_eq!(cache.all_refresh_tokens().len(), 16);
    assert_eq!(cache.all_accounts().len(), 16);
    assert_environment(&app, PREF_CACHE);

    let ctx = RequestContext::new();
    let authority = Authority::create_authority(
        app.bundle().config(),
        &format!("https://login.microsoftonline.com/{}/", UTID),
        true,
    )
    .unwrap();
    for tokens in saved {
        let found = cache
            .find_access_token(&authority, CLIENT_ID, &tokens.account, &ScopeSet::parse("user.read"), &ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.secret.expose(), tokens.access_token.secret.expose());
    }
}
