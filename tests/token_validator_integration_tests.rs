//! End-to-end token validation against the encrypted repository and mocked
//! platform token endpoints.

use std::sync::Arc;

use chrono::Duration;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use social_accounts::error::{CredentialError, NO_REFRESH_TOKEN};
use social_accounts::models::{Platform, PlatformCredential};
use social_accounts::platforms::{
    ClientCredentials, FacebookTransport, LinkedInTransport, TransportError, TransportRegistry,
    TwitterTransport,
};
use social_accounts::store::{AccountStore, CredentialFields};
use social_accounts::token_refresh::TokenValidator;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "test_utils/mod.rs"]
mod test_utils;

fn client() -> ClientCredentials {
    ClientCredentials::new("client-id", "client-secret")
}

async fn seed(
    store: &dyn AccountStore,
    platform: Platform,
    account_id: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
) {
    store
        .upsert(
            "user-1",
            platform,
            account_id,
            CredentialFields {
                access_token: Some(access_token.to_string()),
                refresh_token: refresh_token.map(str::to_string),
                expires_at: Some(expires_at),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_token_is_refreshed_and_rotation_fields_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/accessToken"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    seed(
        repo.as_ref(),
        Platform::LinkedIn,
        "li-1",
        "a1",
        Some("r1"),
        Some(test_utils::t0() - Duration::minutes(1)),
    )
    .await;

    let transports = TransportRegistry::new().with(Arc::new(LinkedInTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/oauth/v2/accessToken", server.uri())),
    )));
    let validator = TokenValidator::new(repo.clone(), transports, clock);

    let token = validator
        .ensure_valid_token("user-1", Platform::LinkedIn, "li-1")
        .await
        .unwrap();
    assert_eq!(token.access_token, "a2");

    let stored = repo.get("user-1", Platform::LinkedIn, "li-1").await.unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("a2"));
    assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    assert_eq!(stored.expires_at, Some(test_utils::t0() + Duration::seconds(3600)));
}

#[tokio::test]
async fn never_expiring_token_makes_no_refresh_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "unexpected"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    seed(repo.as_ref(), Platform::Twitter, "111", "a1", Some("r1"), None).await;

    let transports = TransportRegistry::new().with(Arc::new(TwitterTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/2/oauth2/token", server.uri())),
    )));
    let validator = TokenValidator::new(repo, transports, clock);

    let token = validator
        .ensure_valid_token("user-1", Platform::Twitter, "111")
        .await
        .unwrap();
    assert_eq!(token.access_token, "a1");
    assert_eq!(token.expires_at, None);
}

#[tokio::test]
async fn expired_token_without_refresh_token_fails_before_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    seed(
        repo.as_ref(),
        Platform::Twitter,
        "111",
        "a1",
        None,
        Some(test_utils::t0() - Duration::hours(1)),
    )
    .await;

    let transports = TransportRegistry::new().with(Arc::new(TwitterTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/2/oauth2/token", server.uri())),
    )));
    let validator = TokenValidator::new(repo, transports, clock);

    let error = validator
        .ensure_valid_token("user-1", Platform::Twitter, "111")
        .await
        .unwrap_err();

    match error {
        CredentialError::RefreshFailure {
            platform, reason, ..
        } => {
            assert_eq!(platform, Platform::Twitter);
            assert_eq!(reason, NO_REFRESH_TOKEN);
        }
        other => panic!("expected RefreshFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_refresh_surfaces_upstream_status_and_keeps_record() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/2/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_request" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    let expires_at = test_utils::t0() + Duration::seconds(60);
    seed(
        repo.as_ref(),
        Platform::Twitter,
        "111",
        "a1",
        Some("r1"),
        Some(expires_at),
    )
    .await;
    let before = repo.get("user-1", Platform::Twitter, "111").await.unwrap();

    let transports = TransportRegistry::new().with(Arc::new(TwitterTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/2/oauth2/token", server.uri())),
    )));
    let validator = TokenValidator::new(repo.clone(), transports, clock);

    let error = validator
        .ensure_valid_token("user-1", Platform::Twitter, "111")
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        CredentialError::RefreshFailure {
            upstream: Some(TransportError::Http { status: 400, .. }),
            ..
        }
    ));

    let after = repo.get("user-1", Platform::Twitter, "111").await.unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn facebook_exchange_reseeds_refresh_with_new_long_lived_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v19.0/oauth/access_token"))
        .and(query_param("fb_exchange_token", "fb-long-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fb-long-2",
            "token_type": "bearer",
            "expires_in": 5_184_000
        })))
        .expect(1)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    seed(
        repo.as_ref(),
        Platform::Facebook,
        "page-1",
        "fb-long-1",
        Some("fb-long-1"),
        Some(test_utils::t0() + Duration::seconds(120)),
    )
    .await;

    let transports = TransportRegistry::new().with(Arc::new(FacebookTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/v19.0/oauth/access_token", server.uri())),
    )));
    let validator = TokenValidator::new(repo.clone(), transports, clock);

    let token = validator
        .ensure_valid_token_for_platform("user-1", Platform::Facebook)
        .await
        .unwrap();
    assert_eq!(token.access_token, "fb-long-2");

    let stored = repo.get("user-1", Platform::Facebook, "page-1").await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("fb-long-2"));
}

#[tokio::test]
async fn disconnected_account_is_never_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a2"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    seed(
        repo.as_ref(),
        Platform::LinkedIn,
        "li-1",
        "a1",
        Some("r1"),
        Some(test_utils::t0() - Duration::minutes(5)),
    )
    .await;
    repo.mark_inactive("user-1", Platform::LinkedIn, "li-1")
        .await
        .unwrap();

    let transports = TransportRegistry::new().with(Arc::new(LinkedInTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/oauth/v2/accessToken", server.uri())),
    )));
    let validator = TokenValidator::new(repo, transports, clock);

    let error = validator
        .ensure_valid_token("user-1", Platform::LinkedIn, "li-1")
        .await
        .unwrap_err();
    assert!(matches!(error, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn expired_facebook_token_cannot_be_exchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v19.0/oauth/access_token"))
        .and(query_param("fb_exchange_token", "fb-long-1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "Error validating access token: Session has expired",
                "type": "OAuthException",
                "code": 190
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, _db) = test_utils::repository(clock.clone()).await;
    seed(
        repo.as_ref(),
        Platform::Facebook,
        "page-1",
        "fb-long-1",
        Some("fb-long-1"),
        Some(test_utils::t0() - Duration::days(1)),
    )
    .await;

    let transports = TransportRegistry::new().with(Arc::new(FacebookTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/v19.0/oauth/access_token", server.uri())),
    )));
    let validator = TokenValidator::new(repo.clone(), transports, clock);

    let error = validator
        .ensure_valid_token("user-1", Platform::Facebook, "page-1")
        .await
        .unwrap_err();
    assert_eq!(error.error_code(), "RECONNECT_REQUIRED");
    assert!(matches!(
        error,
        CredentialError::RefreshFailure {
            upstream: Some(TransportError::Http { status: 400, .. }),
            ..
        }
    ));

    let stored = repo.get("user-1", Platform::Facebook, "page-1").await.unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("fb-long-1"));
}

#[tokio::test]
async fn refresh_of_deleted_account_does_not_recreate_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/accessToken"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "a2", "expires_in": 3600 }))
                .set_delay(std::time::Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let clock = test_utils::manual_clock();
    let (repo, db) = test_utils::repository(clock.clone()).await;
    seed(
        repo.as_ref(),
        Platform::LinkedIn,
        "li-1",
        "a1",
        Some("r1"),
        Some(test_utils::t0() - Duration::minutes(1)),
    )
    .await;

    let transports = TransportRegistry::new().with(Arc::new(LinkedInTransport::new(
        reqwest::Client::new(),
        client(),
        Some(format!("{}/oauth/v2/accessToken", server.uri())),
    )));
    let validator = TokenValidator::new(repo.clone(), transports, clock);

    let (outcome, deleted) = tokio::join!(
        validator.ensure_valid_token("user-1", Platform::LinkedIn, "li-1"),
        async {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            repo.delete("user-1", Platform::LinkedIn, "li-1").await
        }
    );

    deleted.unwrap();
    assert!(matches!(outcome, Err(CredentialError::NotFound { .. })));
    assert_eq!(PlatformCredential::find().count(&*db).await.unwrap(), 0);
}
