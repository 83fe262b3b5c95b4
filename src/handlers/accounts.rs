//! # Account Handlers
//!
//! Operator endpoints for linked social accounts: storing OAuth callback
//! results, handing out valid tokens, building request signatures and
//! disconnecting accounts. Secrets are accepted on write and only ever leave
//! through the token and authorize endpoints.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::error::{ApiError, validation_error};
use crate::models::Platform;
use crate::server::AppState;
use crate::signer::Authorization;
use crate::store::{Credential, CredentialFields};
use crate::token_refresh::ValidToken;

/// Longest accepted `expires_in`, ten years
const MAX_EXPIRES_IN_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Deserialize)]
pub struct UserPath {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PlatformPath {
    pub user_id: String,
    pub platform: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountPath {
    pub user_id: String,
    pub platform: String,
    pub account_id: String,
}

/// OAuth 2.0 callback result for one account
#[derive(Deserialize, ToSchema)]
pub struct UpsertCredentialRequest {
    /// Handle shown to the user, e.g. `@acme`
    pub display_name: Option<String>,
    pub access_token: String,
    /// Omit to keep the stored refresh token
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds from now
    pub expires_in: Option<i64>,
    /// Absolute expiry; mutually exclusive with `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<Vec<String>>,
}

/// OAuth 1.0a credential set for a Twitter/X account
#[derive(Deserialize, ToSchema)]
pub struct Oauth1CredentialsRequest {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

/// One request parameter that takes part in the signature
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RequestParam {
    pub name: String,
    pub value: String,
}

/// Outbound request to build an `Authorization` header for
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeRequest {
    /// HTTP method, e.g. `POST`
    pub method: String,
    /// Absolute target URL including any query string
    pub url: String,
    /// Form-encoded body parameters; query parameters are read from `url`
    #[serde(default)]
    pub params: Vec<RequestParam>,
}

/// Account metadata without any secret material
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountSummary {
    pub id: Uuid,
    pub user_id: String,
    pub platform: Platform,
    pub account_id: String,
    pub display_name: Option<String>,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub is_connected: bool,
    /// `None` when the token never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    /// Whether the full OAuth 1.0a set is on file
    pub has_oauth1: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for AccountSummary {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id,
            user_id: credential.user_id.clone(),
            platform: credential.platform,
            account_id: credential.account_id.clone(),
            display_name: credential.display_name.clone(),
            scopes: credential.scopes.clone(),
            is_active: credential.is_active,
            is_connected: credential.is_connected,
            expires_at: credential.expires_at,
            has_refresh_token: credential.refresh_token.is_some(),
            has_oauth1: credential.has_oauth1(),
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountListResponse {
    pub accounts: Vec<AccountSummary>,
}

fn parse_platform(raw: &str) -> Result<Platform, ApiError> {
    raw.parse::<Platform>().map_err(|e| {
        validation_error(
            "Unknown platform",
            json!({ "platform": e.to_string() }),
        )
    })
}

fn require_oauth1_platform(raw: &str) -> Result<Platform, ApiError> {
    let platform = parse_platform(raw)?;
    if !platform.supports_oauth1() {
        return Err(validation_error(
            "OAuth 1.0a is only supported for twitter",
            json!({ "platform": platform.slug() }),
        ));
    }
    Ok(platform)
}

fn require_non_empty(fields: &[(&str, &str)]) -> Result<(), ApiError> {
    let empty: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| (name.to_string(), json!("must not be empty")))
        .collect();

    if empty.is_empty() {
        Ok(())
    } else {
        Err(validation_error(
            "Required fields are empty",
            serde_json::Value::Object(empty),
        ))
    }
}

fn resolve_expiry(
    request: &UpsertCredentialRequest,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    match (request.expires_in, request.expires_at) {
        (Some(_), Some(_)) => Err(validation_error(
            "Provide either expires_in or expires_at",
            json!({ "expires_in": "conflicts with expires_at" }),
        )),
        (Some(seconds), None) if !(0..=MAX_EXPIRES_IN_SECONDS).contains(&seconds) => {
            Err(validation_error(
                "expires_in out of range",
                json!({ "expires_in": format!("must be between 0 and {MAX_EXPIRES_IN_SECONDS}") }),
            ))
        }
        (Some(seconds), None) => Ok(Some(now + Duration::seconds(seconds))),
        (None, expires_at) => Ok(expires_at),
    }
}

/// Store OAuth 2.0 credentials for an account
///
/// Creates the record on first link and merges into it on re-link. A request
/// without `expires_in`/`expires_at` stores a token that never expires.
#[utoipa::path(
    put,
    path = "/users/{user_id}/accounts/{platform}/{account_id}",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "twitter, linkedin, instagram, facebook or youtube"),
        ("account_id" = String, Path, description = "Platform-assigned account id")
    ),
    request_body = UpsertCredentialRequest,
    responses(
        (status = 200, description = "Credential stored", body = AccountSummary),
        (status = 400, description = "Invalid platform or body", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "accounts"
)]
pub async fn upsert_credential(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<AccountPath>,
    payload: Result<Json<UpsertCredentialRequest>, JsonRejection>,
) -> Result<Json<AccountSummary>, ApiError> {
    let platform = parse_platform(&path.platform)?;
    let Json(request) = payload?;
    require_non_empty(&[
        ("user_id", path.user_id.as_str()),
        ("account_id", path.account_id.as_str()),
        ("access_token", request.access_token.as_str()),
    ])?;

    let expires_at = resolve_expiry(&request, state.service.now())?;
    let UpsertCredentialRequest {
        display_name,
        access_token,
        refresh_token,
        scopes,
        ..
    } = request;

    let fields = CredentialFields {
        display_name,
        access_token: Some(access_token),
        refresh_token: refresh_token.filter(|token| !token.is_empty()),
        expires_at: Some(expires_at),
        scopes,
        is_active: Some(true),
        is_connected: Some(true),
        ..Default::default()
    };

    let credential = state
        .service
        .upsert_credential(&path.user_id, platform, &path.account_id, fields)
        .await?;

    Ok(Json(AccountSummary::from(&credential)))
}

/// Store the OAuth 1.0a credential set for a Twitter/X account
#[utoipa::path(
    put,
    path = "/users/{user_id}/accounts/{platform}/{account_id}/oauth1",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Must be twitter"),
        ("account_id" = String, Path, description = "Platform-assigned account id")
    ),
    request_body = Oauth1CredentialsRequest,
    responses(
        (status = 200, description = "OAuth 1.0a credentials stored", body = AccountSummary),
        (status = 400, description = "Platform is not twitter, or fields are empty", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "accounts"
)]
pub async fn upsert_oauth1_credentials(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<AccountPath>,
    payload: Result<Json<Oauth1CredentialsRequest>, JsonRejection>,
) -> Result<Json<AccountSummary>, ApiError> {
    let platform = require_oauth1_platform(&path.platform)?;
    let Json(request) = payload?;
    require_non_empty(&[
        ("user_id", path.user_id.as_str()),
        ("account_id", path.account_id.as_str()),
        ("consumer_key", request.consumer_key.as_str()),
        ("consumer_secret", request.consumer_secret.as_str()),
        ("access_token", request.access_token.as_str()),
        ("access_token_secret", request.access_token_secret.as_str()),
    ])?;

    let fields = CredentialFields {
        consumer_key: Some(request.consumer_key),
        consumer_secret: Some(request.consumer_secret),
        oauth1_access_token: Some(request.access_token),
        access_token_secret: Some(request.access_token_secret),
        ..Default::default()
    };

    let credential = state
        .service
        .upsert_credential(&path.user_id, platform, &path.account_id, fields)
        .await?;

    Ok(Json(AccountSummary::from(&credential)))
}

/// List every account linked by a user, including disconnected ones
#[utoipa::path(
    get,
    path = "/users/{user_id}/accounts",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Owning user identifier")),
    responses(
        (status = 200, description = "Linked accounts", body = AccountListResponse),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "accounts"
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<UserPath>,
) -> Result<Json<AccountListResponse>, ApiError> {
    let accounts = state
        .service
        .list_accounts(&path.user_id)
        .await?
        .iter()
        .map(AccountSummary::from)
        .collect();

    Ok(Json(AccountListResponse { accounts }))
}

/// Most recently linked active account for a platform
#[utoipa::path(
    get,
    path = "/users/{user_id}/accounts/{platform}/active",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Platform slug")
    ),
    responses(
        (status = 200, description = "Active account", body = AccountSummary),
        (status = 400, description = "Unknown platform", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "No active account", body = ApiError)
    ),
    tag = "accounts"
)]
pub async fn get_active_account(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<PlatformPath>,
) -> Result<Json<AccountSummary>, ApiError> {
    let platform = parse_platform(&path.platform)?;
    let credential = state.service.find_active(&path.user_id, platform).await?;
    Ok(Json(AccountSummary::from(&credential)))
}

/// Valid access token for one account, refreshed if close to expiry
#[utoipa::path(
    post,
    path = "/users/{user_id}/accounts/{platform}/{account_id}/token",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Platform slug"),
        ("account_id" = String, Path, description = "Platform-assigned account id")
    ),
    responses(
        (status = 200, description = "Token usable right now", body = ValidToken),
        (status = 400, description = "Unknown platform", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Account not linked or disconnected", body = ApiError),
        (status = 409, description = "Refresh failed; the account must be reconnected", body = ApiError)
    ),
    tag = "tokens"
)]
pub async fn ensure_valid_token(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<AccountPath>,
) -> Result<Json<ValidToken>, ApiError> {
    let platform = parse_platform(&path.platform)?;
    let token = state
        .service
        .ensure_valid_token(&path.user_id, platform, &path.account_id)
        .await?;
    Ok(Json(token))
}

/// Valid access token for the most recently linked active account
#[utoipa::path(
    post,
    path = "/users/{user_id}/accounts/{platform}/active/token",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Platform slug")
    ),
    responses(
        (status = 200, description = "Token usable right now", body = ValidToken),
        (status = 400, description = "Unknown platform", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "No active account", body = ApiError),
        (status = 409, description = "Refresh failed; the account must be reconnected", body = ApiError)
    ),
    tag = "tokens"
)]
pub async fn ensure_active_token(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<PlatformPath>,
) -> Result<Json<ValidToken>, ApiError> {
    let platform = parse_platform(&path.platform)?;
    let token = state
        .service
        .ensure_valid_token_for_platform(&path.user_id, platform)
        .await?;
    Ok(Json(token))
}

/// Build the `Authorization` header for an outbound Twitter/X request
///
/// v1.1 endpoints on Twitter/X hosts get an OAuth 1.0a signature; every other
/// URL gets the account's OAuth 2.0 bearer token.
#[utoipa::path(
    post,
    path = "/users/{user_id}/accounts/{platform}/{account_id}/authorize",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Must be twitter"),
        ("account_id" = String, Path, description = "Platform-assigned account id")
    ),
    request_body = AuthorizeRequest,
    responses(
        (status = 200, description = "Header for the request", body = Authorization),
        (status = 400, description = "Platform is not twitter, or the request is malformed", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Account not linked or disconnected", body = ApiError),
        (status = 409, description = "Bearer refresh failed; the account must be reconnected", body = ApiError),
        (status = 412, description = "OAuth 1.0a setup incomplete", body = ApiError)
    ),
    tag = "tokens"
)]
pub async fn authorize_request(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<AccountPath>,
    payload: Result<Json<AuthorizeRequest>, JsonRejection>,
) -> Result<Json<Authorization>, ApiError> {
    require_oauth1_platform(&path.platform)?;
    let Json(request) = payload?;
    require_non_empty(&[("method", request.method.as_str())])?;

    let url = Url::parse(&request.url).map_err(|e| {
        validation_error("Invalid request URL", json!({ "url": e.to_string() }))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(validation_error(
            "Invalid request URL",
            json!({ "url": "scheme must be http or https" }),
        ));
    }

    let params: Vec<(String, String)> = request
        .params
        .into_iter()
        .map(|param| (param.name, param.value))
        .collect();

    let authorization = state
        .service
        .sign_request(
            &path.user_id,
            &path.account_id,
            &request.method.to_ascii_uppercase(),
            &url,
            &params,
        )
        .await?;

    Ok(Json(authorization))
}

/// Soft-disconnect an account; it stays on record but is never used again
#[utoipa::path(
    post,
    path = "/users/{user_id}/accounts/{platform}/{account_id}/disconnect",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Platform slug"),
        ("account_id" = String, Path, description = "Platform-assigned account id")
    ),
    responses(
        (status = 204, description = "Account disconnected"),
        (status = 400, description = "Unknown platform", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Account not linked", body = ApiError)
    ),
    tag = "accounts"
)]
pub async fn disconnect_account(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<AccountPath>,
) -> Result<StatusCode, ApiError> {
    let platform = parse_platform(&path.platform)?;
    state
        .service
        .disconnect(&path.user_id, platform, &path.account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Permanently delete an account's credentials
#[utoipa::path(
    delete,
    path = "/users/{user_id}/accounts/{platform}/{account_id}",
    security(("bearer_auth" = [])),
    params(
        ("user_id" = String, Path, description = "Owning user identifier"),
        ("platform" = String, Path, description = "Platform slug"),
        ("account_id" = String, Path, description = "Platform-assigned account id")
    ),
    responses(
        (status = 204, description = "Credential deleted"),
        (status = 400, description = "Unknown platform", body = ApiError),
        (status = 401, description = "Missing or invalid authorization token", body = ApiError),
        (status = 404, description = "Account not linked", body = ApiError)
    ),
    tag = "accounts"
)]
pub async fn delete_account(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(path): Path<AccountPath>,
) -> Result<StatusCode, ApiError> {
    let platform = parse_platform(&path.platform)?;
    state
        .service
        .delete(&path.user_id, platform, &path.account_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(expires_in: Option<i64>, expires_at: Option<DateTime<Utc>>) -> UpsertCredentialRequest {
        UpsertCredentialRequest {
            display_name: None,
            access_token: "a".into(),
            refresh_token: None,
            expires_in,
            expires_at,
            scopes: None,
        }
    }

    #[test]
    fn expiry_from_relative_lifetime() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let resolved = resolve_expiry(&request(Some(3600), None), now).unwrap();
        assert_eq!(resolved, Some(now + Duration::hours(1)));
    }

    #[test]
    fn missing_expiry_means_never_expires() {
        let now = Utc::now();
        assert_eq!(resolve_expiry(&request(None, None), now).unwrap(), None);
    }

    #[test]
    fn both_expiry_forms_are_rejected() {
        let now = Utc::now();
        let error = resolve_expiry(&request(Some(60), Some(now)), now).unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn negative_lifetime_is_rejected() {
        let error = resolve_expiry(&request(Some(-1), None), Utc::now()).unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn oauth1_is_twitter_only() {
        assert_eq!(require_oauth1_platform("x").unwrap(), Platform::Twitter);
        let error = require_oauth1_platform("linkedin").unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn empty_fields_are_reported_by_name() {
        let error = require_non_empty(&[("consumer_key", ""), ("consumer_secret", "cs")])
            .unwrap_err();
        let details = error.details.unwrap();
        assert!(details.get("consumer_key").is_some());
        assert!(details.get("consumer_secret").is_none());
    }
}
