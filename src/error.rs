//! # Error Handling
//!
//! Domain errors raised by the credential lifecycle core, and the unified
//! problem+json [`ApiError`] they are mapped to at the HTTP boundary.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::Platform;
use crate::platforms::TransportError;
use crate::telemetry;

/// Reason attached to a refresh failure when no refresh token is stored
pub const NO_REFRESH_TOKEN: &str = "no refresh token";

/// Failures surfaced by the account store, token validator and request signer.
///
/// None of these are retried inside the core; every variant reaches the caller.
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// No record for the tuple, or the record is inactive
    #[error("no active {platform} account '{account}' for user '{user_id}'")]
    NotFound {
        user_id: String,
        platform: Platform,
        /// `"*"` when the lookup was by platform only
        account: String,
    },

    /// Refresh token missing, or the platform rejected/failed the refresh
    #[error("token refresh failed for {platform}: {reason}")]
    RefreshFailure {
        platform: Platform,
        reason: String,
        upstream: Option<TransportError>,
    },

    /// OAuth 1.0a fields absent for a request that must be signed
    #[error("OAuth 1.0a credentials incomplete, missing: {}", missing.join(", "))]
    MissingCredentials { missing: Vec<&'static str> },

    /// HMAC construction failed; an environment or programming defect
    #[error("request signing failed: {0}")]
    SigningError(String),

    /// Persistence or at-rest encryption failure
    #[error("credential storage error: {0}")]
    Storage(String),
}

impl CredentialError {
    pub fn not_found(user_id: &str, platform: Platform, account_id: &str) -> Self {
        Self::NotFound {
            user_id: user_id.to_string(),
            platform,
            account: account_id.to_string(),
        }
    }

    pub fn no_active_account(user_id: &str, platform: Platform) -> Self {
        Self::not_found(user_id, platform, "*")
    }

    pub fn refresh_failure<S: Into<String>>(platform: Platform, reason: S) -> Self {
        Self::RefreshFailure {
            platform,
            reason: reason.into(),
            upstream: None,
        }
    }

    pub fn storage<E: std::fmt::Display>(error: E) -> Self {
        Self::Storage(error.to_string())
    }

    /// Message suitable for showing to the account owner
    pub fn user_message(&self) -> &'static str {
        match self {
            CredentialError::NotFound { .. } => "Connect this account to continue.",
            CredentialError::RefreshFailure { .. } => "Please reconnect your account.",
            CredentialError::MissingCredentials { .. } => {
                "Finish OAuth 1.0a setup for this account to upload media."
            }
            CredentialError::SigningError(_) | CredentialError::Storage(_) => {
                "Something went wrong on our side. Please try again later."
            }
        }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            CredentialError::NotFound { .. } => "NOT_FOUND",
            CredentialError::RefreshFailure { .. } => "RECONNECT_REQUIRED",
            CredentialError::MissingCredentials { .. } => "OAUTH1_SETUP_INCOMPLETE",
            CredentialError::SigningError(_) | CredentialError::Storage(_) => {
                "INTERNAL_SERVER_ERROR"
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CredentialError::NotFound { .. } => StatusCode::NOT_FOUND,
            CredentialError::RefreshFailure { .. } => StatusCode::CONFLICT,
            CredentialError::MissingCredentials { .. } => StatusCode::PRECONDITION_FAILED,
            CredentialError::SigningError(_) | CredentialError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<CredentialError> for ApiError {
    fn from(error: CredentialError) -> Self {
        let api_error = ApiError::new(
            error.status_code(),
            error.error_code(),
            error.user_message(),
        );

        match error {
            CredentialError::NotFound {
                platform, account, ..
            } => api_error.with_details(json!({
                "platform": platform,
                "account_id": account,
            })),
            CredentialError::RefreshFailure {
                platform,
                reason,
                upstream,
            } => api_error.with_details(json!({
                "platform": platform,
                "reason": reason,
                "upstream": upstream.map(|u| u.details()),
            })),
            CredentialError::MissingCredentials { missing } => {
                api_error.with_details(json!({ "missing": missing }))
            }
            CredentialError::SigningError(detail) | CredentialError::Storage(detail) => {
                tracing::error!(error = %detail, "Credential core internal failure");
                api_error
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

/// True when a SeaORM error is a unique constraint violation on any supported backend
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error.code().is_some_and(|code| {
        let code = code.as_ref();
        code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code)
    })
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Test error message")
            .with_details(json!({"field": "value"}));

        assert_eq!(error.details, Some(Box::new(json!({"field": "value"}))));
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error");
        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "Test error",
        );

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn not_found_maps_to_404_with_platform_details() {
        let api_error: ApiError =
            CredentialError::not_found("user-1", Platform::LinkedIn, "acct-9").into();

        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert_eq!(api_error.code, Box::from("NOT_FOUND"));
        let details = api_error.details.unwrap();
        assert_eq!(details["platform"], "linkedin");
        assert_eq!(details["account_id"], "acct-9");
    }

    #[test]
    fn refresh_failure_asks_for_reconnect_and_carries_upstream() {
        let error = CredentialError::RefreshFailure {
            platform: Platform::Twitter,
            reason: "refresh endpoint returned 400".to_string(),
            upstream: Some(TransportError::Http {
                status: 400,
                body: Some("{\"error\":\"invalid_grant\"}".to_string()),
            }),
        };
        let api_error: ApiError = error.into();

        assert_eq!(api_error.status, StatusCode::CONFLICT);
        assert_eq!(api_error.code, Box::from("RECONNECT_REQUIRED"));
        assert_eq!(api_error.message, Box::from("Please reconnect your account."));
        let details = api_error.details.unwrap();
        assert_eq!(details["upstream"]["status"], 400);
    }

    #[test]
    fn missing_credentials_message_differs_from_refresh_failure() {
        let missing = CredentialError::MissingCredentials {
            missing: vec!["access_token_secret"],
        };
        let refresh = CredentialError::refresh_failure(Platform::Twitter, NO_REFRESH_TOKEN);

        assert_ne!(missing.user_message(), refresh.user_message());
        assert_ne!(missing.error_code(), refresh.error_code());

        let api_error: ApiError = missing.into();
        assert_eq!(api_error.status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(api_error.details.unwrap()["missing"][0], "access_token_secret");
    }

    #[test]
    fn missing_credentials_display_lists_fields() {
        let error = CredentialError::MissingCredentials {
            missing: vec!["consumer_key", "access_token_secret"],
        };
        assert_eq!(
            error.to_string(),
            "OAuth 1.0a credentials incomplete, missing: consumer_key, access_token_secret"
        );
    }

    #[test]
    fn internal_failures_hide_detail_from_response() {
        let api_error: ApiError = CredentialError::SigningError("bad key".to_string()).into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api_error.message.contains("bad key"));
        assert!(api_error.details.is_none());
    }

    #[test]
    fn test_auth_error_helpers() {
        let auth_error = unauthorized(None);
        assert_eq!(auth_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error.message, Box::from("Authentication required"));

        let validation = validation_error("Validation failed", json!({"url": "required"}));
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert_eq!(validation.code, Box::from("VALIDATION_FAILED"));
    }
}
