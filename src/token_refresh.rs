//! # Token Validator
//!
//! Hands out OAuth 2.0 access tokens that are safe to use right now. A stored
//! token is returned as-is while it has more than the safety margin left;
//! otherwise it is refreshed through the platform's [`RefreshTransport`] and
//! the result is written back before being returned. A stale token is never
//! handed out.
//!
//! The refresh call and its write-back run in a detached task: if the caller
//! is cancelled after the platform has answered, the new token is still
//! persisted. Duplicate concurrent refreshes are tolerated; the last
//! write-back wins. Write-back only updates an existing record, so an account
//! deleted mid-refresh stays deleted.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::clock::Clock;
use crate::config::TokenRefreshConfig;
use crate::error::{CredentialError, NO_REFRESH_TOKEN};
use crate::models::Platform;
use crate::platforms::{TransportError, TransportRegistry};
use crate::store::{AccountStore, Credential, CredentialFields};

/// Default seconds of remaining lifetime below which a token is refreshed
pub const DEFAULT_SAFETY_MARGIN_SECONDS: u64 = 300;

/// Default upper bound on one refresh round trip
pub const DEFAULT_REFRESH_TIMEOUT_SECONDS: u64 = 10;

/// Reason attached when the platform has no transport registered
pub const NO_TRANSPORT: &str = "no refresh transport configured";

/// An access token that may be used immediately
#[derive(Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ValidToken {
    pub account_id: String,
    pub access_token: String,
    /// `None` when the platform never expires the token
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ValidToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidToken")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct TokenValidator {
    store: Arc<dyn AccountStore>,
    transports: TransportRegistry,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    request_timeout: std::time::Duration,
}

impl TokenValidator {
    pub fn new(
        store: Arc<dyn AccountStore>,
        transports: TransportRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            transports,
            clock,
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECONDS as i64),
            request_timeout: std::time::Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECONDS),
        }
    }

    /// Apply margin and timeout from configuration
    pub fn with_config(self, config: &TokenRefreshConfig) -> Self {
        self.with_safety_margin(Duration::seconds(config.safety_margin_seconds as i64))
            .with_request_timeout(std::time::Duration::from_secs(
                config.request_timeout_seconds,
            ))
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_request_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Fresh when the expiry is unknown or strictly more than the margin away
    pub fn is_fresh(&self, expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match expires_at {
            None => true,
            Some(expires_at) => expires_at - now > self.safety_margin,
        }
    }

    /// Return a usable access token for one account, refreshing it if needed
    #[instrument(skip_all, fields(user_id = %user_id, platform = %platform, account_id = %account_id))]
    pub async fn ensure_valid_token(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<ValidToken, CredentialError> {
        let credential = self.store.get(user_id, platform, account_id).await?;
        if !credential.is_active {
            return Err(CredentialError::not_found(user_id, platform, account_id));
        }

        self.validate(credential).await
    }

    /// Same as [`Self::ensure_valid_token`] for the most recent active account
    #[instrument(skip_all, fields(user_id = %user_id, platform = %platform))]
    pub async fn ensure_valid_token_for_platform(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<ValidToken, CredentialError> {
        let credential = self.store.find_active(user_id, platform).await?;
        self.validate(credential).await
    }

    async fn validate(&self, credential: Credential) -> Result<ValidToken, CredentialError> {
        let platform = credential.platform;
        let now = self.clock.now();

        if let Some(access_token) = credential.access_token.as_ref() {
            if self.is_fresh(credential.expires_at, now) {
                counter!("token_validation_cache_hits_total", "platform" => platform.slug())
                    .increment(1);
                debug!(expires_at = ?credential.expires_at, "Stored token is fresh");
                return Ok(ValidToken {
                    account_id: credential.account_id,
                    access_token: access_token.clone(),
                    expires_at: credential.expires_at,
                });
            }
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            warn!("Token is stale and no refresh token is stored");
            return Err(CredentialError::refresh_failure(platform, NO_REFRESH_TOKEN));
        };

        let Some(transport) = self.transports.get(platform) else {
            warn!("Token is stale and the platform has no refresh transport");
            return Err(CredentialError::refresh_failure(platform, NO_TRANSPORT));
        };

        counter!("token_refresh_attempts_total", "platform" => platform.slug()).increment(1);

        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let timeout = self.request_timeout;
        let user_id = credential.user_id.clone();
        let account_id = credential.account_id.clone();

        let task = tokio::spawn(async move {
            let started = Instant::now();

            let grant = match tokio::time::timeout(timeout, transport.refresh(&refresh_token)).await
            {
                Ok(Ok(grant)) => grant,
                Ok(Err(error)) => return Err(refresh_error(platform, error)),
                Err(_) => return Err(refresh_error(platform, TransportError::Timeout)),
            };

            histogram!("token_refresh_latency_ms", "platform" => platform.slug())
                .record(started.elapsed().as_secs_f64() * 1_000.0);

            let expires_at = match grant.expires_in {
                None => None,
                Some(seconds) => match expiry_after(clock.now(), seconds) {
                    Some(expires_at) => Some(expires_at),
                    None => {
                        return Err(refresh_error(
                            platform,
                            TransportError::MalformedResponse(format!(
                                "expires_in out of range: {}",
                                seconds
                            )),
                        ));
                    }
                },
            };
            let rotated = grant.refresh_token.is_some();

            let fields = CredentialFields {
                access_token: Some(grant.access_token.clone()),
                refresh_token: grant.refresh_token,
                expires_at: Some(expires_at),
                ..Default::default()
            };
            store
                .update_tokens(&user_id, platform, &account_id, fields)
                .await?;

            info!(
                user_id = %user_id,
                platform = %platform,
                account_id = %account_id,
                refresh_token_rotated = rotated,
                expires_at = ?expires_at,
                refresh_duration_ms = started.elapsed().as_millis(),
                "Access token refreshed"
            );

            Ok(ValidToken {
                account_id,
                access_token: grant.access_token,
                expires_at,
            })
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(CredentialError::refresh_failure(
                platform,
                format!("refresh task did not complete: {}", join_error),
            )),
        };

        match &outcome {
            Ok(_) => {
                counter!("token_refresh_success_total", "platform" => platform.slug())
                    .increment(1);
            }
            Err(error) => {
                counter!("token_refresh_failure_total", "platform" => platform.slug())
                    .increment(1);
                warn!(error = %error, "Token refresh failed");
            }
        }

        outcome
    }
}

/// `now + seconds`; `None` for a negative lifetime or one past chrono's range
fn expiry_after(now: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    if seconds < 0 {
        return None;
    }
    Duration::try_seconds(seconds).and_then(|lifetime| now.checked_add_signed(lifetime))
}

fn refresh_error(platform: Platform, error: TransportError) -> CredentialError {
    let reason = match &error {
        TransportError::Http { status, .. } => {
            format!("refresh endpoint returned HTTP {}", status)
        }
        other => other.to_string(),
    };

    CredentialError::RefreshFailure {
        platform,
        reason,
        upstream: Some(error),
    }
}
