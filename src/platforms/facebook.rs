//! Facebook long-lived token exchange
//!
//! Facebook issues no refresh tokens. A still-valid long-lived token is
//! exchanged for a new one, so the stored refresh seed is the last issued
//! access token and is replaced by every successful exchange.
//!
//! The exchange only accepts a token that has not expired yet. Once a stored
//! record's `expires_at` has passed, Graph answers HTTP 400 (`OAuthException`,
//! code 190) on every attempt and the account must be reconnected.

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    ClientCredentials, RefreshTransport, TokenGrant, TransportError, send_token_request,
};
use crate::models::Platform;

pub const FACEBOOK_TOKEN_URL: &str = "https://graph.facebook.com/v19.0/oauth/access_token";

/// Response from the Graph API `oauth/access_token` exchange
#[derive(Debug, Deserialize)]
pub struct FacebookTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Omitted for tokens that do not expire
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl From<FacebookTokenResponse> for TokenGrant {
    fn from(response: FacebookTokenResponse) -> Self {
        TokenGrant {
            refresh_token: Some(response.access_token.clone()),
            access_token: response.access_token,
            expires_in: response.expires_in,
        }
    }
}

/// Refreshes by exchanging the still-valid long-lived token; expired tokens
/// cannot be exchanged
#[derive(Debug, Clone)]
pub struct FacebookTransport {
    http_client: reqwest::Client,
    credentials: ClientCredentials,
    token_url: String,
}

impl FacebookTransport {
    pub fn new(
        http_client: reqwest::Client,
        credentials: ClientCredentials,
        token_url: Option<String>,
    ) -> Self {
        Self {
            http_client,
            credentials,
            token_url: token_url.unwrap_or_else(|| FACEBOOK_TOKEN_URL.to_string()),
        }
    }
}

#[async_trait]
impl RefreshTransport for FacebookTransport {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TransportError> {
        let query = [
            ("grant_type", "fb_exchange_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("fb_exchange_token", refresh_token),
        ];

        send_token_request::<FacebookTokenResponse>(
            self.http_client.get(&self.token_url).query(&query),
        )
        .await
        .map(TokenGrant::from)
    }
}
