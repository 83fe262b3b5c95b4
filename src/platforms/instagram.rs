//! Instagram long-lived token refresh
//!
//! Instagram refreshes a long-lived token with the token itself; no app
//! credentials are involved. Like Facebook, the returned token becomes the
//! next refresh seed.
//! An already expired token cannot be refreshed; the account must be
//! reconnected.

use async_trait::async_trait;
use serde::Deserialize;

use super::{RefreshTransport, TokenGrant, TransportError, send_token_request};
use crate::models::Platform;

pub const INSTAGRAM_REFRESH_URL: &str = "https://graph.instagram.com/refresh_access_token";

/// Response from `GET /refresh_access_token`
#[derive(Debug, Deserialize)]
pub struct InstagramTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl From<InstagramTokenResponse> for TokenGrant {
    fn from(response: InstagramTokenResponse) -> Self {
        TokenGrant {
            refresh_token: Some(response.access_token.clone()),
            access_token: response.access_token,
            expires_in: response.expires_in,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstagramTransport {
    http_client: reqwest::Client,
    refresh_url: String,
}

impl InstagramTransport {
    pub fn new(http_client: reqwest::Client, refresh_url: Option<String>) -> Self {
        Self {
            http_client,
            refresh_url: refresh_url.unwrap_or_else(|| INSTAGRAM_REFRESH_URL.to_string()),
        }
    }
}

#[async_trait]
impl RefreshTransport for InstagramTransport {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TransportError> {
        let query = [
            ("grant_type", "ig_refresh_token"),
            ("access_token", refresh_token),
        ];

        send_token_request::<InstagramTokenResponse>(
            self.http_client.get(&self.refresh_url).query(&query),
        )
        .await
        .map(TokenGrant::from)
    }
}
