//! Twitter / X OAuth 2.0 refresh
//!
//! Confidential clients authenticate with HTTP Basic; `client_id` is repeated
//! in the form body as the token endpoint expects it for PKCE-issued tokens.

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    ClientCredentials, RefreshTransport, TokenGrant, TransportError, send_token_request,
};
use crate::models::Platform;

pub const TWITTER_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";

/// Response from `POST /2/oauth2/token`
#[derive(Debug, Deserialize)]
pub struct TwitterTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl From<TwitterTokenResponse> for TokenGrant {
    fn from(response: TwitterTokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwitterTransport {
    http_client: reqwest::Client,
    credentials: ClientCredentials,
    token_url: String,
}

impl TwitterTransport {
    pub fn new(
        http_client: reqwest::Client,
        credentials: ClientCredentials,
        token_url: Option<String>,
    ) -> Self {
        Self {
            http_client,
            credentials,
            token_url: token_url.unwrap_or_else(|| TWITTER_TOKEN_URL.to_string()),
        }
    }
}

#[async_trait]
impl RefreshTransport for TwitterTransport {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TransportError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.credentials.client_id.as_str()),
        ];

        let request = self
            .http_client
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&form);

        send_token_request::<TwitterTokenResponse>(request)
            .await
            .map(TokenGrant::from)
    }
}
