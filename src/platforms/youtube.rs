//! YouTube refresh through Google's OAuth 2.0 token endpoint

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    ClientCredentials, RefreshTransport, TokenGrant, TransportError, send_token_request,
};
use crate::models::Platform;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google token endpoint response
#[derive(Debug, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Google rarely rotates refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl From<GoogleTokenResponse> for TokenGrant {
    fn from(response: GoogleTokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        }
    }
}

#[derive(Debug, Clone)]
pub struct YouTubeTransport {
    http_client: reqwest::Client,
    credentials: ClientCredentials,
    token_url: String,
}

impl YouTubeTransport {
    pub fn new(
        http_client: reqwest::Client,
        credentials: ClientCredentials,
        token_url: Option<String>,
    ) -> Self {
        Self {
            http_client,
            credentials,
            token_url: token_url.unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        }
    }
}

#[async_trait]
impl RefreshTransport for YouTubeTransport {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TransportError> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        send_token_request::<GoogleTokenResponse>(
            self.http_client.post(&self.token_url).form(&form),
        )
        .await
        .map(TokenGrant::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn refresh_returns_google_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("refresh_token=1%2F%2Fgoogle-refresh"))
            .and(body_string_contains("client_secret=yt-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.new",
                "expires_in": 3599,
                "scope": "https://www.googleapis.com/auth/youtube.upload",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let transport = YouTubeTransport::new(
            reqwest::Client::new(),
            ClientCredentials::new("yt-client", "yt-secret"),
            Some(format!("{}/token", server.uri())),
        );

        let grant = transport.refresh("1//google-refresh").await.unwrap();

        assert_eq!(grant.access_token, "ya29.new");
        assert_eq!(grant.refresh_token, None);
        assert_eq!(grant.expires_in, Some(3599));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let transport = YouTubeTransport::new(
            reqwest::Client::new(),
            ClientCredentials::new("yt-client", "yt-secret"),
            Some("http://127.0.0.1:9/token".to_string()),
        );

        let error = transport.refresh("r").await.unwrap_err();
        assert!(matches!(error, TransportError::Network(_)));
    }
}
