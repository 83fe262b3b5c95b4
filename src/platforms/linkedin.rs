//! LinkedIn OAuth 2.0 refresh

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    ClientCredentials, RefreshTransport, TokenGrant, TransportError, send_token_request,
};
use crate::models::Platform;

pub const LINKEDIN_TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";

/// Response from `POST /oauth/v2/accessToken`.
///
/// LinkedIn also reports `refresh_token_expires_in`; it is kept for logging only.
#[derive(Debug, Deserialize)]
pub struct LinkedInTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl From<LinkedInTokenResponse> for TokenGrant {
    fn from(response: LinkedInTokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkedInTransport {
    http_client: reqwest::Client,
    credentials: ClientCredentials,
    token_url: String,
}

impl LinkedInTransport {
    pub fn new(
        http_client: reqwest::Client,
        credentials: ClientCredentials,
        token_url: Option<String>,
    ) -> Self {
        Self {
            http_client,
            credentials,
            token_url: token_url.unwrap_or_else(|| LINKEDIN_TOKEN_URL.to_string()),
        }
    }
}

#[async_trait]
impl RefreshTransport for LinkedInTransport {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TransportError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];

        let response: LinkedInTokenResponse =
            send_token_request(self.http_client.post(&self.token_url).form(&form)).await?;

        if let Some(seconds) = response.refresh_token_expires_in {
            tracing::debug!(
                refresh_token_expires_in = seconds,
                "LinkedIn refresh token lifetime"
            );
        }

        Ok(response.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> LinkedInTransport {
        LinkedInTransport::new(
            reqwest::Client::new(),
            ClientCredentials::new("li-client", "li-secret"),
            Some(format!("{}/oauth/v2/accessToken", server.uri())),
        )
    }

    #[tokio::test]
    async fn refresh_sends_client_credentials_in_form() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("client_id=li-client"))
            .and(body_string_contains("client_secret=li-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AQX-new",
                "expires_in": 5184000,
                "refresh_token": "AQW-new",
                "refresh_token_expires_in": 31536000,
                "scope": "w_member_social"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = transport(&server).refresh("AQW-old").await.unwrap();

        assert_eq!(grant.access_token, "AQX-new");
        assert_eq!(grant.refresh_token.as_deref(), Some("AQW-new"));
        assert_eq!(grant.expires_in, Some(5_184_000));
    }

    #[tokio::test]
    async fn missing_rotation_leaves_refresh_token_empty() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AQX-new",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let grant = transport(&server).refresh("AQW-old").await.unwrap();
        assert_eq!(grant.refresh_token, None);
    }

    #[tokio::test]
    async fn long_error_bodies_are_truncated() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/v2/accessToken"))
            .respond_with(ResponseTemplate::new(401).set_body_string("x".repeat(1000)))
            .mount(&server)
            .await;

        match transport(&server).refresh("AQW-old").await.unwrap_err() {
            TransportError::Http { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body.unwrap().len(), crate::platforms::MAX_ERROR_BODY_CHARS);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
