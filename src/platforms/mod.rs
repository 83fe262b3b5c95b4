//! # Refresh transports
//!
//! One [`RefreshTransport`] per platform exchanges a stored refresh token for a
//! new access token. Each platform answers with its own response shape; those
//! are decoded into tagged structs and normalised into [`TokenGrant`] here so
//! the validator never sees platform specifics.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::config::AppConfig;
use crate::models::Platform;

pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod twitter;
pub mod youtube;

pub use facebook::FacebookTransport;
pub use instagram::InstagramTransport;
pub use linkedin::LinkedInTransport;
pub use twitter::TwitterTransport;
pub use youtube::YouTubeTransport;

/// Upstream bodies kept on an error are cut to this many characters
pub const MAX_ERROR_BODY_CHARS: usize = 200;

/// Normalised result of a successful refresh
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the platform did not rotate the refresh token
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Failure talking to a platform token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("token endpoint returned HTTP {status}")]
    Http { status: u16, body: Option<String> },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("token endpoint timed out")]
    Timeout,
}

impl TransportError {
    /// Structured form attached to API error details
    pub fn details(&self) -> serde_json::Value {
        match self {
            TransportError::Http { status, body } => json!({
                "kind": "http",
                "status": status,
                "body": body,
            }),
            TransportError::Network(message) => json!({
                "kind": "network",
                "message": message,
            }),
            TransportError::MalformedResponse(message) => json!({
                "kind": "malformed_response",
                "message": message,
            }),
            TransportError::Timeout => json!({ "kind": "timeout" }),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout
        } else if error.is_decode() {
            TransportError::MalformedResponse(error.to_string())
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

/// Cut `body` to at most `max_chars` characters without splitting a code point
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((byte_index, _)) => body[..byte_index].to_string(),
        None => body.to_string(),
    }
}

/// Send a token request and decode the platform's JSON response
pub(crate) async fn send_token_request<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, TransportError> {
    let response = request
        .header("Accept", "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .ok()
            .filter(|text| !text.is_empty())
            .map(|text| truncate_body(&text, MAX_ERROR_BODY_CHARS));
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice::<T>(&bytes)
        .map_err(|e| TransportError::MalformedResponse(format!("failed to parse body: {}", e)))
}

/// OAuth client registration used to authenticate refresh calls
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Exchanges a refresh token for a new access token on one platform
#[async_trait]
pub trait RefreshTransport: Send + Sync {
    fn platform(&self) -> Platform;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, TransportError>;
}

/// Platform → transport lookup handed to the validator
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<Platform, Arc<dyn RefreshTransport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the transport for its platform
    pub fn register(&mut self, transport: Arc<dyn RefreshTransport>) {
        self.transports.insert(transport.platform(), transport);
    }

    pub fn with(mut self, transport: Arc<dyn RefreshTransport>) -> Self {
        self.register(transport);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn RefreshTransport>> {
        self.transports.get(&platform).cloned()
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.transports.keys().copied().collect();
        platforms.sort_by_key(|platform| platform.slug());
        platforms
    }

    /// Build transports for every platform whose OAuth client is configured
    pub fn from_config(config: &AppConfig, http_client: reqwest::Client) -> Self {
        let mut registry = Self::new();

        for platform in Platform::ALL {
            let client_config = config.platform_client(platform);
            let token_url = client_config.token_url.clone();

            if platform == Platform::Instagram {
                registry.register(Arc::new(InstagramTransport::new(
                    http_client.clone(),
                    token_url,
                )));
                continue;
            }

            let Some(credentials) = client_config.credentials() else {
                warn!(
                    platform = %platform,
                    "Refresh transport not registered: missing client credentials"
                );
                continue;
            };

            let transport: Arc<dyn RefreshTransport> = match platform {
                Platform::Twitter => Arc::new(TwitterTransport::new(
                    http_client.clone(),
                    credentials,
                    token_url,
                )),
                Platform::LinkedIn => Arc::new(LinkedInTransport::new(
                    http_client.clone(),
                    credentials,
                    token_url,
                )),
                Platform::Facebook => Arc::new(FacebookTransport::new(
                    http_client.clone(),
                    credentials,
                    token_url,
                )),
                Platform::YouTube => Arc::new(YouTubeTransport::new(
                    http_client.clone(),
                    credentials,
                    token_url,
                )),
                Platform::Instagram => continue,
            };
            registry.register(transport);
        }

        registry
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}
