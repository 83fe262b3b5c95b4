//! # Dual-auth request signer
//!
//! Twitter/X serves two API generations: the v2 surface takes an OAuth 2.0
//! bearer token, while the legacy v1.1 surface (media upload) still requires
//! OAuth 1.0a request signatures. [`DualAuthSigner`] picks the scheme from the
//! target URL and produces the matching `Authorization` header.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use utoipa::ToSchema;

use crate::clock::{Clock, NonceSource};
use crate::error::CredentialError;
use crate::models::Platform;
use crate::store::{AccountStore, Credential};
use crate::token_refresh::TokenValidator;

pub mod oauth1;

pub use oauth1::{Oauth1Credentials, SignedRequest, sign_request_with};

/// Hosts whose `/1.1/` paths require OAuth 1.0a
pub const LEGACY_HOSTS: [&str; 4] = [
    "upload.twitter.com",
    "api.twitter.com",
    "upload.x.com",
    "api.x.com",
];

/// Authentication scheme required by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// OAuth 2.0 bearer token
    Bearer,
    /// OAuth 1.0a HMAC-SHA1 signature
    Signed,
}

/// Legacy v1.1 paths on Twitter/X hosts are signed; everything else is bearer
pub fn determine_scheme(url: &Url) -> AuthScheme {
    let legacy_host = url
        .host_str()
        .is_some_and(|host| LEGACY_HOSTS.contains(&host));

    if legacy_host && url.path().starts_with("/1.1/") {
        AuthScheme::Signed
    } else {
        AuthScheme::Bearer
    }
}

/// Header produced for one outbound request
#[derive(Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Authorization {
    pub scheme: AuthScheme,
    /// Value for the `Authorization` header
    pub header_value: String,
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization")
            .field("scheme", &self.scheme)
            .field("header_value", &"[REDACTED]")
            .finish()
    }
}

pub struct DualAuthSigner {
    validator: Arc<TokenValidator>,
    store: Arc<dyn AccountStore>,
    nonces: Arc<dyn NonceSource>,
    clock: Arc<dyn Clock>,
}

impl DualAuthSigner {
    pub fn new(
        validator: Arc<TokenValidator>,
        store: Arc<dyn AccountStore>,
        nonces: Arc<dyn NonceSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            validator,
            store,
            nonces,
            clock,
        }
    }

    /// OAuth 1.0a header for a request made with `credential`.
    ///
    /// Fails with `MissingCredentials` before touching anything else when the
    /// record lacks part of its OAuth 1.0a set.
    pub fn sign_request(
        &self,
        method: &str,
        url: &Url,
        params: &[(String, String)],
        credential: &Credential,
    ) -> Result<String, CredentialError> {
        let credentials = Oauth1Credentials::from_credential(credential)?;
        let nonce = self.nonces.nonce();
        let timestamp = self.clock.now().timestamp();

        sign_request_with(&credentials, method, url, params, &nonce, timestamp)
            .map(|signed| signed.authorization)
    }

    /// Build the `Authorization` header for a Twitter account's outbound call
    #[instrument(skip_all, fields(user_id = %user_id, account_id = %account_id, method = %method, path = %url.path()))]
    pub async fn authorize(
        &self,
        user_id: &str,
        account_id: &str,
        method: &str,
        url: &Url,
        params: &[(String, String)],
    ) -> Result<Authorization, CredentialError> {
        let scheme = determine_scheme(url);
        debug!(scheme = ?scheme, "Resolved auth scheme");

        let header_value = match scheme {
            AuthScheme::Bearer => {
                let token = self
                    .validator
                    .ensure_valid_token(user_id, Platform::Twitter, account_id)
                    .await?;
                format!("Bearer {}", token.access_token)
            }
            AuthScheme::Signed => {
                let credential = self
                    .store
                    .get(user_id, Platform::Twitter, account_id)
                    .await?;
                if !credential.is_active {
                    return Err(CredentialError::not_found(
                        user_id,
                        Platform::Twitter,
                        account_id,
                    ));
                }
                self.sign_request(method, url, params, &credential)?
            }
        };

        Ok(Authorization {
            scheme,
            header_value,
        })
    }
}
