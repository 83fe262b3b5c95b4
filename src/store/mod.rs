//! # Account Store
//!
//! Durable access to credential records keyed by `(user_id, platform, account_id)`.
//! The store performs no network calls; it is the only place credential state
//! is persisted.
//!
//! Implementations:
//! - [`crate::repositories::CredentialRepository`]: SeaORM, encrypted at rest
//! - [`InMemoryAccountStore`]: process-local map, used for substitution in tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CredentialError;
use crate::models::Platform;

pub mod memory;

pub use memory::InMemoryAccountStore;

/// Decrypted credential record for one linked account
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: String,
    pub platform: Platform,
    pub account_id: String,
    pub display_name: Option<String>,
    /// OAuth 2.0 bearer credential
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// `None` means the platform never expires the token
    pub expires_at: Option<DateTime<Utc>>,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    /// OAuth 1.0a access token, independent of `access_token`
    pub oauth1_access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub is_connected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "[REDACTED]" } else { "None" }
        }

        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("account_id", &self.account_id)
            .field("display_name", &self.display_name)
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &redact(&self.consumer_secret))
            .field("oauth1_access_token", &redact(&self.oauth1_access_token))
            .field("access_token_secret", &redact(&self.access_token_secret))
            .field("scopes", &self.scopes)
            .field("is_active", &self.is_active)
            .field("is_connected", &self.is_connected)
            .finish()
    }
}

/// Partial update applied by [`AccountStore::upsert`].
///
/// `None` leaves the stored value untouched.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialFields {
    pub display_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// `Some(None)` clears the expiry ("never expires")
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub oauth1_access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub is_connected: Option<bool>,
}

impl std::fmt::Debug for CredentialFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("CredentialFields")
            .field("display_name", &self.display_name)
            .field("access_token", &set(&self.access_token))
            .field("refresh_token", &set(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &set(&self.consumer_secret))
            .field("oauth1_access_token", &set(&self.oauth1_access_token))
            .field("access_token_secret", &set(&self.access_token_secret))
            .field("scopes", &self.scopes)
            .field("is_active", &self.is_active)
            .field("is_connected", &self.is_connected)
            .finish()
    }
}

impl Credential {
    /// Build a fresh record from the fields of its first upsert
    pub fn from_fields(
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
        now: DateTime<Utc>,
    ) -> Self {
        let mut credential = Credential {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            platform,
            account_id: account_id.to_string(),
            display_name: None,
            access_token: None,
            refresh_token: None,
            expires_at: None,
            consumer_key: None,
            consumer_secret: None,
            oauth1_access_token: None,
            access_token_secret: None,
            scopes: Vec::new(),
            is_active: true,
            is_connected: true,
            created_at: now,
            updated_at: now,
        };
        credential.merge(fields, now);
        credential
    }

    /// Overlay the set fields onto this record
    pub fn merge(&mut self, fields: CredentialFields, now: DateTime<Utc>) {
        let CredentialFields {
            display_name,
            access_token,
            refresh_token,
            expires_at,
            consumer_key,
            consumer_secret,
            oauth1_access_token,
            access_token_secret,
            scopes,
            is_active,
            is_connected,
        } = fields;

        if display_name.is_some() {
            self.display_name = display_name;
        }
        if access_token.is_some() {
            self.access_token = access_token;
        }
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        if let Some(expires_at) = expires_at {
            self.expires_at = expires_at;
        }
        if consumer_key.is_some() {
            self.consumer_key = consumer_key;
        }
        if consumer_secret.is_some() {
            self.consumer_secret = consumer_secret;
        }
        if oauth1_access_token.is_some() {
            self.oauth1_access_token = oauth1_access_token;
        }
        if access_token_secret.is_some() {
            self.access_token_secret = access_token_secret;
        }
        if let Some(scopes) = scopes {
            self.scopes = scopes;
        }
        if let Some(is_active) = is_active {
            self.is_active = is_active;
        }
        if let Some(is_connected) = is_connected {
            self.is_connected = is_connected;
        }
        self.updated_at = now;
    }

    /// Whether all four OAuth 1.0a values are present
    pub fn has_oauth1(&self) -> bool {
        self.consumer_key.is_some()
            && self.consumer_secret.is_some()
            && self.oauth1_access_token.is_some()
            && self.access_token_secret.is_some()
    }
}

/// Persistence contract for credential records.
///
/// `get` returns inactive records too; callers that hand out tokens must
/// filter on `is_active`. `find_active` never returns an inactive record.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<Credential, CredentialError>;

    /// Most recently created active record for the platform
    async fn find_active(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, CredentialError>;

    /// Create the record or merge `fields` into the existing one (last write wins)
    async fn upsert(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError>;

    /// Merge refreshed token fields into an existing record.
    ///
    /// Never creates a record: a row deleted while a refresh was in flight
    /// stays deleted and the call returns `NotFound`.
    async fn update_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError>;

    /// Every record owned by the user, active or not, oldest first
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Credential>, CredentialError>;

    async fn mark_inactive(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError>;

    async fn delete(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError>;
}
