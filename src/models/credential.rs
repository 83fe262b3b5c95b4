//! Platform credential entity model
//!
//! SeaORM entity for the `platform_credentials` table. Secret columns carry
//! ciphertext produced by [`crate::crypto`]; decrypted values only ever live in
//! [`crate::store::Credential`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Linked social account credentials
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "platform_credentials")]
pub struct Model {
    /// Surrogate primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning tenant (opaque)
    pub user_id: String,

    /// Platform slug, see [`crate::models::Platform`]
    pub platform: String,

    /// Platform-assigned account identifier (unique per user & platform)
    pub account_id: String,

    pub display_name: Option<String>,

    /// OAuth 2.0 access token ciphertext
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// OAuth 2.0 refresh token ciphertext
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// Access token expiry; `None` means the platform never expires it
    pub expires_at: Option<DateTimeWithTimeZone>,

    /// OAuth 1.0a consumer key (not secret on its own)
    pub consumer_key: Option<String>,

    pub consumer_secret_ciphertext: Option<Vec<u8>>,

    /// OAuth 1.0a access token ciphertext, distinct from the OAuth 2.0 token
    pub oauth1_token_ciphertext: Option<Vec<u8>>,

    pub oauth1_token_secret_ciphertext: Option<Vec<u8>>,

    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: Option<JsonValue>,

    /// `false` means logically disconnected; never selected for use
    pub is_active: bool,

    pub is_connected: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
