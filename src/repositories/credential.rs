//! Credential repository for database operations
//!
//! SeaORM-backed [`AccountStore`]. Secret columns are encrypted with the
//! configured [`CryptoKey`] using AAD bound to the record's
//! `(user, platform, account)` tuple; decrypted values only leave this module
//! inside a [`Credential`].

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::clock::{Clock, SystemClock};
use crate::crypto::{CryptoKey, credential_aad, decrypt_secret, encrypt_secret, is_encrypted_payload};
use crate::error::{CredentialError, is_unique_violation};
use crate::models::Platform;
use crate::models::credential::{self, Entity as PlatformCredential};
use crate::store::{AccountStore, Credential, CredentialFields};

/// Repository for credential database operations
#[derive(Clone)]
pub struct CredentialRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    /// Key for secret column encryption
    pub crypto_key: CryptoKey,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRepository")
            .field("crypto_key", &self.crypto_key)
            .finish_non_exhaustive()
    }
}

impl CredentialRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self::with_clock(db, crypto_key, Arc::new(SystemClock))
    }

    pub fn with_clock(
        db: Arc<DatabaseConnection>,
        crypto_key: CryptoKey,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            crypto_key,
            clock,
        }
    }

    /// Finds the raw row for a `(user, platform, account)` tuple
    pub async fn find_model(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<Option<credential::Model>> {
        Ok(PlatformCredential::find()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::Platform.eq(platform.slug()))
            .filter(credential::Column::AccountId.eq(account_id))
            .one(&*self.db)
            .await?)
    }

    /// Most recently created active row for a user/platform pair
    pub async fn find_active_model(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<credential::Model>> {
        Ok(PlatformCredential::find()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::Platform.eq(platform.slug()))
            .filter(credential::Column::IsActive.eq(true))
            .order_by_desc(credential::Column::CreatedAt)
            .order_by_desc(credential::Column::Id)
            .one(&*self.db)
            .await?)
    }

    /// Lists every row owned by a user, oldest first
    pub async fn list_by_user(&self, user_id: &str) -> Result<Vec<credential::Model>> {
        Ok(PlatformCredential::find()
            .filter(credential::Column::UserId.eq(user_id))
            .order_by_asc(credential::Column::CreatedAt)
            .order_by_asc(credential::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Decrypts a row into its domain form
    pub fn decrypt(&self, model: &credential::Model) -> Result<Credential> {
        let platform: Platform = model
            .platform
            .parse()
            .map_err(|e| anyhow!("stored credential {} has {}", model.id, e))?;
        let aad = credential_aad(&model.user_id, platform, &model.account_id);

        if has_legacy_plaintext(model) {
            tracing::warn!(
                user_id = %model.user_id,
                platform = %platform,
                account_id = %model.account_id,
                "Legacy plaintext tokens detected, consider migrating to encrypted format"
            );
        }

        let open = |column: &Option<Vec<u8>>| {
            decrypt_secret(&self.crypto_key, &aad, column.as_deref()).map_err(|e| {
                tracing::error!(
                    user_id = %model.user_id,
                    platform = %platform,
                    account_id = %model.account_id,
                    "Credential decryption failed"
                );
                anyhow!("credential decryption failed: {}", e)
            })
        };

        let scopes = model
            .scopes
            .clone()
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()
            .map_err(|e| anyhow!("stored scopes are not a string list: {}", e))?
            .unwrap_or_default();

        Ok(Credential {
            id: model.id,
            user_id: model.user_id.clone(),
            platform,
            account_id: model.account_id.clone(),
            display_name: model.display_name.clone(),
            access_token: open(&model.access_token_ciphertext)?,
            refresh_token: open(&model.refresh_token_ciphertext)?,
            expires_at: model.expires_at.map(|at| at.with_timezone(&Utc)),
            consumer_key: model.consumer_key.clone(),
            consumer_secret: open(&model.consumer_secret_ciphertext)?,
            oauth1_access_token: open(&model.oauth1_token_ciphertext)?,
            access_token_secret: open(&model.oauth1_token_secret_ciphertext)?,
            scopes,
            is_active: model.is_active,
            is_connected: model.is_connected,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }

    /// Encrypts a domain credential into a fully populated active model
    pub fn encrypt(&self, credential: &Credential) -> Result<credential::ActiveModel> {
        let aad = credential_aad(
            &credential.user_id,
            credential.platform,
            &credential.account_id,
        );
        let seal = |secret: &Option<String>| {
            encrypt_secret(&self.crypto_key, &aad, secret.as_deref())
                .map_err(|e| anyhow!("credential encryption failed: {}", e))
        };

        let expires_at: Option<DateTimeWithTimeZone> = credential.expires_at.map(Into::into);

        Ok(credential::ActiveModel {
            id: Set(credential.id),
            user_id: Set(credential.user_id.clone()),
            platform: Set(credential.platform.slug().to_string()),
            account_id: Set(credential.account_id.clone()),
            display_name: Set(credential.display_name.clone()),
            access_token_ciphertext: Set(seal(&credential.access_token)?),
            refresh_token_ciphertext: Set(seal(&credential.refresh_token)?),
            expires_at: Set(expires_at),
            consumer_key: Set(credential.consumer_key.clone()),
            consumer_secret_ciphertext: Set(seal(&credential.consumer_secret)?),
            oauth1_token_ciphertext: Set(seal(&credential.oauth1_access_token)?),
            oauth1_token_secret_ciphertext: Set(seal(&credential.access_token_secret)?),
            scopes: Set(Some(serde_json::to_value(&credential.scopes)?)),
            is_active: Set(credential.is_active),
            is_connected: Set(credential.is_connected),
            created_at: Set(credential.created_at.into()),
            updated_at: Set(credential.updated_at.into()),
        })
    }

    async fn insert_credential(&self, credential: &Credential) -> Result<(), InsertError> {
        let model = self.encrypt(credential).map_err(InsertError::Other)?;
        PlatformCredential::insert(model)
            .exec(&*self.db)
            .await
            .map_err(InsertError::Db)?;
        Ok(())
    }

    async fn update_credential(&self, credential: &Credential) -> Result<()> {
        let model = self.encrypt(credential)?;
        model.update(&*self.db).await?;
        Ok(())
    }

    /// Active model touching only the columns `fields` sets.
    ///
    /// Every other column stays `Unchanged` and is left out of the UPDATE, so
    /// a concurrent write to those columns survives.
    pub fn patch(
        &self,
        existing: credential::Model,
        fields: CredentialFields,
    ) -> Result<credential::ActiveModel> {
        let platform: Platform = existing
            .platform
            .parse()
            .map_err(|e| anyhow!("stored credential {} has {}", existing.id, e))?;
        let aad = credential_aad(&existing.user_id, platform, &existing.account_id);
        let seal = |secret: String| {
            encrypt_secret(&self.crypto_key, &aad, Some(secret.as_str()))
                .map_err(|e| anyhow!("credential encryption failed: {}", e))
        };

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

        let mut model: credential::ActiveModel = existing.into();
        if let Some(display_name) = display_name {
            model.display_name = Set(Some(display_name));
        }
        if let Some(token) = access_token {
            model.access_token_ciphertext = Set(seal(token)?);
        }
        if let Some(token) = refresh_token {
            model.refresh_token_ciphertext = Set(seal(token)?);
        }
        if let Some(expires_at) = expires_at {
            model.expires_at = Set(expires_at.map(Into::into));
        }
        if let Some(consumer_key) = consumer_key {
            model.consumer_key = Set(Some(consumer_key));
        }
        if let Some(secret) = consumer_secret {
            model.consumer_secret_ciphertext = Set(seal(secret)?);
        }
        if let Some(token) = oauth1_access_token {
            model.oauth1_token_ciphertext = Set(seal(token)?);
        }
        if let Some(secret) = access_token_secret {
            model.oauth1_token_secret_ciphertext = Set(seal(secret)?);
        }
        if let Some(scopes) = scopes {
            model.scopes = Set(Some(serde_json::to_value(scopes)?));
        }
        if let Some(is_active) = is_active {
            model.is_active = Set(is_active);
        }
        if let Some(is_connected) = is_connected {
            model.is_connected = Set(is_connected);
        }
        model.updated_at = Set(self.clock.now().into());

        Ok(model)
    }

    /// Writes `fields` onto an existing row and returns the stored result.
    ///
    /// `None` when the row was deleted before the update landed.
    pub async fn merge_into_existing(
        &self,
        existing: &credential::Model,
        fields: CredentialFields,
    ) -> Result<Option<Credential>> {
        let model = self.patch(existing.clone(), fields)?;

        match model.update(&*self.db).await {
            Ok(stored) => Ok(Some(self.decrypt(&stored)?)),
            Err(DbErr::RecordNotUpdated) | Err(DbErr::RecordNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Merges `fields` into an existing row; `None` when there is no row
    pub async fn update_existing(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Option<Credential>> {
        match self.find_model(user_id, platform, account_id).await? {
            Some(existing) => self.merge_into_existing(&existing, fields).await,
            None => Ok(None),
        }
    }

    /// Creates the record or merges `fields` into it
    pub async fn upsert_credential(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential> {
        if let Some(existing) = self.find_model(user_id, platform, account_id).await? {
            return self
                .merge_into_existing(&existing, fields)
                .await?
                .ok_or_else(|| anyhow!("credential deleted during upsert"));
        }

        let credential = Credential::from_fields(
            user_id,
            platform,
            account_id,
            fields.clone(),
            self.clock.now(),
        );

        match self.insert_credential(&credential).await {
            Ok(()) => Ok(credential),
            Err(InsertError::Db(e)) if is_unique_violation(&e) => {
                // Lost an insert race; fold our fields into the winner's row
                tracing::debug!(
                    user_id = %user_id,
                    platform = %platform,
                    account_id = %account_id,
                    "Concurrent credential insert detected, merging"
                );
                let existing = self
                    .find_model(user_id, platform, account_id)
                    .await?
                    .ok_or_else(|| anyhow!("credential vanished after unique violation"))?;
                self.merge_into_existing(&existing, fields)
                    .await?
                    .ok_or_else(|| anyhow!("credential vanished after unique violation"))
            }
            Err(InsertError::Db(e)) => Err(e.into()),
            Err(InsertError::Other(e)) => Err(e),
        }
    }

    /// Flags the row as disconnected; returns `false` when no row matched
    pub async fn deactivate(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<bool> {
        let Some(existing) = self.find_model(user_id, platform, account_id).await? else {
            return Ok(false);
        };

        let mut model: credential::ActiveModel = existing.into();
        model.is_active = Set(false);
        model.is_connected = Set(false);
        model.updated_at = Set(self.clock.now().into());
        model.update(&*self.db).await?;
        Ok(true)
    }

    /// Rewrites every row that still carries legacy plaintext secrets.
    ///
    /// Returns the number of rows re-encrypted.
    pub async fn reencrypt_legacy_rows(&self) -> Result<usize> {
        let rows = PlatformCredential::find().all(&*self.db).await?;
        let mut updated = 0usize;

        for row in rows.iter().filter(|row| has_legacy_plaintext(row)) {
            let mut credential = self
                .decrypt(row)
                .with_context(|| format!("reading credential {}", row.id))?;
            credential.updated_at = self.clock.now();
            self.update_credential(&credential)
                .await
                .with_context(|| format!("re-encrypting credential {}", row.id))?;
            updated += 1;
        }

        tracing::info!(updated, scanned = rows.len(), "Legacy plaintext re-encryption finished");
        Ok(updated)
    }

    /// Deletes the row; returns `false` when no row matched
    pub async fn delete_by_key(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<bool> {
        let result = PlatformCredential::delete_many()
            .filter(credential::Column::UserId.eq(user_id))
            .filter(credential::Column::Platform.eq(platform.slug()))
            .filter(credential::Column::AccountId.eq(account_id))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected > 0)
    }
}

/// True when any secret column still holds a pre-encryption plaintext value
pub fn has_legacy_plaintext(model: &credential::Model) -> bool {
    [
        &model.access_token_ciphertext,
        &model.refresh_token_ciphertext,
        &model.consumer_secret_ciphertext,
        &model.oauth1_token_ciphertext,
        &model.oauth1_token_secret_ciphertext,
    ]
    .iter()
    .any(|column| {
        column
            .as_ref()
            .is_some_and(|bytes| !bytes.is_empty() && !is_encrypted_payload(bytes))
    })
}

enum InsertError {
    Db(DbErr),
    Other(anyhow::Error),
}

fn storage_error(error: anyhow::Error) -> CredentialError {
    tracing::error!(error = %error, "Credential repository failure");
    CredentialError::storage(error)
}

#[async_trait]
impl AccountStore for CredentialRepository {
    async fn get(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<Credential, CredentialError> {
        let model = self
            .find_model(user_id, platform, account_id)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| CredentialError::not_found(user_id, platform, account_id))?;

        self.decrypt(&model).map_err(storage_error)
    }

    async fn find_active(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, CredentialError> {
        let model = self
            .find_active_model(user_id, platform)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| CredentialError::no_active_account(user_id, platform))?;

        self.decrypt(&model).map_err(storage_error)
    }

    async fn upsert(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError> {
        self.upsert_credential(user_id, platform, account_id, fields)
            .await
            .map_err(storage_error)
    }

    async fn update_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError> {
        self.update_existing(user_id, platform, account_id, fields)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| CredentialError::not_found(user_id, platform, account_id))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Credential>, CredentialError> {
        self.list_by_user(user_id)
            .await
            .map_err(storage_error)?
            .iter()
            .map(|model| self.decrypt(model).map_err(storage_error))
            .collect()
    }

    async fn mark_inactive(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError> {
        if self
            .deactivate(user_id, platform, account_id)
            .await
            .map_err(storage_error)?
        {
            Ok(())
        } else {
            Err(CredentialError::not_found(user_id, platform, account_id))
        }
    }

    async fn delete(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError> {
        if self
            .delete_by_key(user_id, platform, account_id)
            .await
            .map_err(storage_error)?
        {
            Ok(())
        } else {
            Err(CredentialError::not_found(user_id, platform, account_id))
        }
    }
}
