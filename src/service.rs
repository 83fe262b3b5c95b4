//! # Credential Service
//!
//! Entry point used by the HTTP layer and by embedding code. Wires one
//! [`AccountStore`] into the [`TokenValidator`] and [`DualAuthSigner`] so that
//! all three see the same records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, instrument};
use url::Url;

use crate::clock::{Clock, NonceSource};
use crate::config::TokenRefreshConfig;
use crate::error::CredentialError;
use crate::models::Platform;
use crate::platforms::TransportRegistry;
use crate::signer::{Authorization, DualAuthSigner};
use crate::store::{AccountStore, Credential, CredentialFields};
use crate::token_refresh::{TokenValidator, ValidToken};

pub struct CredentialService {
    store: Arc<dyn AccountStore>,
    validator: Arc<TokenValidator>,
    signer: Arc<DualAuthSigner>,
    clock: Arc<dyn Clock>,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        transports: TransportRegistry,
        clock: Arc<dyn Clock>,
        nonces: Arc<dyn NonceSource>,
        refresh: &TokenRefreshConfig,
    ) -> Self {
        let validator = Arc::new(
            TokenValidator::new(Arc::clone(&store), transports, Arc::clone(&clock))
                .with_config(refresh),
        );
        let signer = Arc::new(DualAuthSigner::new(
            Arc::clone(&validator),
            Arc::clone(&store),
            nonces,
            Arc::clone(&clock),
        ));

        Self {
            store,
            validator,
            signer,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record the outcome of an OAuth callback or credential submission
    #[instrument(skip_all, fields(user_id = %user_id, platform = %platform, account_id = %account_id))]
    pub async fn upsert_credential(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError> {
        let credential = self
            .store
            .upsert(user_id, platform, account_id, fields)
            .await?;

        counter!("credential_upserts_total", "platform" => platform.slug()).increment(1);
        info!(
            credential_id = %credential.id,
            has_refresh_token = credential.refresh_token.is_some(),
            has_oauth1 = credential.has_oauth1(),
            "Stored credential"
        );
        Ok(credential)
    }

    pub async fn find_active(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, CredentialError> {
        self.store.find_active(user_id, platform).await
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<Credential>, CredentialError> {
        self.store.list_for_user(user_id).await
    }

    pub async fn ensure_valid_token(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<ValidToken, CredentialError> {
        self.validator
            .ensure_valid_token(user_id, platform, account_id)
            .await
    }

    pub async fn ensure_valid_token_for_platform(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<ValidToken, CredentialError> {
        self.validator
            .ensure_valid_token_for_platform(user_id, platform)
            .await
    }

    /// `Authorization` header for an outbound Twitter/X call
    pub async fn sign_request(
        &self,
        user_id: &str,
        account_id: &str,
        method: &str,
        url: &Url,
        params: &[(String, String)],
    ) -> Result<Authorization, CredentialError> {
        self.signer
            .authorize(user_id, account_id, method, url, params)
            .await
    }

    /// Soft-disconnect: the record stays but is never used again
    #[instrument(skip_all, fields(user_id = %user_id, platform = %platform, account_id = %account_id))]
    pub async fn disconnect(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError> {
        self.store
            .mark_inactive(user_id, platform, account_id)
            .await?;
        info!("Account disconnected");
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %user_id, platform = %platform, account_id = %account_id))]
    pub async fn delete(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError> {
        self.store.delete(user_id, platform, account_id).await?;
        info!("Credential deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, OsRngNonceSource};
    use crate::signer::AuthScheme;
    use crate::store::InMemoryAccountStore;
    use chrono::{TimeZone, Utc};

    fn service() -> CredentialService {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        CredentialService::new(
            Arc::new(InMemoryAccountStore::with_clock(clock.clone())),
            TransportRegistry::new(),
            clock,
            Arc::new(OsRngNonceSource),
            &TokenRefreshConfig::default(),
        )
    }

    #[tokio::test]
    async fn oauth2_and_oauth1_fields_live_side_by_side() {
        let service = service();
        service
            .upsert_credential(
                "u1",
                Platform::Twitter,
                "111",
                CredentialFields {
                    access_token: Some("bearer".into()),
                    expires_at: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let stored = service
            .upsert_credential(
                "u1",
                Platform::Twitter,
                "111",
                CredentialFields {
                    consumer_key: Some("ck".into()),
                    consumer_secret: Some("cs".into()),
                    oauth1_access_token: Some("ot".into()),
                    access_token_secret: Some("ts".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(stored.access_token.as_deref(), Some("bearer"));
        assert!(stored.has_oauth1());

        let token = service
            .ensure_valid_token("u1", Platform::Twitter, "111")
            .await
            .unwrap();
        assert_eq!(token.access_token, "bearer");

        let auth = service
            .sign_request(
                "u1",
                "111",
                "POST",
                &Url::parse("https://upload.twitter.com/1.1/media/upload.json").unwrap(),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(auth.scheme, AuthScheme::Signed);
        assert!(auth.header_value.contains("oauth_token=\"ot\""));
    }

    #[tokio::test]
    async fn disconnected_account_yields_not_found() {
        let service = service();
        service
            .upsert_credential(
                "u1",
                Platform::LinkedIn,
                "li",
                CredentialFields {
                    access_token: Some("a".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        service
            .disconnect("u1", Platform::LinkedIn, "li")
            .await
            .unwrap();

        let error = service
            .ensure_valid_token_for_platform("u1", Platform::LinkedIn)
            .await
            .unwrap_err();
        assert!(matches!(error, CredentialError::NotFound { .. }));

        let listed = service.list_accounts("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_active);
    }
}
