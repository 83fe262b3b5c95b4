//! In-memory [`AccountStore`]
//!
//! Used as the substitution point for tests and local tooling. Records live in
//! a map keyed by `(user_id, platform, account_id)`; nothing is encrypted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AccountStore, Credential, CredentialFields};
use crate::clock::{Clock, SystemClock};
use crate::error::CredentialError;
use crate::models::Platform;

type Key = (String, Platform, String);

#[derive(Default)]
struct Inner {
    records: HashMap<Key, Credential>,
    /// Insertion counter; breaks `created_at` ties in `find_active`
    sequence: HashMap<Key, u64>,
    next_sequence: u64,
}

#[derive(Clone)]
pub struct InMemoryAccountStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            clock,
        }
    }

    /// Number of stored records, active or not
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn key(user_id: &str, platform: Platform, account_id: &str) -> Key {
    (user_id.to_string(), platform, account_id.to_string())
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<Credential, CredentialError> {
        self.inner
            .read()
            .await
            .records
            .get(&key(user_id, platform, account_id))
            .cloned()
            .ok_or_else(|| CredentialError::not_found(user_id, platform, account_id))
    }

    async fn find_active(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Credential, CredentialError> {
        let inner = self.inner.read().await;

        inner
            .records
            .iter()
            .filter(|((user, p, _), credential)| {
                user == user_id && *p == platform && credential.is_active
            })
            .max_by_key(|(k, credential)| {
                (
                    credential.created_at,
                    inner.sequence.get(*k).copied().unwrap_or_default(),
                )
            })
            .map(|(_, credential)| credential.clone())
            .ok_or_else(|| CredentialError::no_active_account(user_id, platform))
    }

    async fn upsert(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError> {
        let now = self.clock.now();
        let k = key(user_id, platform, account_id);
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.records.get_mut(&k) {
            existing.merge(fields, now);
            return Ok(existing.clone());
        }

        let credential = Credential::from_fields(user_id, platform, account_id, fields, now);
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.sequence.insert(k.clone(), sequence);
        inner.records.insert(k, credential.clone());
        Ok(credential)
    }

    async fn update_tokens(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
        fields: CredentialFields,
    ) -> Result<Credential, CredentialError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        let credential = inner
            .records
            .get_mut(&key(user_id, platform, account_id))
            .ok_or_else(|| CredentialError::not_found(user_id, platform, account_id))?;

        credential.merge(fields, now);
        Ok(credential.clone())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Credential>, CredentialError> {
        let inner = self.inner.read().await;

        let mut owned: Vec<(&Key, &Credential)> = inner
            .records
            .iter()
            .filter(|((user, _, _), _)| user == user_id)
            .collect();
        owned.sort_by_key(|(k, credential)| {
            (
                credential.created_at,
                inner.sequence.get(*k).copied().unwrap_or_default(),
            )
        });

        Ok(owned
            .into_iter()
            .map(|(_, credential)| credential.clone())
            .collect())
    }

    async fn mark_inactive(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;

        let credential = inner
            .records
            .get_mut(&key(user_id, platform, account_id))
            .ok_or_else(|| CredentialError::not_found(user_id, platform, account_id))?;

        credential.is_active = false;
        credential.is_connected = false;
        credential.updated_at = now;
        Ok(())
    }

    async fn delete(
        &self,
        user_id: &str,
        platform: Platform,
        account_id: &str,
    ) -> Result<(), CredentialError> {
        let k = key(user_id, platform, account_id);
        let mut inner = self.inner.write().await;

        inner.sequence.remove(&k);
        inner
            .records
            .remove(&k)
            .map(|_| ())
            .ok_or_else(|| CredentialError::not_found(user_id, platform, account_id))
    }
}
