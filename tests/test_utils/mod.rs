//! Test utilities for database testing.
//!
//! In-memory SQLite with every migration applied, plus repository and
//! platform-transport builders shared by the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use social_accounts::clock::{Clock, ManualClock};
use social_accounts::crypto::CryptoKey;
use social_accounts::repositories::CredentialRepository;

/// Sets up an in-memory SQLite database with all migrations applied.
///
/// The pool is pinned to one connection: every SQLite `:memory:` connection
/// is its own database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("valid test key")
}

/// Fixed instant most suites start from
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0()))
}

/// Encrypted SeaORM repository over a fresh database
pub async fn repository(clock: Arc<dyn Clock>) -> (Arc<CredentialRepository>, Arc<DatabaseConnection>) {
    let db = Arc::new(setup_test_db().await.expect("test database"));
    let repository = Arc::new(CredentialRepository::with_clock(
        Arc::clone(&db),
        test_crypto_key(),
        clock,
    ));
    (repository, db)
}
