//! # Social Accounts Service Entry Point
//!
//! `serve` (default) runs the HTTP API, `migrate` applies database migrations,
//! and `reencrypt` rewrites credential rows still holding plaintext secrets.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use social_accounts::{
    config::ConfigLoader,
    crypto::CryptoKey,
    db,
    repositories::CredentialRepository,
    server::run_server,
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "social-accounts", version, about = "Linked social account credential service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply migrations and serve the HTTP API
    Serve {
        /// Skip applying pending migrations at startup
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Apply pending database migrations and exit
    Migrate,
    /// Encrypt credential secrets that predate at-rest encryption
    Reencrypt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing telemetry")?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Commands::Serve {
        skip_migrations: false,
    }) {
        Commands::Serve { skip_migrations } => {
            if !skip_migrations {
                db::run_migrations(&db).await?;
            }
            run_server(Arc::new(config), db, CancellationToken::new()).await
        }
        Commands::Migrate => db::run_migrations(&db).await,
        Commands::Reencrypt => {
            let key_bytes = config
                .crypto_key
                .clone()
                .context("crypto key not present in configuration")?;
            let crypto_key = CryptoKey::new(key_bytes).context("initializing crypto key")?;

            let repository = CredentialRepository::new(Arc::new(db), crypto_key);
            let updated = repository.reencrypt_legacy_rows().await?;
            println!(
                "Re-encrypted {} credential(s) containing legacy plaintext secrets.",
                updated
            );
            Ok(())
        }
    }
}
