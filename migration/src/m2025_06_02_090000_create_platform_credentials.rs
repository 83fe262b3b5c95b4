//! Migration to create the platform_credentials table.
//!
//! One row per linked social account, keyed by `(user_id, platform, account_id)`.
//! Secret columns hold AES-256-GCM ciphertext written by the application.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PlatformCredentials::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PlatformCredentials::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PlatformCredentials::UserId).text().not_null())
                    .col(
                        ColumnDef::new(PlatformCredentials::Platform)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::AccountId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::DisplayName)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::ConsumerKey)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::ConsumerSecretCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::Oauth1TokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::Oauth1TokenSecretCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::Scopes)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::IsConnected)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PlatformCredentials::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_platform_credentials_user_platform_account")
                    .table(PlatformCredentials::Table)
                    .col(PlatformCredentials::UserId)
                    .col(PlatformCredentials::Platform)
                    .col(PlatformCredentials::AccountId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Serves the "first active account of a platform" lookup
        manager
            .create_index(
                Index::create()
                    .name("idx_platform_credentials_user_platform_active")
                    .table(PlatformCredentials::Table)
                    .col(PlatformCredentials::UserId)
                    .col(PlatformCredentials::Platform)
                    .col(PlatformCredentials::IsActive)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_platform_credentials_user_platform_active")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_platform_credentials_user_platform_account")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(PlatformCredentials::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PlatformCredentials {
    Table,
    Id,
    UserId,
    Platform,
    AccountId,
    DisplayName,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    ConsumerKey,
    ConsumerSecretCiphertext,
    #[sea_orm(iden = "oauth1_token_ciphertext")]
    Oauth1TokenCiphertext,
    #[sea_orm(iden = "oauth1_token_secret_ciphertext")]
    Oauth1TokenSecretCiphertext,
    Scopes,
    IsActive,
    IsConnected,
    CreatedAt,
    UpdatedAt,
}
