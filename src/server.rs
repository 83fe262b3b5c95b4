//! # Server Configuration
//!
//! Router assembly, shared state wiring and the HTTP server loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::clock::{OsRngNonceSource, SystemClock};
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers::{self, accounts};
use crate::platforms::TransportRegistry;
use crate::repositories::CredentialRepository;
use crate::service::CredentialService;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub service: Arc<CredentialService>,
}

impl AppState {
    /// Production wiring: encrypted SeaORM store, configured platform
    /// transports, wall clock and OS randomness
    pub fn from_config(config: Arc<AppConfig>, db: DatabaseConnection) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("crypto key is not configured")?;
        let crypto_key = CryptoKey::new(key_bytes).context("invalid crypto key")?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("social-accounts/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        let transports = TransportRegistry::from_config(&config, http_client);
        tracing::info!(platforms = ?transports.platforms(), "Registered refresh transports");

        let store = Arc::new(CredentialRepository::new(Arc::new(db.clone()), crypto_key));
        let service = CredentialService::new(
            store,
            transports,
            Arc::new(SystemClock),
            Arc::new(OsRngNonceSource),
            &config.token_refresh,
        );

        Ok(Self {
            config,
            db,
            service: Arc::new(service),
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/users/{user_id}/accounts", get(accounts::list_accounts))
        .route(
            "/users/{user_id}/accounts/{platform}/active",
            get(accounts::get_active_account),
        )
        .route(
            "/users/{user_id}/accounts/{platform}/active/token",
            post(accounts::ensure_active_token),
        )
        .route(
            "/users/{user_id}/accounts/{platform}/{account_id}",
            put(accounts::upsert_credential).delete(accounts::delete_account),
        )
        .route(
            "/users/{user_id}/accounts/{platform}/{account_id}/oauth1",
            put(accounts::upsert_oauth1_credentials),
        )
        .route(
            "/users/{user_id}/accounts/{platform}/{account_id}/token",
            post(accounts::ensure_valid_token),
        )
        .route(
            "/users/{user_id}/accounts/{platform}/{account_id}/authorize",
            post(accounts::authorize_request),
        )
        .route(
            "/users/{user_id}/accounts/{platform}/{account_id}/disconnect",
            post(accounts::disconnect_account),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serves until `shutdown` is cancelled or the process receives Ctrl-C
pub async fn run_server(
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = config.bind_addr().context("Invalid server address")?;
    let state = AppState::from_config(Arc::clone(&config), db)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            signal.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("Operator token")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::accounts::upsert_credential,
        crate::handlers::accounts::upsert_oauth1_credentials,
        crate::handlers::accounts::list_accounts,
        crate::handlers::accounts::get_active_account,
        crate::handlers::accounts::ensure_valid_token,
        crate::handlers::accounts::ensure_active_token,
        crate::handlers::accounts::authorize_request,
        crate::handlers::accounts::disconnect_account,
        crate::handlers::accounts::delete_account,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::Platform,
            crate::handlers::HealthStatus,
            crate::handlers::accounts::UpsertCredentialRequest,
            crate::handlers::accounts::Oauth1CredentialsRequest,
            crate::handlers::accounts::AuthorizeRequest,
            crate::handlers::accounts::RequestParam,
            crate::handlers::accounts::AccountSummary,
            crate::handlers::accounts::AccountListResponse,
            crate::token_refresh::ValidToken,
            crate::signer::Authorization,
            crate::signer::AuthScheme,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service metadata and health"),
        (name = "accounts", description = "Linked social account credentials"),
        (name = "tokens", description = "Valid tokens and request authorization")
    ),
    info(
        title = "Social Accounts API",
        description = "Credential lifecycle for linked social media accounts",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_account_routes_and_security() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();

        assert!(paths.contains(&"/users/{user_id}/accounts/{platform}/{account_id}".to_string()));
        assert!(
            paths.contains(&"/users/{user_id}/accounts/{platform}/{account_id}/authorize".to_string())
        );
        assert!(
            doc.components
                .unwrap()
                .security_schemes
                .contains_key("bearer_auth")
        );
    }

    #[test]
    fn from_config_requires_crypto_key() {
        let config = Arc::new(AppConfig::default());
        let result = AppState::from_config(config, DatabaseConnection::default());
        assert!(result.is_err());
    }
}
