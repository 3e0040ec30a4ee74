//! Identity Service
//!
//! Bootstraps signing key material and the persistence layer, then keeps
//! expired authorization codes and refresh token ids purged until shutdown.

use identity_service::config::Config;
use identity_service::repositories::{
    PgAuthorizationCodeRepository, PgOAuthClientRepository, PgTokenRepository, PgUserDirectory,
    TokenRepository,
};
use identity_service::secrets::{KeyringSecretStore, SecretResolver};
use identity_service::services::{
    CredentialManager, OAuthService, TokenService, TokenServiceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "identity_service=info,identity=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Identity Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        cert_path = %config.cert_path.display(),
        key_path = %config.key_path.display(),
        keyring_service = %config.keyring_service,
        "Configuration loaded successfully"
    );

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;

    info!("Database connection established");

    let secrets = Arc::new(SecretResolver::new(Arc::new(KeyringSecretStore::new(
        config.keyring_service.clone(),
    ))));

    let credentials = Arc::new(CredentialManager::new(
        config.cert_path.clone(),
        config.key_path.clone(),
        Arc::clone(&secrets),
    ));

    let generated = credentials.ensure_key_material().map_err(|e| {
        error!("Failed to initialize key material: {}", e);
        e
    })?;
    credentials.verify_certificate()?;

    let (not_before, not_after) = credentials.certificate_validity()?;
    info!(
        generated,
        key_id = %credentials.key_id()?,
        %not_before,
        %not_after,
        "Signing key material ready"
    );
    if credentials.is_certificate_expired()? {
        warn!("Signing certificate has expired; regenerate key material");
    }

    let users = Arc::new(PgUserDirectory::new(db_pool.clone()));

    let refresh_tokens = Arc::new(PgTokenRepository::new(db_pool.clone()));

    let tokens = Arc::new(TokenService::new(
        credentials,
        refresh_tokens.clone(),
        users.clone(),
        secrets,
        TokenServiceConfig {
            id_token_ttl_seconds: config.id_token_ttl_seconds,
            refresh_token_ttl_seconds: config.refresh_token_ttl_seconds,
            refresh_secret: None,
        },
    ));

    let oauth = OAuthService::new(
        Arc::new(PgOAuthClientRepository::new(db_pool.clone())),
        Arc::new(PgAuthorizationCodeRepository::new(db_pool.clone())),
        users,
        tokens,
    )
    .with_code_ttl_minutes(config.auth_code_ttl_minutes);

    info!("Identity Service ready");

    let mut purge = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = purge.tick() => {
                if let Err(e) = oauth.purge_expired_codes().await {
                    warn!("Failed to purge expired authorization codes: {}", e);
                }
                match refresh_tokens.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Purged expired refresh tokens"),
                    Err(e) => warn!("Failed to purge expired refresh tokens: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    db_pool.close().await;
    info!("Identity Service stopped");

    Ok(())
}
