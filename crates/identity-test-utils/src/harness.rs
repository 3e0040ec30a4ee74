//! In-process harness wiring the whole identity layer
//!
//! Every collaborator is an in-memory implementation and the key material
//! lives in a temporary directory that is removed when the harness drops.

use crate::crypto_fixtures::test_signing_key;
use crate::test_ids::{TEST_USER_ALICE, TEST_USER_BOB};
use crate::token_builders::{TestClientBuilder, TestUserBuilder};
use identity_service::models::User;
use identity_service::repositories::{
    InMemoryAuthorizationCodeRepository, InMemoryOAuthClientRepository, InMemoryTokenRepository,
    InMemoryUserDirectory, OAuthClientRepository,
};
use identity_service::secrets::{InMemorySecretStore, SecretResolver};
use identity_service::services::{
    CredentialManager, OAuthService, TokenService, TokenServiceConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Fully wired identity layer for tests
///
/// Seeded with users [`TEST_USER_ALICE`] and [`TEST_USER_BOB`], the `c1`
/// client, and key material imported from [`test_signing_key`].
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_flow() -> anyhow::Result<()> {
///     let identity = TestIdentity::new().await?;
///     let pair = identity.tokens.new_pair_from_user(&identity.alice(), None).await?;
///     identity.tokens.validate_id_token(&pair.id_token).await?;
///     Ok(())
/// }
/// ```
pub struct TestIdentity {
    pub secret_store: Arc<InMemorySecretStore>,
    pub secrets: Arc<SecretResolver>,
    pub credentials: Arc<CredentialManager>,
    pub refresh_tokens: Arc<InMemoryTokenRepository>,
    pub codes: Arc<InMemoryAuthorizationCodeRepository>,
    pub clients: Arc<InMemoryOAuthClientRepository>,
    pub users: Arc<InMemoryUserDirectory>,
    pub tokens: Arc<TokenService>,
    pub oauth: Arc<OAuthService>,
    dir: TempDir,
}

impl TestIdentity {
    /// Build with default token lifetimes.
    pub async fn new() -> Result<Self, anyhow::Error> {
        Self::with_config(TokenServiceConfig::default()).await
    }

    pub async fn with_config(config: TokenServiceConfig) -> Result<Self, anyhow::Error> {
        let dir = TempDir::new()?;

        let secret_store = Arc::new(InMemorySecretStore::new());
        let secrets = Arc::new(SecretResolver::new(secret_store.clone()));

        let credentials = Arc::new(CredentialManager::new(
            dir.path().join("certs").join("identity-cert.pem"),
            dir.path().join("certs").join("identity-key.pem"),
            Arc::clone(&secrets),
        ));
        credentials
            .import_private_key(test_signing_key())
            .map_err(|e| anyhow::anyhow!("Failed to import test key: {}", e))?;

        let users = Arc::new(InMemoryUserDirectory::new());
        users.upsert(TestUserBuilder::new(TEST_USER_ALICE).with_username("alice").build());
        users.upsert(TestUserBuilder::new(TEST_USER_BOB).with_username("bob").build());

        let clients = Arc::new(InMemoryOAuthClientRepository::new());
        clients
            .create_client(TestClientBuilder::new().build())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to register test client: {}", e))?;

        let refresh_tokens = Arc::new(InMemoryTokenRepository::new());
        let codes = Arc::new(InMemoryAuthorizationCodeRepository::new());

        let tokens = Arc::new(TokenService::new(
            Arc::clone(&credentials),
            refresh_tokens.clone(),
            users.clone(),
            Arc::clone(&secrets),
            config,
        ));

        let oauth = Arc::new(OAuthService::new(
            clients.clone(),
            codes.clone(),
            users.clone(),
            tokens.clone(),
        ));

        Ok(Self {
            secret_store,
            secrets,
            credentials,
            refresh_tokens,
            codes,
            clients,
            users,
            tokens,
            oauth,
            dir,
        })
    }

    pub fn alice(&self) -> User {
        TestUserBuilder::new(TEST_USER_ALICE).with_username("alice").build()
    }

    pub fn bob(&self) -> User {
        TestUserBuilder::new(TEST_USER_BOB).with_username("bob").build()
    }

    /// Directory holding the key material.
    pub fn key_dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}
