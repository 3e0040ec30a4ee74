//! OAuth client repository.

use crate::errors::IdentityError;
use crate::models::OAuthClient;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait OAuthClientRepository: Send + Sync {
    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, IdentityError>;

    async fn create_client(&self, client: OAuthClient) -> Result<OAuthClient, IdentityError>;

    /// Resolve `client_id` and check that it is active and that `redirect_uri`
    /// is registered for it.
    async fn validate_redirect_uri(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<OAuthClient, IdentityError> {
        let client = self
            .get_client(client_id)
            .await?
            .ok_or_else(|| IdentityError::InvalidClient("client not found".to_string()))?;

        if !client.is_active {
            return Err(IdentityError::InvalidClient("client is inactive".to_string()));
        }

        if !client.has_redirect_uri(redirect_uri) {
            return Err(IdentityError::InvalidClient(
                "redirect_uri is not registered for this client".to_string(),
            ));
        }

        Ok(client)
    }
}

/// Postgres-backed repository (table `oauth_clients`).
#[derive(Clone)]
pub struct PgOAuthClientRepository {
    pool: PgPool,
}

impl PgOAuthClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OAuthClientRepository for PgOAuthClientRepository {
    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, IdentityError> {
        let client = sqlx::query_as::<_, OAuthClient>(
            r#"
            SELECT client_id, client_name, redirect_uris, scopes, is_active, created_at
            FROM oauth_clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to fetch OAuth client: {}", e)))?;

        Ok(client)
    }

    async fn create_client(&self, client: OAuthClient) -> Result<OAuthClient, IdentityError> {
        let created = sqlx::query_as::<_, OAuthClient>(
            r#"
            INSERT INTO oauth_clients (client_id, client_name, redirect_uris, scopes, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING client_id, client_name, redirect_uris, scopes, is_active, created_at
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(&client.redirect_uris)
        .bind(&client.scopes)
        .bind(client.is_active)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("oauth_clients_pkey") {
                IdentityError::Database("OAuth client already exists".to_string())
            } else {
                IdentityError::Database(format!("Failed to create OAuth client: {}", e))
            }
        })?;

        Ok(created)
    }
}

/// In-process repository.
#[derive(Default)]
pub struct InMemoryOAuthClientRepository {
    clients: RwLock<HashMap<String, OAuthClient>>,
}

impl InMemoryOAuthClientRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a client's active flag. Returns false for unknown clients.
    pub fn set_active(&self, client_id: &str, is_active: bool) -> bool {
        self.clients
            .write()
            .ok()
            .and_then(|mut clients| {
                clients
                    .get_mut(client_id)
                    .map(|client| client.is_active = is_active)
            })
            .is_some()
    }
}

#[async_trait]
impl OAuthClientRepository for InMemoryOAuthClientRepository {
    async fn get_client(&self, client_id: &str) -> Result<Option<OAuthClient>, IdentityError> {
        let clients = self
            .clients
            .read()
            .map_err(|_| IdentityError::Database("client lock poisoned".to_string()))?;
        Ok(clients.get(client_id).cloned())
    }

    async fn create_client(&self, mut client: OAuthClient) -> Result<OAuthClient, IdentityError> {
        let mut clients = self
            .clients
            .write()
            .map_err(|_| IdentityError::Database("client lock poisoned".to_string()))?;

        if clients.contains_key(&client.client_id) {
            return Err(IdentityError::Database(
                "OAuth client already exists".to_string(),
            ));
        }

        client.created_at = Utc::now();
        clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }
}
