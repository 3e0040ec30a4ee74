//! User directory.
//!
//! The identity layer only reads users: it needs the identity snapshot for
//! ID tokens and the active flag. Account creation belongs to whoever owns
//! the users table.

use crate::errors::IdentityError;
use crate::models::User;
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, IdentityError>;
}

/// Postgres-backed directory (table `users`).
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, IdentityError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, email, role, is_active, created_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to fetch user by id: {}", e)))?;

        Ok(user)
    }
}

/// In-process directory.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub fn upsert(&self, user: User) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user.user_id.clone(), user);
        }
    }

    pub fn remove(&self, user_id: &str) -> Option<User> {
        self.users.write().ok()?.remove(user_id)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>, IdentityError> {
        let users = self
            .users
            .read()
            .map_err(|_| IdentityError::Database("user lock poisoned".to_string()))?;
        Ok(users.get(user_id).cloned())
    }
}
