//! Refresh token repository.
//!
//! Persists refresh token ids with their expiry, keyed by user. Rotation
//! (delete previous + insert next) is atomic in every implementation, which
//! makes a refresh token single-use even under concurrent renewals.

use crate::errors::IdentityError;
use crate::models::RefreshTokenRecord;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Persist `token_id` for `user_id`, expiring after `ttl`.
    async fn set_refresh_token(
        &self,
        user_id: &str,
        token_id: Uuid,
        ttl: Duration,
    ) -> Result<(), IdentityError>;

    /// Delete one token. `Ok(false)` when it did not exist.
    async fn delete_refresh_token(&self, user_id: &str, token_id: Uuid)
        -> Result<bool, IdentityError>;

    /// Delete every token of `user_id`, returning how many were removed.
    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, IdentityError>;

    /// Atomically replace `previous` with `next`.
    ///
    /// Returns `Ok(false)` without inserting when `previous` is absent, so of
    /// two concurrent rotations of the same token at most one succeeds.
    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        previous: Uuid,
        next: Uuid,
        ttl: Duration,
    ) -> Result<bool, IdentityError>;

    /// Whether `token_id` is currently stored for `user_id` and unexpired.
    async fn is_active(&self, user_id: &str, token_id: Uuid) -> Result<bool, IdentityError>;

    /// Remove expired token ids, returning how many were deleted.
    async fn purge_expired(&self) -> Result<u64, IdentityError>;
}

/// Postgres-backed repository (table `refresh_tokens`).
#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn set_refresh_token(
        &self,
        user_id: &str,
        token_id: Uuid,
        ttl: Duration,
    ) -> Result<(), IdentityError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .bind(Utc::now() + ttl)
        .execute(&self.pool)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to store refresh token: {}", e)))?;

        Ok(())
    }

    async fn delete_refresh_token(
        &self,
        user_id: &str,
        token_id: Uuid,
    ) -> Result<bool, IdentityError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE user_id = $1 AND token_id = $2
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .execute(&self.pool)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to delete refresh token: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, IdentityError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IdentityError::Database(format!("Failed to delete refresh tokens for user: {}", e))
        })?;

        Ok(result.rows_affected())
    }

    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        previous: Uuid,
        next: Uuid,
        ttl: Duration,
    ) -> Result<bool, IdentityError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| IdentityError::Database(format!("Failed to begin transaction: {}", e)))?;

        // A concurrent rotation of the same row blocks here and then sees 0 rows
        let deleted = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE user_id = $1 AND token_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(previous)
        .execute(&mut *tx)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to delete refresh token: {}", e)))?
        .rows_affected();

        if deleted == 0 {
            tx.rollback().await.map_err(|e| {
                IdentityError::Database(format!("Failed to roll back transaction: {}", e))
            })?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_id, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(next)
        .bind(Utc::now() + ttl)
        .execute(&mut *tx)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to store refresh token: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| IdentityError::Database(format!("Failed to commit transaction: {}", e)))?;

        Ok(true)
    }

    async fn is_active(&self, user_id: &str, token_id: Uuid) -> Result<bool, IdentityError> {
        let row: Option<RefreshTokenRecord> = sqlx::query_as(
            r#"
            SELECT user_id, token_id, expires_at
            FROM refresh_tokens
            WHERE user_id = $1 AND token_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(user_id)
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to fetch refresh token: {}", e)))?;

        Ok(row.is_some())
    }

    async fn purge_expired(&self) -> Result<u64, IdentityError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IdentityError::Database(format!("Failed to purge refresh tokens: {}", e)))?;

        Ok(result.rows_affected())
    }
}

/// In-process repository. One mutex guards the whole map, so rotation is
/// atomic with respect to every other operation.
#[derive(Default)]
pub struct InMemoryTokenRepository {
    tokens: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
    failing: AtomicBool,
}

impl InMemoryTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a database error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored tokens for `user_id`, expired ones included.
    pub fn count_for_user(&self, user_id: &str) -> usize {
        self.tokens
            .lock()
            .map(|tokens| tokens.values().filter(|r| r.user_id == user_id).count())
            .unwrap_or(0)
    }

    fn with_tokens<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Uuid, RefreshTokenRecord>) -> T,
    ) -> Result<T, IdentityError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IdentityError::Database(
                "refresh token store unavailable".to_string(),
            ));
        }
        let mut tokens = self
            .tokens
            .lock()
            .map_err(|_| IdentityError::Database("refresh token lock poisoned".to_string()))?;
        Ok(f(&mut tokens))
    }
}

#[async_trait]
impl TokenRepository for InMemoryTokenRepository {
    async fn set_refresh_token(
        &self,
        user_id: &str,
        token_id: Uuid,
        ttl: Duration,
    ) -> Result<(), IdentityError> {
        self.with_tokens(|tokens| {
            tokens.insert(
                token_id,
                RefreshTokenRecord {
                    user_id: user_id.to_string(),
                    token_id,
                    expires_at: Utc::now() + ttl,
                },
            );
        })
    }

    async fn delete_refresh_token(
        &self,
        user_id: &str,
        token_id: Uuid,
    ) -> Result<bool, IdentityError> {
        self.with_tokens(|tokens| remove_owned(tokens, user_id, token_id).is_some())
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, IdentityError> {
        self.with_tokens(|tokens| {
            let before = tokens.len();
            tokens.retain(|_, record| record.user_id != user_id);
            (before - tokens.len()) as u64
        })
    }

    async fn rotate_refresh_token(
        &self,
        user_id: &str,
        previous: Uuid,
        next: Uuid,
        ttl: Duration,
    ) -> Result<bool, IdentityError> {
        self.with_tokens(|tokens| {
            let now = Utc::now();
            match remove_owned(tokens, user_id, previous) {
                Some(record) if record.expires_at > now => {
                    tokens.insert(
                        next,
                        RefreshTokenRecord {
                            user_id: user_id.to_string(),
                            token_id: next,
                            expires_at: now + ttl,
                        },
                    );
                    true
                }
                _ => false,
            }
        })
    }

    async fn is_active(&self, user_id: &str, token_id: Uuid) -> Result<bool, IdentityError> {
        self.with_tokens(|tokens| {
            tokens
                .get(&token_id)
                .is_some_and(|r| r.user_id == user_id && r.expires_at > Utc::now())
        })
    }

    async fn purge_expired(&self) -> Result<u64, IdentityError> {
        self.with_tokens(|tokens| {
            let now = Utc::now();
            let before = tokens.len();
            tokens.retain(|_, record| record.expires_at > now);
            (before - tokens.len()) as u64
        })
    }
}

fn remove_owned(
    tokens: &mut HashMap<Uuid, RefreshTokenRecord>,
    user_id: &str,
    token_id: Uuid,
) -> Option<RefreshTokenRecord> {
    if tokens.get(&token_id)?.user_id != user_id {
        return None;
    }
    tokens.remove(&token_id)
}
