//! Authorization code repository.
//!
//! Codes are single-use: `validate_and_consume` removes the code in the same
//! step that reads it, so two concurrent exchanges of one code can never both
//! observe it.

use crate::crypto;
use crate::errors::IdentityError;
use crate::models::{AuthorizationCode, NewAuthorizationCode};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait AuthorizationCodeRepository: Send + Sync {
    /// Mint and persist a new random code valid for `ttl_minutes`.
    async fn generate_code(
        &self,
        params: NewAuthorizationCode<'_>,
        ttl_minutes: i64,
    ) -> Result<AuthorizationCode, IdentityError>;

    /// Atomically fetch and delete an unexpired code.
    ///
    /// `Ok(None)` for unknown, expired or already consumed codes.
    async fn validate_and_consume(&self, code: &str)
        -> Result<Option<AuthorizationCode>, IdentityError>;

    /// Remove expired codes, returning how many were deleted.
    async fn purge_expired(&self) -> Result<u64, IdentityError>;
}

/// Postgres-backed repository (table `authorization_codes`).
#[derive(Clone)]
pub struct PgAuthorizationCodeRepository {
    pool: PgPool,
}

impl PgAuthorizationCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorizationCodeRepository for PgAuthorizationCodeRepository {
    async fn generate_code(
        &self,
        params: NewAuthorizationCode<'_>,
        ttl_minutes: i64,
    ) -> Result<AuthorizationCode, IdentityError> {
        let code = crypto::generate_authorization_code()?;

        let record = sqlx::query_as::<_, AuthorizationCode>(
            r#"
            INSERT INTO authorization_codes (
                code, user_id, client_id, redirect_uri,
                code_challenge, code_challenge_method, scope, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING
                code, user_id, client_id, redirect_uri, code_challenge,
                code_challenge_method, scope, expires_at, created_at
            "#,
        )
        .bind(&code)
        .bind(params.user_id)
        .bind(params.client_id)
        .bind(params.redirect_uri)
        .bind(params.code_challenge)
        .bind(params.code_challenge_method)
        .bind(params.scope)
        .bind(Utc::now() + Duration::minutes(ttl_minutes))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            IdentityError::Database(format!("Failed to store authorization code: {}", e))
        })?;

        Ok(record)
    }

    async fn validate_and_consume(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, IdentityError> {
        let record = sqlx::query_as::<_, AuthorizationCode>(
            r#"
            DELETE FROM authorization_codes
            WHERE code = $1 AND expires_at > NOW()
            RETURNING
                code, user_id, client_id, redirect_uri, code_challenge,
                code_challenge_method, scope, expires_at, created_at
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            IdentityError::Database(format!("Failed to consume authorization code: {}", e))
        })?;

        Ok(record)
    }

    async fn purge_expired(&self) -> Result<u64, IdentityError> {
        let result = sqlx::query(
            r#"
            DELETE FROM authorization_codes
            WHERE expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            IdentityError::Database(format!("Failed to purge authorization codes: {}", e))
        })?;

        Ok(result.rows_affected())
    }
}

/// In-process repository.
#[derive(Default)]
pub struct InMemoryAuthorizationCodeRepository {
    codes: Mutex<HashMap<String, AuthorizationCode>>,
}

impl InMemoryAuthorizationCodeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a code as-is, e.g. with an expiry already in the past.
    pub fn insert(&self, record: AuthorizationCode) -> Result<(), IdentityError> {
        self.lock()?.insert(record.code.clone(), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.codes.lock().map(|codes| codes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, AuthorizationCode>>, IdentityError> {
        self.codes
            .lock()
            .map_err(|_| IdentityError::Database("authorization code lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuthorizationCodeRepository for InMemoryAuthorizationCodeRepository {
    async fn generate_code(
        &self,
        params: NewAuthorizationCode<'_>,
        ttl_minutes: i64,
    ) -> Result<AuthorizationCode, IdentityError> {
        let now = Utc::now();
        let record = AuthorizationCode {
            code: crypto::generate_authorization_code()?,
            user_id: params.user_id.to_string(),
            client_id: params.client_id.to_string(),
            redirect_uri: params.redirect_uri.to_string(),
            code_challenge: params.code_challenge.to_string(),
            code_challenge_method: params.code_challenge_method.to_string(),
            scope: params.scope.to_string(),
            expires_at: now + Duration::minutes(ttl_minutes),
            created_at: now,
        };

        self.lock()?.insert(record.code.clone(), record.clone());
        Ok(record)
    }

    async fn validate_and_consume(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, IdentityError> {
        let mut codes = self.lock()?;
        Ok(codes
            .remove(code)
            .filter(|record| record.expires_at > Utc::now()))
    }

    async fn purge_expired(&self) -> Result<u64, IdentityError> {
        let mut codes = self.lock()?;
        let now = Utc::now();
        let before = codes.len();
        codes.retain(|_, record| record.expires_at > now);
        Ok((before - codes.len()) as u64)
    }
}
