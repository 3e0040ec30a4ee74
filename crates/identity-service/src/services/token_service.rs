//! ID token / refresh token issuance.
//!
//! Session lifecycle per user:
//!
//! ```text
//! NoSession -> Authenticated -> Refreshed* -> SignedOut
//! ```
//!
//! - ID tokens are RS256 JWTs signed with the credential manager's key and
//!   carry the user's identity snapshot.
//! - Refresh tokens are HS256 JWTs under the `jwt_secret` HMAC secret. Their
//!   `jti` is persisted in the token repository; a refresh token is only
//!   usable while its `jti` is stored.
//! - Renewal rotates the presented `jti` out atomically with persisting the
//!   successor, so one refresh token yields at most one new pair.

use crate::config::{DEFAULT_ID_TOKEN_TTL_SECONDS, DEFAULT_REFRESH_TOKEN_TTL_SECONDS};
use crate::crypto::{self, IdTokenClaims, RefreshTokenClaims, UserClaims};
use crate::errors::{IdentityError, INVALID_TOKEN_MESSAGE};
use crate::models::{RefreshTokenRef, TokenPair, User};
use crate::observability::{hash_for_correlation, ErrorCategory};
use crate::observability::metrics::{
    record_refresh_rotation, record_sign_out, record_token_issuance,
};
use crate::repositories::{TokenRepository, UserDirectory};
use crate::secrets::{SecretResolver, JWT_SECRET_NAME};
use crate::services::credential_manager::CredentialManager;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::secret::{ExposeSecret, SecretBox};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::instrument;
use uuid::Uuid;

/// Token issuance and validation capability consumed by the OAuth service.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Mint a pair for `user`. When `prev_refresh_token_id` is given it is
    /// rotated out first; if it is no longer stored nothing is issued.
    async fn new_pair_from_user(
        &self,
        user: &User,
        prev_refresh_token_id: Option<&str>,
    ) -> Result<TokenPair, IdentityError>;

    /// Revoke every refresh token of `user_id`.
    async fn sign_out(&self, user_id: &str) -> Result<(), IdentityError>;

    async fn validate_id_token(&self, token: &str) -> Result<UserClaims, IdentityError>;

    async fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenRef, IdentityError>;

    async fn renew_token(&self, refresh_token: &str) -> Result<TokenPair, IdentityError>;
}

/// Lifetimes and optional preset HMAC secret.
#[derive(Debug, Default)]
pub struct TokenServiceConfig {
    /// Non-positive values use 3600 s.
    pub id_token_ttl_seconds: i64,
    /// Non-positive values use 604800 s.
    pub refresh_token_ttl_seconds: i64,
    /// Raw HMAC key. When absent the `jwt_secret` secret is fetched or
    /// generated on first use.
    pub refresh_secret: Option<SecretBox<Vec<u8>>>,
}

pub struct TokenService {
    credentials: Arc<CredentialManager>,
    refresh_tokens: Arc<dyn TokenRepository>,
    users: Arc<dyn UserDirectory>,
    secrets: Arc<SecretResolver>,
    refresh_secret: OnceCell<SecretBox<Vec<u8>>>,
    id_token_ttl: i64,
    refresh_token_ttl: i64,
}

impl TokenService {
    pub fn new(
        credentials: Arc<CredentialManager>,
        refresh_tokens: Arc<dyn TokenRepository>,
        users: Arc<dyn UserDirectory>,
        secrets: Arc<SecretResolver>,
        config: TokenServiceConfig,
    ) -> Self {
        Self {
            credentials,
            refresh_tokens,
            users,
            secrets,
            refresh_secret: OnceCell::new_with(config.refresh_secret),
            id_token_ttl: positive_or(config.id_token_ttl_seconds, DEFAULT_ID_TOKEN_TTL_SECONDS),
            refresh_token_ttl: positive_or(
                config.refresh_token_ttl_seconds,
                DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            ),
        }
    }

    pub fn id_token_ttl_seconds(&self) -> i64 {
        self.id_token_ttl
    }

    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl
    }

    /// HMAC key for refresh tokens, resolved once per instance.
    async fn refresh_secret(&self) -> Result<&SecretBox<Vec<u8>>, IdentityError> {
        self.refresh_secret
            .get_or_try_init(|| async {
                let secrets = Arc::clone(&self.secrets);
                tokio::task::spawn_blocking(move || secrets.get_or_generate_bytes(JWT_SECRET_NAME))
                    .await
                    .map_err(|e| {
                        tracing::error!(target: "identity.token", error = %e, "Secret resolution task failed");
                        IdentityError::Internal
                    })?
            })
            .await
    }

    /// Public half read from the certificate on disk.
    async fn verifying_key(&self) -> Result<RsaPublicKey, IdentityError> {
        let credentials = Arc::clone(&self.credentials);
        tokio::task::spawn_blocking(move || credentials.public_key())
            .await
            .map_err(|e| {
                tracing::error!(target: "identity.token", error = %e, "Key loading task failed");
                IdentityError::Internal
            })?
    }

    /// Decrypted signing key and its `kid`. Dropped after each signing call.
    async fn signing_key(&self) -> Result<(RsaPrivateKey, String), IdentityError> {
        let credentials = Arc::clone(&self.credentials);
        tokio::task::spawn_blocking(move || {
            let key = credentials.private_key()?;
            let kid = credentials.key_id()?;
            Ok((key, kid))
        })
        .await
        .map_err(|e| {
            tracing::error!(target: "identity.token", error = %e, "Key loading task failed");
            IdentityError::Internal
        })?
    }

    async fn issue_pair(
        &self,
        user: &User,
        prev_refresh_token_id: Option<&str>,
    ) -> Result<TokenPair, IdentityError> {
        let claims = user.claims();
        if claims.has_empty_field() {
            return Err(IdentityError::InvalidRequest(
                "user identity is incomplete".to_string(),
            ));
        }

        let previous = prev_refresh_token_id
            .filter(|id| !id.is_empty())
            .map(|id| Uuid::parse_str(id).map_err(|_| invalid_token()))
            .transpose()?;

        let now = Utc::now().timestamp();
        let refresh_token_id = Uuid::new_v4();

        let id_token = {
            let (private_key, kid) = self.signing_key().await?;
            crypto::sign_id_token(
                &IdTokenClaims {
                    sub: user.user_id.clone(),
                    user: claims,
                    iat: now,
                    exp: now + self.id_token_ttl,
                },
                &private_key,
                &kid,
            )?
        };

        let refresh_token = crypto::sign_refresh_token(
            &RefreshTokenClaims {
                uid: user.user_id.clone(),
                jti: refresh_token_id.to_string(),
                iat: now,
                exp: now + self.refresh_token_ttl,
            },
            self.refresh_secret().await?.expose_secret(),
        )?;

        let ttl = Duration::seconds(self.refresh_token_ttl);
        match previous {
            Some(previous) => {
                let rotated = self
                    .refresh_tokens
                    .rotate_refresh_token(&user.user_id, previous, refresh_token_id, ttl)
                    .await
                    .inspect_err(|_| record_refresh_rotation("error"))?;

                if !rotated {
                    record_refresh_rotation("rejected");
                    tracing::debug!(
                        target: "identity.token",
                        user = %hash_for_correlation(&user.user_id),
                        "Previous refresh token is no longer stored"
                    );
                    return Err(invalid_token());
                }
                record_refresh_rotation("rotated");
            }
            None => {
                self.refresh_tokens
                    .set_refresh_token(&user.user_id, refresh_token_id, ttl)
                    .await?;
            }
        }

        Ok(TokenPair {
            id_token,
            refresh_token,
            refresh_token_id,
            user_id: user.user_id.clone(),
            expires_in: self.id_token_ttl,
            refresh_expires_in: self.refresh_token_ttl,
        })
    }
}

#[async_trait]
impl TokenIssuer for TokenService {
    #[instrument(skip_all, fields(rotation = prev_refresh_token_id.is_some()))]
    async fn new_pair_from_user(
        &self,
        user: &User,
        prev_refresh_token_id: Option<&str>,
    ) -> Result<TokenPair, IdentityError> {
        let started = Instant::now();
        let grant_type = if prev_refresh_token_id.is_some() {
            "refresh_token"
        } else {
            "direct"
        };

        let result = self.issue_pair(user, prev_refresh_token_id).await;

        match &result {
            Ok(_) => {
                record_token_issuance(grant_type, "success", started.elapsed());
                tracing::info!(
                    target: "identity.token",
                    user = %hash_for_correlation(&user.user_id),
                    grant_type,
                    "Token pair issued"
                );
            }
            Err(e) => {
                record_token_issuance(grant_type, "error", started.elapsed());
                tracing::warn!(
                    target: "identity.token",
                    user = %hash_for_correlation(&user.user_id),
                    grant_type,
                    error_category = ErrorCategory::from(e).as_str(),
                    error = %e,
                    "Token pair issuance failed"
                );
            }
        }

        result
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, user_id: &str) -> Result<(), IdentityError> {
        match self.refresh_tokens.delete_all_for_user(user_id).await {
            Ok(revoked) => {
                record_sign_out("success", revoked);
                tracing::info!(
                    target: "identity.token",
                    user = %hash_for_correlation(user_id),
                    revoked,
                    "User signed out"
                );
                Ok(())
            }
            Err(e) => {
                record_sign_out("error", 0);
                Err(e)
            }
        }
    }

    #[instrument(skip_all)]
    async fn validate_id_token(&self, token: &str) -> Result<UserClaims, IdentityError> {
        let public_key = self.verifying_key().await?;
        let claims = crypto::verify_id_token(token, &public_key)?;
        Ok(claims.user)
    }

    /// Verify the signature and that the token's `jti` is still stored.
    #[instrument(skip_all)]
    async fn validate_refresh_token(&self, token: &str) -> Result<RefreshTokenRef, IdentityError> {
        let claims = crypto::verify_refresh_token(token, self.refresh_secret().await?.expose_secret())?;

        let token_id = Uuid::parse_str(&claims.jti).map_err(|_| {
            tracing::debug!(target: "identity.token", "Refresh token jti is not a UUID");
            invalid_token()
        })?;

        if !self.refresh_tokens.is_active(&claims.uid, token_id).await? {
            tracing::debug!(
                target: "identity.token",
                user = %hash_for_correlation(&claims.uid),
                "Refresh token has been revoked or rotated"
            );
            return Err(invalid_token());
        }

        Ok(RefreshTokenRef {
            token_id,
            user_id: claims.uid,
            expires_at: claims.exp,
        })
    }

    #[instrument(skip_all)]
    async fn renew_token(&self, refresh_token: &str) -> Result<TokenPair, IdentityError> {
        let reference = self.validate_refresh_token(refresh_token).await?;

        let user = self
            .users
            .get_user_by_id(&reference.user_id)
            .await?
            .filter(|user| user.is_active && !user.claims().has_empty_field());

        let Some(user) = user else {
            // Revoke so the token cannot come back if the user is reactivated
            self.refresh_tokens
                .delete_refresh_token(&reference.user_id, reference.token_id)
                .await?;
            tracing::debug!(
                target: "identity.token",
                user = %hash_for_correlation(&reference.user_id),
                "Refresh token bound to a missing or inactive user, revoked"
            );
            return Err(invalid_token());
        };

        self.new_pair_from_user(&user, Some(&reference.token_id.to_string()))
            .await
    }
}

fn positive_or(value: i64, default: i64) -> i64 {
    if value > 0 {
        value
    } else {
        default
    }
}

fn invalid_token() -> IdentityError {
    IdentityError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
}
