//! OAuth 2.0 authorization code grant with PKCE.
//!
//! A code is minted for an authenticated user after the client and its
//! redirect URI check out, and is later exchanged exactly once for a token
//! pair. Every exchange failure except persistence errors is reported as
//! `invalid_grant`, so callers cannot tell an unknown code from a used one.

use crate::config::DEFAULT_AUTH_CODE_TTL_MINUTES;
use crate::errors::IdentityError;
use crate::models::{
    AuthorizationCode, NewAuthorizationCode, OAuthClient, OAuthTokenResponse, TokenPair,
    TokenRequest,
};
use crate::observability::{hash_for_correlation, ErrorCategory};
use crate::observability::metrics::record_authorization_code;
use crate::repositories::{AuthorizationCodeRepository, OAuthClientRepository, UserDirectory};
use crate::services::pkce::{self, CodeChallengeMethod};
use crate::services::token_service::TokenIssuer;
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

pub const AUTHORIZATION_CODE_GRANT: &str = "authorization_code";

pub struct OAuthService {
    clients: Arc<dyn OAuthClientRepository>,
    codes: Arc<dyn AuthorizationCodeRepository>,
    users: Arc<dyn UserDirectory>,
    tokens: Arc<dyn TokenIssuer>,
    code_ttl_minutes: i64,
}

impl OAuthService {
    pub fn new(
        clients: Arc<dyn OAuthClientRepository>,
        codes: Arc<dyn AuthorizationCodeRepository>,
        users: Arc<dyn UserDirectory>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Self {
        Self {
            clients,
            codes,
            users,
            tokens,
            code_ttl_minutes: DEFAULT_AUTH_CODE_TTL_MINUTES,
        }
    }

    /// Override the code lifetime. Non-positive values keep the default.
    pub fn with_code_ttl_minutes(mut self, minutes: i64) -> Self {
        if minutes > 0 {
            self.code_ttl_minutes = minutes;
        }
        self
    }

    /// Check that `client_id` is an active client with `redirect_uri`
    /// registered.
    pub async fn validate_client(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<OAuthClient, IdentityError> {
        if client_id.is_empty() || redirect_uri.is_empty() {
            return Err(IdentityError::InvalidClient(
                "client_id and redirect_uri are required".to_string(),
            ));
        }
        self.clients
            .validate_redirect_uri(client_id, redirect_uri)
            .await
    }

    /// Mint a single-use authorization code for `user_id`.
    ///
    /// An empty `method` means `S256`.
    #[instrument(skip_all, fields(client = %hash_for_correlation(client_id)))]
    pub async fn generate_authorization_code(
        &self,
        user_id: &str,
        client_id: &str,
        redirect_uri: &str,
        code_challenge: &str,
        method: &str,
        scope: &str,
    ) -> Result<String, IdentityError> {
        self.validate_client(client_id, redirect_uri).await?;

        if user_id.is_empty() {
            return Err(IdentityError::InvalidRequest("user_id is required".to_string()));
        }
        if code_challenge.is_empty() {
            return Err(IdentityError::InvalidRequest(
                "code_challenge is required".to_string(),
            ));
        }
        let method = if method.is_empty() {
            CodeChallengeMethod::S256
        } else {
            method.parse::<CodeChallengeMethod>().map_err(|_| {
                IdentityError::InvalidRequest(
                    "code_challenge_method must be 'S256' or 'plain'".to_string(),
                )
            })?
        };

        let record = self
            .codes
            .generate_code(
                NewAuthorizationCode {
                    user_id,
                    client_id,
                    redirect_uri,
                    code_challenge,
                    code_challenge_method: method.as_str(),
                    scope,
                },
                self.code_ttl_minutes,
            )
            .await?;

        record_authorization_code("issued", 1);
        tracing::info!(
            target: "identity.oauth",
            user = %hash_for_correlation(user_id),
            method = %method,
            "Authorization code issued"
        );

        Ok(record.code)
    }

    /// Redeem `code` for a fresh token pair.
    pub async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
    ) -> Result<TokenPair, IdentityError> {
        let (pair, _) = self.exchange(code, code_verifier, client_id, None).await?;
        Ok(pair)
    }

    /// Token endpoint: validate the request shape and answer with the
    /// OAuth 2.0 token response body.
    #[instrument(skip_all, fields(grant_type = %request.grant_type))]
    pub async fn handle_token_request(
        &self,
        request: &TokenRequest,
    ) -> Result<OAuthTokenResponse, IdentityError> {
        if request.grant_type != AUTHORIZATION_CODE_GRANT {
            return Err(IdentityError::UnsupportedGrantType(
                request.grant_type.clone(),
            ));
        }

        let (Some(code), Some(code_verifier), Some(client_id)) = (
            required(&request.code),
            required(&request.code_verifier),
            required(&request.client_id),
        ) else {
            return Err(IdentityError::InvalidRequest(
                "code, code_verifier, and client_id are required".to_string(),
            ));
        };

        let (pair, scope) = self
            .exchange(
                code,
                code_verifier,
                client_id,
                required(&request.redirect_uri),
            )
            .await?;

        Ok(OAuthTokenResponse {
            access_token: pair.id_token.clone(),
            id_token: pair.id_token,
            token_type: "Bearer".to_string(),
            expires_in: pair.expires_in,
            refresh_token: pair.refresh_token,
            scope,
        })
    }

    /// Register a new client. The id is `client_` plus 16 hex characters.
    pub async fn register_client(
        &self,
        client_name: &str,
        redirect_uris: Vec<String>,
        scopes: Vec<String>,
    ) -> Result<OAuthClient, IdentityError> {
        if client_name.trim().is_empty() {
            return Err(IdentityError::InvalidRequest(
                "client_name is required".to_string(),
            ));
        }
        if redirect_uris.is_empty() {
            return Err(IdentityError::InvalidRequest(
                "at least one redirect_uri is required".to_string(),
            ));
        }
        if redirect_uris.iter().any(|uri| uri.trim().is_empty()) {
            return Err(IdentityError::InvalidRequest(
                "redirect_uri must not be blank".to_string(),
            ));
        }

        let client = self
            .clients
            .create_client(OAuthClient {
                client_id: generate_client_id(),
                client_name: client_name.to_string(),
                redirect_uris,
                scopes,
                is_active: true,
                created_at: Utc::now(),
            })
            .await?;

        tracing::info!(
            target: "identity.oauth",
            client = %hash_for_correlation(&client.client_id),
            "OAuth client registered"
        );
        Ok(client)
    }

    /// Delete expired authorization codes.
    pub async fn purge_expired_codes(&self) -> Result<u64, IdentityError> {
        let purged = self.codes.purge_expired().await?;
        record_authorization_code("purged", purged);
        if purged > 0 {
            tracing::info!(target: "identity.oauth", purged, "Purged expired authorization codes");
        }
        Ok(purged)
    }

    #[instrument(skip_all, fields(client = %hash_for_correlation(client_id)))]
    async fn exchange(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
    ) -> Result<(TokenPair, String), IdentityError> {
        let result = self
            .redeem(code, code_verifier, client_id, redirect_uri)
            .await;

        match &result {
            Ok(_) => {
                record_authorization_code("exchanged", 1);
            }
            Err(e) => {
                record_authorization_code("rejected", 1);
                tracing::warn!(
                    target: "identity.oauth",
                    error_category = ErrorCategory::from(e).as_str(),
                    error = %e,
                    "Authorization code exchange failed"
                );
            }
        }

        result
    }

    async fn redeem(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
    ) -> Result<(TokenPair, String), IdentityError> {
        if code.is_empty() {
            return Err(invalid_grant("authorization code is required"));
        }

        // Consumed from here on, whatever happens next
        let record: AuthorizationCode = self
            .codes
            .validate_and_consume(code)
            .await?
            .ok_or_else(|| invalid_grant("invalid or expired authorization code"))?;

        if record.client_id != client_id {
            return Err(invalid_grant("client_id does not match authorization code"));
        }
        if redirect_uri.is_some_and(|uri| uri != record.redirect_uri) {
            return Err(invalid_grant("redirect_uri does not match authorization code"));
        }

        pkce::validate_code_verifier(
            code_verifier,
            &record.code_challenge,
            &record.code_challenge_method,
        )?;

        let user = self
            .users
            .get_user_by_id(&record.user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| invalid_grant("user not found or inactive"))?;

        let pair = self
            .tokens
            .new_pair_from_user(&user, None)
            .await
            .map_err(|e| {
                if e.is_server_error() {
                    e
                } else {
                    IdentityError::InvalidGrant(e.to_string())
                }
            })?;

        Ok((pair, record.scope))
    }
}

fn generate_client_id() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("client_{}", simple.get(..16).unwrap_or(&simple))
}

fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn invalid_grant(reason: &str) -> IdentityError {
    IdentityError::InvalidGrant(reason.to_string())
}
