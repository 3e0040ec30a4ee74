use crate::crypto::UserClaims;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// User model (maps to users table)
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Identity snapshot embedded in ID tokens.
    pub fn claims(&self) -> UserClaims {
        UserClaims {
            id: self.user_id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

/// OAuth client model (maps to oauth_clients table)
#[derive(Debug, Clone, FromRow)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    /// Exact string match against the registered redirect URIs.
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }
}

/// Authorization code model (maps to authorization_codes table)
#[derive(Clone, FromRow)]
pub struct AuthorizationCode {
    pub code: String,
    pub user_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Redacts the code value and the PKCE challenge.
impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("code", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("code_challenge", &"[REDACTED]")
            .field("code_challenge_method", &self.code_challenge_method)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parameters for minting an authorization code.
#[derive(Debug, Clone, Copy)]
pub struct NewAuthorizationCode<'a> {
    pub user_id: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'a str,
    pub scope: &'a str,
}

/// Persisted refresh token id (maps to refresh_tokens table)
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Refresh token reference produced by validating a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRef {
    pub token_id: Uuid,
    pub user_id: String,
    pub expires_at: i64,
}

/// Freshly minted ID + refresh token pair.
#[derive(Clone)]
pub struct TokenPair {
    pub id_token: String,
    pub refresh_token: String,
    pub refresh_token_id: Uuid,
    pub user_id: String,
    /// ID token lifetime in seconds
    pub expires_in: i64,
    /// Refresh token lifetime in seconds
    pub refresh_expires_in: i64,
}

impl TokenPair {
    pub fn to_response(&self) -> TokenPairResponse {
        TokenPairResponse {
            id_token: self.id_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_in: self.expires_in,
            refresh_expires_in: self.refresh_expires_in,
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("refresh_token_id", &self.refresh_token_id)
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

/// Token pair body returned to callers.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPairResponse {
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub refresh_expires_in: i64,
}

/// OAuth 2.0 token endpoint request (authorization_code grant)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Token response (OAuth 2.0 compliant)
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub id_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub scope: String,
}

impl fmt::Debug for OAuthTokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}
