//! Builder patterns for test data construction
//!
//! Provides fluent APIs for users, OAuth clients, and ID tokens with
//! arbitrary timestamps.

use chrono::{Duration, Utc};
use identity_service::crypto::{self, IdTokenClaims, UserClaims};
use identity_service::models::{OAuthClient, User};
use rsa::RsaPrivateKey;

use crate::test_ids::{SCOPE_OPENID, TEST_CLIENT_ID, TEST_CLIENT_NAME, TEST_REDIRECT_URI};

/// Builder for directory users
///
/// # Example
/// ```rust,ignore
/// let user = TestUserBuilder::new("user-1").with_role("admin").build();
/// ```
pub struct TestUserBuilder {
    user: User,
}

impl TestUserBuilder {
    pub fn new(user_id: &str) -> Self {
        Self {
            user: User {
                user_id: user_id.to_string(),
                username: format!("{}-name", user_id),
                email: format!("{}@example.com", user_id),
                role: "member".to_string(),
                is_active: true,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.user.username = username.to_string();
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.user.email = email.to_string();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.user.role = role.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.user.is_active = false;
        self
    }

    pub fn build(self) -> User {
        self.user
    }
}

/// Builder for OAuth clients, defaulting to the `c1` test client.
pub struct TestClientBuilder {
    client: OAuthClient,
}

impl TestClientBuilder {
    pub fn new() -> Self {
        Self {
            client: OAuthClient {
                client_id: TEST_CLIENT_ID.to_string(),
                client_name: TEST_CLIENT_NAME.to_string(),
                redirect_uris: vec![TEST_REDIRECT_URI.to_string()],
                scopes: vec![SCOPE_OPENID.to_string()],
                is_active: true,
                created_at: Utc::now(),
            },
        }
    }

    pub fn with_client_id(mut self, client_id: &str) -> Self {
        self.client.client_id = client_id.to_string();
        self
    }

    pub fn with_redirect_uris(mut self, uris: &[&str]) -> Self {
        self.client.redirect_uris = uris.iter().map(|uri| uri.to_string()).collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.client.is_active = false;
        self
    }

    pub fn build(self) -> OAuthClient {
        self.client
    }
}

impl Default for TestClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for signed ID tokens with arbitrary claims, for exercising
/// validation edge cases the service itself never produces.
///
/// # Example
/// ```rust,ignore
/// let expired = TestIdTokenBuilder::for_user(&user)
///     .expires_in(-1)
///     .sign(test_signing_key(), &kid);
/// ```
pub struct TestIdTokenBuilder {
    claims: IdTokenClaims,
}

impl TestIdTokenBuilder {
    pub fn for_user(user: &User) -> Self {
        let now = Utc::now();
        Self {
            claims: IdTokenClaims {
                sub: user.user_id.clone(),
                user: user.claims(),
                iat: now.timestamp(),
                exp: (now + Duration::seconds(3600)).timestamp(),
            },
        }
    }

    /// Set expiration in seconds from now (negative for the past)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at in seconds from now (negative for the past)
    pub fn issued_in(mut self, seconds: i64) -> Self {
        self.claims.iat = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn with_timestamps(mut self, iat: i64, exp: i64) -> Self {
        self.claims.iat = iat;
        self.claims.exp = exp;
        self
    }

    pub fn with_user_claims(mut self, user: UserClaims) -> Self {
        self.claims.user = user;
        self
    }

    pub fn claims(&self) -> &IdTokenClaims {
        &self.claims
    }

    pub fn sign(self, key: &RsaPrivateKey, key_id: &str) -> String {
        crypto::sign_id_token(&self.claims, key, key_id).expect("Failed to sign test ID token")
    }
}
