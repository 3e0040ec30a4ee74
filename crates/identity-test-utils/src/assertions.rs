//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions over compact JWT strings. These inspect
//! the token without verifying its signature; signature checks belong to
//! the service under test.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;

fn segment(token: &str, index: usize) -> Value {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT is missing segment {}", index));
    let bytes = URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {:?}", index, e));
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("Failed to parse JWT segment {} JSON: {:?}", index, e))
}

fn header(token: &str) -> Value {
    segment(token, 0)
}

fn claims(token: &str) -> Value {
    segment(token, 1)
}

/// Custom assertions for issued tokens
///
/// # Example
/// ```rust,ignore
/// pair.id_token
///     .assert_valid_jwt()
///     .assert_algorithm("RS256")
///     .assert_signed_by(&kid)
///     .assert_expires_in(3600);
/// ```
pub trait TokenAssertions {
    /// Assert that the token is a structurally valid JWT
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert the `alg` header
    fn assert_algorithm(&self, alg: &str) -> &Self;

    /// Assert the `kid` header
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that the token expires within the specified seconds
    fn assert_expires_in(&self, seconds: i64) -> &Self;

    /// Assert the `sub` claim (ID tokens) or `uid` claim (refresh tokens)
    fn assert_for_subject(&self, subject: &str) -> &Self;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts: Vec<_> = self.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts.len()
        );
        assert!(
            parts.iter().all(|part| !part.is_empty()),
            "JWT segments must be non-empty"
        );

        let header = header(self);
        assert_eq!(header["typ"], "JWT", "Expected JWT type");
        assert!(header["alg"].is_string(), "JWT header must carry alg");

        let claims = claims(self);
        assert!(claims["exp"].is_i64(), "JWT must carry an integer exp");
        assert!(claims["iat"].is_i64(), "JWT must carry an integer iat");

        self
    }

    fn assert_algorithm(&self, alg: &str) -> &Self {
        let header = header(self);
        assert_eq!(header["alg"], alg, "Expected algorithm '{}', got {}", alg, header["alg"]);
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = header(self);
        assert_eq!(
            header["kid"], key_id,
            "Expected key_id '{}', got {}",
            key_id, header["kid"]
        );
        self
    }

    fn assert_expires_in(&self, seconds: i64) -> &Self {
        let exp = claims(self)["exp"].as_i64().expect("JWT exp must be an integer");
        let expires_in = exp - chrono::Utc::now().timestamp();

        // Allow 5-second tolerance for slow tests
        assert!(
            (expires_in - seconds).abs() <= 5,
            "Expected token to expire in {} seconds, but expires in {} seconds",
            seconds,
            expires_in
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = claims(self);
        let actual = claims["sub"]
            .as_str()
            .or_else(|| claims["uid"].as_str())
            .expect("JWT has neither sub nor uid");
        assert_eq!(actual, subject, "Expected subject '{}', got '{}'", subject, actual);
        self
    }
}
