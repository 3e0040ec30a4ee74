//! Observability for the identity service.
//!
//! # Privacy by Default
//!
//! All instrumentation uses `#[instrument(skip_all)]` and explicit safe field
//! allow-listing. Fields are categorized as:
//! - **SAFE**: Can be logged in plaintext (enums, operation types, outcomes)
//! - **HASHED**: Must be hashed for correlation (user_id, client_id)
//! - **NEVER**: Must never appear in logs (secrets, tokens, codes, verifiers, keys)

pub mod metrics;

use crate::errors::IdentityError;
use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// Used for `user_id` and `client_id`, which need correlation across log
/// entries but should not be stored in plaintext. This is a one-way hash for
/// correlation only, not a secret-protection mechanism.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}

/// Error categories for log fields and metrics labels (bounded cardinality)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected tokens
    Token,
    /// Grant, client and request errors on the OAuth exchange
    Grant,
    /// Key material, cipher and signing failures
    Cryptographic,
    /// Persistence, secret store, configuration
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Token => "token",
            ErrorCategory::Grant => "grant",
            ErrorCategory::Cryptographic => "cryptographic",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&IdentityError> for ErrorCategory {
    fn from(err: &IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken(_) => ErrorCategory::Token,
            IdentityError::InvalidGrant(_)
            | IdentityError::InvalidClient(_)
            | IdentityError::InvalidRequest(_)
            | IdentityError::UnsupportedGrantType(_) => ErrorCategory::Grant,
            IdentityError::Crypto(_) | IdentityError::KeyMaterial(_) => {
                ErrorCategory::Cryptographic
            }
            IdentityError::Config(_)
            | IdentityError::Database(_)
            | IdentityError::SecretStore(_)
            | IdentityError::Internal => ErrorCategory::Internal,
        }
    }
}
