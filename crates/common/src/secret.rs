//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate and adds the
//! constant-time comparison used wherever a caller-supplied value is checked
//! against a stored secret (PKCE verifiers, HMAC material).
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so any
//! struct deriving `Debug` that holds them is safe to log via `{:?}` or tracing.
//! Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoredSecret {
//!     name: String,
//!     value: SecretString,
//! }
//!
//! let stored = StoredSecret {
//!     name: "jwt_secret".to_string(),
//!     value: SecretString::from("c2VjcmV0"),
//! };
//!
//! assert!(!format!("{stored:?}").contains("c2VjcmV0"));
//! assert_eq!(stored.value.expose_secret(), "c2VjcmV0");
//! ```
//!
//! # Usage Guidelines
//!
//! Use `SecretString` for:
//! - Secret store values (HMAC keys, key-encryption passwords)
//! - Refresh tokens and authorization codes held in memory
//!
//! Use `SecretBox<Vec<u8>>` for:
//! - Decoded key material and ciphertext of private keys

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Compare two byte strings without short-circuiting on the first mismatch.
///
/// Every byte position up to the longer input is visited, so the running time
/// depends only on the input lengths, never on where the inputs diverge.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}
