//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible RSA signing keys and canonical secrets. All
//! fixtures are deterministic based on seed values.
//!
//! RSA-2048 generation is slow, so the two keys most tests need are generated
//! once per test binary and cached.

use base64::engine::general_purpose;
use base64::Engine;
use common::secret::SecretString;
use identity_service::crypto::RSA_KEY_BITS;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::RsaPrivateKey;
use std::sync::OnceLock;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

const PRIMARY_KEY_SEED: u64 = 1;
const ALTERNATE_KEY_SEED: u64 = 2;

/// Generate a deterministic RSA-2048 signing key.
///
/// The same seed always produces the same key. Not cached; prefer
/// [`test_signing_key`] and [`alternate_signing_key`].
pub fn signing_key_from_seed(seed: u64) -> Result<RsaPrivateKey, FixtureError> {
    let mut rng = StdRng::seed_from_u64(seed);
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test key: {}", e)))
}

/// The signing key used by [`crate::TestIdentity`].
pub fn test_signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        signing_key_from_seed(PRIMARY_KEY_SEED).expect("Failed to generate primary test key")
    })
}

/// A second key, unrelated to [`test_signing_key`].
pub fn alternate_signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        signing_key_from_seed(ALTERNATE_KEY_SEED).expect("Failed to generate alternate test key")
    })
}

/// Deterministic canonical secret (standard base64 of 32 bytes).
pub fn test_secret(seed: u8) -> SecretString {
    let bytes: Vec<u8> = (0u8..32)
        .map(|i| seed.wrapping_mul(31).wrapping_add(i))
        .collect();
    SecretString::from(general_purpose::STANDARD.encode(bytes))
}
