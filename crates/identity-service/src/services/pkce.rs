//! PKCE (RFC 7636) code verifier checks.

use crate::errors::IdentityError;
use base64::{engine::general_purpose, Engine as _};
use common::secret::constant_time_eq;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    S256,
    Plain,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::S256 => "S256",
            CodeChallengeMethod::Plain => "plain",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PkceError {
    #[error("code_verifier is required")]
    MissingVerifier,

    #[error("code_challenge is required")]
    MissingChallenge,

    #[error("code_verifier length {0} is outside 43..=128")]
    VerifierLength(usize),

    #[error("unsupported code_challenge_method '{0}'")]
    UnsupportedMethod(String),

    #[error("code_verifier does not match code_challenge")]
    Mismatch,
}

impl From<PkceError> for IdentityError {
    fn from(err: PkceError) -> Self {
        IdentityError::InvalidGrant(err.to_string())
    }
}

/// Check `verifier` against the stored `challenge` using `method`.
pub fn validate_code_verifier(verifier: &str, challenge: &str, method: &str) -> Result<(), PkceError> {
    if verifier.is_empty() {
        return Err(PkceError::MissingVerifier);
    }
    if challenge.is_empty() {
        return Err(PkceError::MissingChallenge);
    }
    check_verifier_length(verifier)?;

    let expected = match method.parse::<CodeChallengeMethod>()? {
        CodeChallengeMethod::S256 => s256_challenge(verifier),
        CodeChallengeMethod::Plain => verifier.to_string(),
    };

    if constant_time_eq(expected.as_bytes(), challenge.as_bytes()) {
        Ok(())
    } else {
        Err(PkceError::Mismatch)
    }
}

/// S256 challenge for a client-side verifier.
pub fn generate_code_challenge(verifier: &str) -> Result<String, PkceError> {
    if verifier.is_empty() {
        return Err(PkceError::MissingVerifier);
    }
    check_verifier_length(verifier)?;
    Ok(s256_challenge(verifier))
}

fn check_verifier_length(verifier: &str) -> Result<(), PkceError> {
    let len = verifier.len();
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(PkceError::VerifierLength(len));
    }
    Ok(())
}

fn s256_challenge(verifier: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
