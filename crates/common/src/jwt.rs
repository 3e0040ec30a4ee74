//! JWT shape checks shared by the identity service and its test utilities.
//!
//! These helpers look at a compact JWT *before* any signature verification:
//! - Size limits for denial-of-service prevention
//! - Three-segment structure
//! - Header `alg` / `kid` extraction
//! - Timestamp sanity (`iat`/`exp`) against an explicit clock
//!
//! Nothing in this module validates a signature. A token that passes these
//! checks MUST still be verified with the appropriate key.
//!
//! Error messages are intentionally generic; the specific reason is logged at
//! debug level under the `common.jwt` target.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

/// Maximum allowed JWT size in bytes (4KB).
///
/// Tokens above this size are rejected before base64 decoding or any
/// cryptographic work. RS256 ID tokens carrying the user snapshot are
/// well under 1KB.
pub const MAX_JWT_SIZE_BYTES: usize = 4096;

/// Number of dot-separated segments in a compact JWS.
const JWT_SEGMENTS: usize = 3;

/// Errors produced by the pre-verification shape checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The token is invalid or expired")]
    TokenTooLarge,

    /// Token is not `header.payload.signature` or the header is not JSON.
    #[error("The token is invalid or expired")]
    MalformedToken,

    /// Header has no usable `alg` field.
    #[error("The token is invalid or expired")]
    MissingAlgorithm,

    /// Header has no usable `kid` field.
    #[error("The token is invalid or expired")]
    MissingKid,

    /// `iat`/`exp` are non-positive, out of order, or already expired.
    #[error("The token is invalid or expired")]
    InvalidTimestamps,
}

/// Check size and segment count, then decode the header JSON.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` for a wrong segment count, empty segments, bad base64 or bad JSON
pub fn decode_header(token: &str) -> Result<serde_json::Value, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != JWT_SEGMENTS || parts.iter().any(|p| p.is_empty()) {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })
}

/// Extract the `alg` header value without verifying the signature.
///
/// # Errors
///
/// Shape errors from [`decode_header`], or `MissingAlgorithm` if `alg` is absent,
/// empty, or not a string.
pub fn extract_algorithm(token: &str) -> Result<String, JwtValidationError> {
    header_string(token, "alg", JwtValidationError::MissingAlgorithm)
}

/// Extract the `kid` header value without verifying the signature.
///
/// # Errors
///
/// Shape errors from [`decode_header`], or `MissingKid` if `kid` is absent,
/// empty, or not a string.
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    header_string(token, "kid", JwtValidationError::MissingKid)
}

fn header_string(
    token: &str,
    field: &str,
    missing: JwtValidationError,
) -> Result<String, JwtValidationError> {
    let header = decode_header(token)?;
    header
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(missing)
}

/// Validate `iat`/`exp` against an explicit `now` (Unix seconds).
///
/// Accepts only `0 < iat <= exp` with `exp > now`. A token whose `exp` equals
/// `now` is already expired.
///
/// # Errors
///
/// Returns `InvalidTimestamps` when any of the conditions above fails.
pub fn validate_timestamps_at(iat: i64, exp: i64, now: i64) -> Result<(), JwtValidationError> {
    if iat <= 0 || exp <= 0 {
        tracing::debug!(target: "common.jwt", iat, exp, "Token rejected: non-positive timestamp");
        return Err(JwtValidationError::InvalidTimestamps);
    }
    if iat > exp {
        tracing::debug!(target: "common.jwt", iat, exp, "Token rejected: iat after exp");
        return Err(JwtValidationError::InvalidTimestamps);
    }
    if exp <= now {
        tracing::debug!(target: "common.jwt", exp, now, "Token rejected: expired");
        return Err(JwtValidationError::InvalidTimestamps);
    }
    Ok(())
}
