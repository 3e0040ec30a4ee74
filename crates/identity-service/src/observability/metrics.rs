//! Metrics definitions for the identity service
//!
//! All metrics follow Prometheus naming conventions:
//! - `identity_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `grant_type`: `direct` (fresh session), `refresh_token` (rotation)
//! - `token_type`: `id`, `refresh`
//! - `status`: `success`, `error`
//! - `error_category`: see [`super::ErrorCategory`] plus the validation stages
//!   (`malformed`, `algorithm`, `signature`, `claims`, `expired`)

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Token Metrics
// ============================================================================

/// Record token pair issuance duration and outcome
///
/// Metric: `identity_token_issuance_duration_seconds`, `identity_token_issuance_total`
/// Labels: `grant_type`, `status`
pub fn record_token_issuance(grant_type: &str, status: &str, duration: Duration) {
    histogram!("identity_token_issuance_duration_seconds", "grant_type" => grant_type.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("identity_token_issuance_total", "grant_type" => grant_type.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record token validation result
///
/// Metric: `identity_token_validations_total`
/// Labels: `token_type`, `status`, `error_category`
pub fn record_token_validation(token_type: &str, status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("identity_token_validations_total", "token_type" => token_type.to_string(), "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

/// Record refresh token rotation outcome
///
/// Metric: `identity_refresh_rotations_total`
/// Labels: `outcome` (rotated, rejected, error)
pub fn record_refresh_rotation(outcome: &str) {
    counter!("identity_refresh_rotations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record sign-out and the number of refresh tokens revoked
///
/// Metric: `identity_sign_outs_total`, `identity_refresh_tokens_revoked_total`
pub fn record_sign_out(status: &str, revoked: u64) {
    counter!("identity_sign_outs_total", "status" => status.to_string()).increment(1);
    counter!("identity_refresh_tokens_revoked_total").increment(revoked);
}

// ============================================================================
// Authorization Code Metrics
// ============================================================================

/// Record authorization code lifecycle event
///
/// Metric: `identity_authorization_codes_total`
/// Labels: `event` (issued, exchanged, rejected, purged)
pub fn record_authorization_code(event: &str, count: u64) {
    counter!("identity_authorization_codes_total", "event" => event.to_string()).increment(count);
}

// ============================================================================
// Key Material Metrics
// ============================================================================

/// Record key material operation
///
/// Metric: `identity_key_material_operations_total`
/// Labels: `operation` (generate, load, verify), `status`
pub fn record_key_material(operation: &str, status: &str) {
    counter!("identity_key_material_operations_total", "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
}
