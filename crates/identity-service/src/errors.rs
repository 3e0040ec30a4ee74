use crate::secrets::SecretStoreError;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Generic public message for every token rejection.
///
/// Expired, forged, malformed and revoked tokens are indistinguishable to
/// callers; the specific reason is only logged at debug level.
pub const INVALID_TOKEN_MESSAGE: &str = "The token is invalid or expired";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),

    #[error("Key material error: {0}")]
    KeyMaterial(#[from] KeyMaterialError),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Invalid client: {0}")]
    InvalidClient(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("Internal server error")]
    Internal,
}

/// Failures loading or producing the signing key material.
///
/// Each stage of loading the private key has its own variant so an operator
/// can tell a missing file from a wrong password from a corrupted key.
#[derive(Debug, Error)]
pub enum KeyMaterialError {
    #[error("Key material file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PEM decode failed: {0}")]
    PemDecode(String),

    #[error("Certificate parse failed: {0}")]
    CertificateParse(String),

    #[error("Unsupported public key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Key encryption password is unusable: {0}")]
    Password(String),

    #[error("Private key decryption failed")]
    Decryption,

    #[error("Private key parse failed: {0}")]
    KeyParse(String),

    #[error("Certificate generation failed: {0}")]
    Generation(String),
}

impl IdentityError {
    /// OAuth 2.0 error code (RFC 6749 section 5.2 plus `invalid_token`).
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            IdentityError::InvalidToken(_) => "invalid_token",
            IdentityError::InvalidGrant(_) => "invalid_grant",
            IdentityError::InvalidClient(_) => "invalid_client",
            IdentityError::InvalidRequest(_) => "invalid_request",
            IdentityError::UnsupportedGrantType(_) => "unsupported_grant_type",
            IdentityError::Config(_)
            | IdentityError::Database(_)
            | IdentityError::SecretStore(_)
            | IdentityError::KeyMaterial(_)
            | IdentityError::Crypto(_)
            | IdentityError::Internal => "server_error",
        }
    }

    /// HTTP status an outer surface should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            IdentityError::InvalidToken(_) | IdentityError::InvalidClient(_) => 401,
            IdentityError::InvalidGrant(_)
            | IdentityError::InvalidRequest(_)
            | IdentityError::UnsupportedGrantType(_) => 400,
            _ => 500,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

/// OAuth 2.0 error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl From<&IdentityError> for ErrorResponse {
    fn from(err: &IdentityError) -> Self {
        let description = match err {
            IdentityError::InvalidToken(_) => INVALID_TOKEN_MESSAGE.to_string(),
            IdentityError::InvalidGrant(reason)
            | IdentityError::InvalidClient(reason)
            | IdentityError::InvalidRequest(reason) => reason.clone(),
            IdentityError::UnsupportedGrantType(grant_type) => {
                format!("Grant type '{}' is not supported", grant_type)
            }
            _ => "An internal error occurred".to_string(),
        };

        ErrorResponse {
            error: err.oauth_error_code().to_string(),
            error_description: description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_errors_map_to_oauth_codes() {
        let cases = [
            (IdentityError::InvalidGrant("x".into()), "invalid_grant", 400),
            (IdentityError::InvalidClient("x".into()), "invalid_client", 401),
            (IdentityError::InvalidRequest("x".into()), "invalid_request", 400),
            (
                IdentityError::UnsupportedGrantType("password".into()),
                "unsupported_grant_type",
                400,
            ),
            (IdentityError::InvalidToken("x".into()), "invalid_token", 401),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.oauth_error_code(), code);
            assert_eq!(err.status_code(), status);
            assert!(!err.is_server_error());
        }
    }

    #[test]
    fn test_persistence_errors_are_server_errors() {
        let errors = [
            IdentityError::Database("connection refused".into()),
            IdentityError::SecretStore(SecretStoreError::AccessFailed("locked".into())),
            IdentityError::KeyMaterial(KeyMaterialError::Decryption),
            IdentityError::Crypto("bad key".into()),
            IdentityError::Config("missing".into()),
            IdentityError::Internal,
        ];

        for err in errors {
            assert_eq!(err.oauth_error_code(), "server_error");
            assert_eq!(err.status_code(), 500);
            assert!(err.is_server_error());
        }
    }

    #[test]
    fn test_error_response_hides_internal_detail() {
        let err = IdentityError::Database("password authentication failed for user".into());
        let body = ErrorResponse::from(&err);

        assert_eq!(body.error, "server_error");
        assert!(!body.error_description.contains("password"));
    }

    #[test]
    fn test_error_response_uses_generic_token_message() {
        let err = IdentityError::InvalidToken("signature mismatch".into());
        let body = ErrorResponse::from(&err);

        assert_eq!(body.error, "invalid_token");
        assert_eq!(body.error_description, INVALID_TOKEN_MESSAGE);
    }

    #[test]
    fn test_error_response_serializes_oauth_shape() {
        let body = ErrorResponse::from(&IdentityError::InvalidGrant(
            "authorization code is invalid or expired".into(),
        ));
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["error"], "invalid_grant");
        assert_eq!(
            json["error_description"],
            "authorization code is invalid or expired"
        );
    }

    #[test]
    fn test_key_material_errors_are_distinct() {
        let missing = KeyMaterialError::MissingFile(PathBuf::from("/tmp/identity-key.pem"));
        assert!(missing.to_string().contains("/tmp/identity-key.pem"));
        assert_ne!(
            KeyMaterialError::Decryption.to_string(),
            KeyMaterialError::Password("wrong length".into()).to_string()
        );
    }
}
