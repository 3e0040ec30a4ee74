use crate::errors::{IdentityError, KeyMaterialError, INVALID_TOKEN_MESSAGE};
use crate::observability::metrics::record_token_validation;
use base64::{engine::general_purpose, Engine as _};
use common::jwt::{extract_algorithm, validate_timestamps_at};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305},
    rand::{SecureRandom, SystemRandom},
};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::instrument;

/// Modulus size of generated signing keys.
pub const RSA_KEY_BITS: usize = 2048;

/// ChaCha20-Poly1305 nonce length (96 bits).
pub const NONCE_LEN: usize = 12;

/// Poly1305 authentication tag length (128 bits).
pub const TAG_LEN: usize = 16;

/// Key length required by the key-at-rest cipher.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Random bytes behind each authorization code.
const AUTHORIZATION_CODE_BYTES: usize = 32;

/// Identity snapshot embedded in ID tokens.
///
/// Every field is required on deserialization; `validate_id_token` further
/// rejects empty values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl UserClaims {
    pub fn has_empty_field(&self) -> bool {
        self.id.is_empty() || self.username.is_empty() || self.email.is_empty() || self.role.is_empty()
    }
}

/// Redacts `id` and `email`.
impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("id", &"[REDACTED]")
            .field("username", &self.username)
            .field("email", &"[REDACTED]")
            .field("role", &self.role)
            .finish()
    }
}

/// RS256 ID token claims.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub user: UserClaims,
    pub iat: i64,
    pub exp: i64,
}

impl fmt::Debug for IdTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdTokenClaims")
            .field("sub", &"[REDACTED]")
            .field("user", &self.user)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// HS256 refresh token claims.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Bound user id
    pub uid: String,
    /// Refresh token id (UUID v4), the key persisted in the token repository
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl fmt::Debug for RefreshTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTokenClaims")
            .field("uid", &"[REDACTED]")
            .field("jti", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Private key sealed with ChaCha20-Poly1305.
///
/// Debug is manually implemented to redact all cryptographic material.
/// Clone is manually implemented because SecretBox requires explicit cloning.
pub struct EncryptedKey {
    /// Ciphertext of the PKCS#1 DER private key.
    pub encrypted_data: SecretBox<Vec<u8>>,
    pub nonce: Vec<u8>, // 96-bit (12 bytes)
    pub tag: Vec<u8>,   // 128-bit (16 bytes)
}

impl EncryptedKey {
    /// On-disk layout: `nonce || ciphertext || tag`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let ciphertext = self.encrypted_data.expose_secret();
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let tag_start = bytes
            .len()
            .checked_sub(TAG_LEN)
            .filter(|start| *start >= NONCE_LEN)
            .ok_or_else(|| {
                IdentityError::Crypto(format!(
                    "Encrypted key too short: {} bytes (minimum {})",
                    bytes.len(),
                    NONCE_LEN + TAG_LEN
                ))
            })?;

        let invalid = || IdentityError::Crypto("Encrypted key layout is invalid".to_string());
        let nonce = bytes.get(..NONCE_LEN).ok_or_else(invalid)?.to_vec();
        let encrypted_data = bytes.get(NONCE_LEN..tag_start).ok_or_else(invalid)?.to_vec();
        let tag = bytes.get(tag_start..).ok_or_else(invalid)?.to_vec();

        Ok(EncryptedKey {
            encrypted_data: SecretBox::new(Box::new(encrypted_data)),
            nonce,
            tag,
        })
    }
}

impl Clone for EncryptedKey {
    fn clone(&self) -> Self {
        Self {
            encrypted_data: SecretBox::new(Box::new(self.encrypted_data.expose_secret().clone())),
            nonce: self.nonce.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("encrypted_data", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .field("tag", &"[REDACTED]")
            .finish()
    }
}

/// Generate an RSA-2048 signing key from the OS CSPRNG.
#[instrument(skip_all)]
pub fn generate_rsa_key() -> Result<RsaPrivateKey, IdentityError> {
    let mut rng = rand::rngs::OsRng;
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| IdentityError::Crypto(format!("RSA key generation failed: {}", e)))
}

/// PKCS#1 DER encoding of a private key, kept in a `SecretBox`.
pub fn private_key_to_pkcs1_der(key: &RsaPrivateKey) -> Result<SecretBox<Vec<u8>>, IdentityError> {
    let der = key
        .to_pkcs1_der()
        .map_err(|e| IdentityError::Crypto(format!("Private key encoding failed: {}", e)))?;
    Ok(SecretBox::new(Box::new(der.as_bytes().to_vec())))
}

pub fn private_key_from_pkcs1_der(der: &[u8]) -> Result<RsaPrivateKey, KeyMaterialError> {
    RsaPrivateKey::from_pkcs1_der(der).map_err(|e| KeyMaterialError::KeyParse(e.to_string()))
}

/// Encrypt private key material with ChaCha20-Poly1305.
///
/// Uses a 96-bit random nonce and produces a 128-bit authentication tag.
#[instrument(skip_all)]
pub fn encrypt_private_key(
    private_key: &[u8],
    encryption_key: &[u8],
) -> Result<EncryptedKey, IdentityError> {
    check_encryption_key(encryption_key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|e| IdentityError::Crypto(format!("Nonce generation failed: {}", e)))?;

    let unbound_key = UnboundKey::new(&CHACHA20_POLY1305, encryption_key)
        .map_err(|e| IdentityError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    let mut in_out = private_key.to_vec();
    sealing_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|e| IdentityError::Crypto(format!("Encryption operation failed: {}", e)))?;

    // The sealed buffer is plaintext-length ciphertext followed by the tag
    let tag_start = in_out
        .len()
        .checked_sub(TAG_LEN)
        .ok_or_else(|| IdentityError::Crypto("Encryption produced invalid output".to_string()))?;
    let tag = in_out.split_off(tag_start);

    Ok(EncryptedKey {
        encrypted_data: SecretBox::new(Box::new(in_out)),
        nonce: nonce_bytes.to_vec(),
        tag,
    })
}

/// Decrypt private key material sealed by [`encrypt_private_key`].
#[instrument(skip_all)]
pub fn decrypt_private_key(
    encrypted: &EncryptedKey,
    encryption_key: &[u8],
) -> Result<SecretBox<Vec<u8>>, IdentityError> {
    check_encryption_key(encryption_key)?;

    if encrypted.tag.len() != TAG_LEN {
        return Err(IdentityError::Crypto(format!(
            "Invalid tag length: {} (expected {})",
            encrypted.tag.len(),
            TAG_LEN
        )));
    }

    let nonce_bytes: [u8; NONCE_LEN] = encrypted.nonce.as_slice().try_into().map_err(|_| {
        IdentityError::Crypto(format!(
            "Invalid nonce length: {} (expected {})",
            encrypted.nonce.len(),
            NONCE_LEN
        ))
    })?;

    let mut in_out = encrypted.encrypted_data.expose_secret().clone();
    in_out.extend_from_slice(&encrypted.tag);

    let unbound_key = UnboundKey::new(&CHACHA20_POLY1305, encryption_key)
        .map_err(|e| IdentityError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    let opening_key = LessSafeKey::new(unbound_key);

    let plaintext = opening_key
        .open_in_place(Nonce::assume_unique_for_key(nonce_bytes), Aad::empty(), &mut in_out)
        .map_err(|_| IdentityError::Crypto("Decryption operation failed".to_string()))?;

    Ok(SecretBox::new(Box::new(plaintext.to_vec())))
}

fn check_encryption_key(key: &[u8]) -> Result<(), IdentityError> {
    if key.len() != ENCRYPTION_KEY_LEN {
        return Err(IdentityError::Crypto(format!(
            "Invalid encryption key length: {} (expected {})",
            key.len(),
            ENCRYPTION_KEY_LEN
        )));
    }
    Ok(())
}

/// Sign ID token claims with RS256.
#[instrument(skip_all)]
pub fn sign_id_token(
    claims: &IdTokenClaims,
    private_key: &RsaPrivateKey,
    key_id: &str,
) -> Result<String, IdentityError> {
    let der = private_key_to_pkcs1_der(private_key)?;
    let encoding_key = EncodingKey::from_rsa_der(der.expose_secret());

    let mut header = Header::new(Algorithm::RS256);
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    encode(&header, claims, &encoding_key)
        .map_err(|e| IdentityError::Crypto(format!("JWT signing operation failed: {}", e)))
}

/// Verify an RS256 ID token against the current clock.
///
/// Rejects oversized or malformed tokens, any algorithm other than RS256,
/// bad signatures, empty identity fields, non-positive timestamps,
/// `iat > exp` and `exp <= now`. All rejections are `InvalidToken` with the
/// same public message.
#[instrument(skip_all)]
pub fn verify_id_token(token: &str, public_key: &RsaPublicKey) -> Result<IdTokenClaims, IdentityError> {
    verify_id_token_at(token, public_key, chrono::Utc::now().timestamp())
}

pub(crate) fn verify_id_token_at(
    token: &str,
    public_key: &RsaPublicKey,
    now: i64,
) -> Result<IdTokenClaims, IdentityError> {
    let algorithm = extract_algorithm(token).map_err(|_| {
        record_token_validation("id", "error", Some("malformed"));
        invalid_token()
    })?;
    if algorithm != "RS256" {
        tracing::debug!(target: "crypto", algorithm = %algorithm, "ID token rejected: unexpected signing method");
        record_token_validation("id", "error", Some("algorithm"));
        return Err(invalid_token());
    }

    let public_der = public_key
        .to_pkcs1_der()
        .map_err(|e| IdentityError::Crypto(format!("Public key encoding failed: {}", e)))?;
    let decoding_key = DecodingKey::from_rsa_der(public_der.as_bytes());

    let claims = decode::<IdTokenClaims>(token, &decoding_key, &untimed_validation(Algorithm::RS256))
        .map_err(|e| {
            tracing::debug!(target: "crypto", error = %e, "ID token verification failed");
            record_token_validation("id", "error", Some("signature"));
            invalid_token()
        })?
        .claims;

    if claims.user.has_empty_field() || claims.sub.is_empty() {
        tracing::debug!(target: "crypto", "ID token rejected: empty identity claim");
        record_token_validation("id", "error", Some("claims"));
        return Err(invalid_token());
    }

    validate_timestamps_at(claims.iat, claims.exp, now).map_err(|_| {
        record_token_validation("id", "error", Some("expired"));
        invalid_token()
    })?;

    record_token_validation("id", "success", None);
    Ok(claims)
}

/// Sign refresh token claims with HS256 under the service HMAC secret.
#[instrument(skip_all)]
pub fn sign_refresh_token(claims: &RefreshTokenClaims, secret: &[u8]) -> Result<String, IdentityError> {
    let mut header = Header::new(Algorithm::HS256);
    header.typ = Some("JWT".to_string());

    encode(&header, claims, &EncodingKey::from_secret(secret))
        .map_err(|e| IdentityError::Crypto(format!("Refresh token signing failed: {}", e)))
}

/// Verify an HS256 refresh token against the current clock.
#[instrument(skip_all)]
pub fn verify_refresh_token(token: &str, secret: &[u8]) -> Result<RefreshTokenClaims, IdentityError> {
    verify_refresh_token_at(token, secret, chrono::Utc::now().timestamp())
}

pub(crate) fn verify_refresh_token_at(
    token: &str,
    secret: &[u8],
    now: i64,
) -> Result<RefreshTokenClaims, IdentityError> {
    let algorithm = extract_algorithm(token).map_err(|_| {
        record_token_validation("refresh", "error", Some("malformed"));
        invalid_token()
    })?;
    if algorithm != "HS256" {
        tracing::debug!(target: "crypto", algorithm = %algorithm, "Refresh token rejected: unexpected signing method");
        record_token_validation("refresh", "error", Some("algorithm"));
        return Err(invalid_token());
    }

    let claims = decode::<RefreshTokenClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &untimed_validation(Algorithm::HS256),
    )
    .map_err(|e| {
        tracing::debug!(target: "crypto", error = %e, "Refresh token verification failed");
        record_token_validation("refresh", "error", Some("signature"));
        invalid_token()
    })?
    .claims;

    if claims.uid.is_empty() || claims.jti.is_empty() {
        record_token_validation("refresh", "error", Some("claims"));
        return Err(invalid_token());
    }

    validate_timestamps_at(claims.iat, claims.exp, now).map_err(|_| {
        record_token_validation("refresh", "error", Some("expired"));
        invalid_token()
    })?;

    record_token_validation("refresh", "success", None);
    Ok(claims)
}

/// Signature-only validation; expiry is checked against an explicit clock
/// by `validate_timestamps_at`, with no leeway.
fn untimed_validation(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp"]);
    validation
}

fn invalid_token() -> IdentityError {
    IdentityError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
}

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, IdentityError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|e| IdentityError::Crypto(format!("Random bytes generation failed: {}", e)))?;
    Ok(bytes)
}

/// Generate a canonical secret: standard base64 of 32 random bytes.
#[instrument(skip_all)]
pub fn generate_secret() -> Result<SecretString, IdentityError> {
    let bytes = generate_random_bytes(ENCRYPTION_KEY_LEN)?;
    Ok(SecretString::from(general_purpose::STANDARD.encode(&bytes)))
}

/// Generate an authorization code: base64url (no padding) of 32 random bytes.
pub fn generate_authorization_code() -> Result<String, IdentityError> {
    let bytes = generate_random_bytes(AUTHORIZATION_CODE_BYTES)?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
}

/// Short SHA-256 fingerprint (16 hex chars) used as the JWT `kid`.
pub fn fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    hex::encode(digest.get(..8).unwrap_or_default())
}

/// Encode DER bytes as a PEM block with 64-column base64 lines.
pub fn pem_encode(label: &str, der: &[u8]) -> String {
    let body = general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for line in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

/// Decode the first PEM block of `input`, requiring `label`.
pub fn pem_decode(label: &str, input: &[u8]) -> Result<Vec<u8>, KeyMaterialError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(input)
        .map_err(|e| KeyMaterialError::PemDecode(format!("{:?}", e)))?;

    if pem.label != label {
        return Err(KeyMaterialError::PemDecode(format!(
            "unexpected PEM block '{}' (expected '{}')",
            pem.label, label
        )));
    }

    Ok(pem.contents)
}
