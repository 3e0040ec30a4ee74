//! Signing key material on disk.
//!
//! The service signs ID tokens with an RSA-2048 key whose public half is
//! published in a self-signed X.509 certificate. Two files make up the
//! material:
//!
//! - the certificate, PEM label `CERTIFICATE`, mode 0644
//! - the private key, PEM label `ENCRYPTED RSA PRIVATE KEY`, mode 0600,
//!   whose body is `nonce || ciphertext || tag` (ChaCha20-Poly1305 over the
//!   PKCS#1 DER key) sealed with the `key_password` secret
//!
//! Loading the private key is a pipeline (read, PEM decode, fetch password,
//! decrypt, parse) and every stage reports its own [`KeyMaterialError`].

use crate::config;
use crate::crypto::{self, EncryptedKey};
use crate::errors::{IdentityError, KeyMaterialError};
use crate::observability::metrics::record_key_material;
use crate::secrets::{self, SecretResolver, SecretStoreError, KEY_PASSWORD_NAME};
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{DecodePublicKey, EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;
use x509_parser::public_key::PublicKey;

pub const CERTIFICATE_PEM_LABEL: &str = "CERTIFICATE";
pub const ENCRYPTED_KEY_PEM_LABEL: &str = "ENCRYPTED RSA PRIVATE KEY";

const CERTIFICATE_COMMON_NAME: &str = "identity-service";
const CERTIFICATE_SUBJECT_ALT_NAME: &str = "localhost";
const CERTIFICATE_VALIDITY_DAYS: i64 = 365;
const SERIAL_NUMBER_BYTES: usize = 16;

const CERT_FILE_MODE: u32 = 0o644;
const KEY_FILE_MODE: u32 = 0o600;

/// Owns the certificate and encrypted key paths.
pub struct CredentialManager {
    cert_path: PathBuf,
    key_path: PathBuf,
    secrets: Arc<SecretResolver>,
}

impl CredentialManager {
    /// Empty paths fall back to `$HOME/.identity/certs/...`.
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        secrets: Arc<SecretResolver>,
    ) -> Self {
        let home = config::home_dir();
        let cert_path = non_empty_or(cert_path.into(), || {
            config::default_cert_path(home.as_deref())
        });
        let key_path = non_empty_or(key_path.into(), || {
            config::default_key_path(home.as_deref())
        });

        Self {
            cert_path,
            key_path,
            secrets,
        }
    }

    pub fn with_default_paths(secrets: Arc<SecretResolver>) -> Self {
        Self::new(PathBuf::new(), PathBuf::new(), secrets)
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Generate a fresh RSA key and self-signed certificate and write both
    /// files, creating parent directories as needed.
    ///
    /// With `password = None` the `key_password` secret is fetched or
    /// generated. An explicit password must be a canonical secret. It
    /// replaces `key_password` only when `key_path` is the managed key path;
    /// material written elsewhere stays the caller's to unlock.
    ///
    /// Returns the encrypted key file body and the certificate DER.
    #[instrument(skip_all, fields(cert_path = %cert_path.display(), key_path = %key_path.display()))]
    pub fn generate_certificate(
        &self,
        cert_path: &Path,
        key_path: &Path,
        password: Option<&SecretString>,
    ) -> Result<(Vec<u8>, Vec<u8>), IdentityError> {
        let result = crypto::generate_rsa_key().and_then(|key| {
            self.write_key_material(&key, cert_path, key_path, password)
        });

        match &result {
            Ok(_) => {
                record_key_material("generate", "success");
                tracing::info!(target: "identity.credentials", "Generated new signing key material");
            }
            Err(e) => {
                record_key_material("generate", "error");
                tracing::error!(target: "identity.credentials", error = %e, "Key material generation failed");
            }
        }

        result
    }

    /// [`generate_certificate`](Self::generate_certificate) at the managed paths.
    pub fn generate_self_signed(&self) -> Result<(Vec<u8>, Vec<u8>), IdentityError> {
        self.generate_certificate(&self.cert_path, &self.key_path, None)
    }

    /// Write certificate and encrypted key files for an existing key.
    #[instrument(skip_all)]
    pub fn import_private_key(&self, key: &RsaPrivateKey) -> Result<(), IdentityError> {
        self.write_key_material(key, &self.cert_path, &self.key_path, None)?;
        record_key_material("import", "success");
        Ok(())
    }

    /// Generate key material when either file is missing.
    ///
    /// Returns `true` when new material was written.
    pub fn ensure_key_material(&self) -> Result<bool, IdentityError> {
        if self.cert_path.exists() && self.key_path.exists() {
            tracing::debug!(target: "identity.credentials", "Existing key material found");
            return Ok(false);
        }

        tracing::info!(
            target: "identity.credentials",
            cert_path = %self.cert_path.display(),
            key_path = %self.key_path.display(),
            "Key material missing, generating"
        );
        self.generate_self_signed()?;
        Ok(true)
    }

    /// Load and decrypt the signing key.
    #[instrument(skip_all)]
    pub fn private_key(&self) -> Result<RsaPrivateKey, IdentityError> {
        let result = self.load_private_key();
        if let Err(e) = &result {
            record_key_material("load", "error");
            tracing::warn!(target: "identity.credentials", error = %e, "Failed to load private key");
        }
        result
    }

    /// RSA public key from the certificate's SubjectPublicKeyInfo.
    pub fn public_key(&self) -> Result<RsaPublicKey, IdentityError> {
        let pem = read_file(&self.cert_path)?;
        let der = crypto::pem_decode(CERTIFICATE_PEM_LABEL, &pem)?;
        let (_, cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| KeyMaterialError::CertificateParse(format!("{:?}", e)))?;

        let spki = cert.public_key();
        match spki.parsed() {
            Ok(PublicKey::RSA(_)) => {}
            Ok(_) => {
                return Err(KeyMaterialError::UnsupportedKeyType(
                    spki.algorithm.algorithm.to_id_string(),
                )
                .into())
            }
            Err(e) => return Err(KeyMaterialError::CertificateParse(e.to_string()).into()),
        }

        let public_key = RsaPublicKey::from_public_key_der(spki.raw)
            .map_err(|e| KeyMaterialError::KeyParse(e.to_string()))?;
        Ok(public_key)
    }

    /// Check that the certificate file decodes and parses as X.509.
    pub fn verify_certificate(&self) -> Result<(), IdentityError> {
        match self.certificate_der().and_then(|der| parse_validity(&der)) {
            Ok(_) => {
                record_key_material("verify", "success");
                Ok(())
            }
            Err(e) => {
                record_key_material("verify", "error");
                Err(e)
            }
        }
    }

    /// Certificate `(not_before, not_after)`.
    pub fn certificate_validity(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), IdentityError> {
        parse_validity(&self.certificate_der()?)
    }

    pub fn is_certificate_expired(&self) -> Result<bool, IdentityError> {
        let (_, not_after) = self.certificate_validity()?;
        Ok(Utc::now() > not_after)
    }

    /// JWT `kid`: fingerprint of the certificate DER.
    pub fn key_id(&self) -> Result<String, IdentityError> {
        Ok(crypto::fingerprint(&self.certificate_der()?))
    }

    pub fn certificate_der(&self) -> Result<Vec<u8>, IdentityError> {
        let pem = read_file(&self.cert_path)?;
        Ok(crypto::pem_decode(CERTIFICATE_PEM_LABEL, &pem)?)
    }

    /// Raw encrypted key file body (`nonce || ciphertext || tag`).
    pub fn encrypted_private_key(&self) -> Result<Vec<u8>, IdentityError> {
        let pem = read_file(&self.key_path)?;
        Ok(crypto::pem_decode(ENCRYPTED_KEY_PEM_LABEL, &pem)?)
    }

    fn load_private_key(&self) -> Result<RsaPrivateKey, IdentityError> {
        let body = self.encrypted_private_key()?;
        let password = self.stored_password()?;

        let encrypted =
            EncryptedKey::from_bytes(&body).map_err(|_| KeyMaterialError::Decryption)?;
        let der = crypto::decrypt_private_key(&encrypted, password.expose_secret())
            .map_err(|_| KeyMaterialError::Decryption)?;

        Ok(crypto::private_key_from_pkcs1_der(der.expose_secret())?)
    }

    fn stored_password(&self) -> Result<SecretBox<Vec<u8>>, IdentityError> {
        let value = match self.secrets.store().retrieve(KEY_PASSWORD_NAME) {
            Ok(value) => value,
            Err(SecretStoreError::NotFound(_)) => {
                return Err(KeyMaterialError::Password(
                    "no key password in the secret store".to_string(),
                )
                .into())
            }
            Err(e) => return Err(e.into()),
        };

        secrets::decode_secret(KEY_PASSWORD_NAME, &value)
            .map_err(|e| KeyMaterialError::Password(e.to_string()).into())
    }

    fn password_for_write(
        &self,
        password: Option<&SecretString>,
        key_path: &Path,
    ) -> Result<SecretBox<Vec<u8>>, IdentityError> {
        match password {
            None => self.secrets.get_or_generate_bytes(KEY_PASSWORD_NAME),
            Some(value) => {
                let bytes = secrets::decode_secret(KEY_PASSWORD_NAME, value)
                    .map_err(|e| KeyMaterialError::Password(e.to_string()))?;
                if key_path == self.key_path {
                    self.secrets.store().store(KEY_PASSWORD_NAME, value)?;
                } else {
                    tracing::debug!(
                        target: "identity.credentials",
                        key_path = %key_path.display(),
                        "Explicit password used for unmanaged key path, not stored"
                    );
                }
                Ok(bytes)
            }
        }
    }

    fn write_key_material(
        &self,
        key: &RsaPrivateKey,
        cert_path: &Path,
        key_path: &Path,
        password: Option<&SecretString>,
    ) -> Result<(Vec<u8>, Vec<u8>), IdentityError> {
        let cert_der = build_certificate(key)?;

        let password = self.password_for_write(password, key_path)?;
        let der = crypto::private_key_to_pkcs1_der(key)?;
        let encrypted = crypto::encrypt_private_key(der.expose_secret(), password.expose_secret())?;
        let key_body = encrypted.to_bytes();

        write_file(
            key_path,
            crypto::pem_encode(ENCRYPTED_KEY_PEM_LABEL, &key_body).as_bytes(),
            KEY_FILE_MODE,
        )?;
        write_file(
            cert_path,
            crypto::pem_encode(CERTIFICATE_PEM_LABEL, &cert_der).as_bytes(),
            CERT_FILE_MODE,
        )?;

        Ok((key_body, cert_der))
    }
}

/// Self-signed certificate for `key`, valid for one year from now.
fn build_certificate(key: &RsaPrivateKey) -> Result<Vec<u8>, KeyMaterialError> {
    let generation = |e: &dyn std::fmt::Display| KeyMaterialError::Generation(e.to_string());

    let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).map_err(|e| generation(&e))?;
    let key_pair =
        KeyPair::from_pem_and_sign_algo(&pkcs8, &PKCS_RSA_SHA256).map_err(|e| generation(&e))?;

    let mut params = CertificateParams::new(vec![CERTIFICATE_SUBJECT_ALT_NAME.to_string()])
        .map_err(|e| generation(&e))?;
    params
        .distinguished_name
        .push(DnType::CommonName, CERTIFICATE_COMMON_NAME);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(CERTIFICATE_VALIDITY_DAYS);

    let mut serial = crypto::generate_random_bytes(SERIAL_NUMBER_BYTES).map_err(|e| generation(&e))?;
    // Positive, non-zero DER integer
    if let Some(first) = serial.first_mut() {
        *first = (*first & 0x7f) | 0x01;
    }
    params.serial_number = Some(SerialNumber::from(serial));

    let cert = params.self_signed(&key_pair).map_err(|e| generation(&e))?;
    Ok(cert.der().to_vec())
}

fn parse_validity(der: &[u8]) -> Result<(DateTime<Utc>, DateTime<Utc>), IdentityError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| KeyMaterialError::CertificateParse(format!("{:?}", e)))?;

    let validity = cert.validity();
    let to_utc = |ts: i64| {
        DateTime::<Utc>::from_timestamp(ts, 0).ok_or_else(|| {
            KeyMaterialError::CertificateParse(format!("validity timestamp out of range: {}", ts))
        })
    };

    Ok((
        to_utc(validity.not_before.timestamp())?,
        to_utc(validity.not_after.timestamp())?,
    ))
}

fn non_empty_or(path: PathBuf, default: impl FnOnce() -> PathBuf) -> PathBuf {
    if path.as_os_str().is_empty() {
        default()
    } else {
        path
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, KeyMaterialError> {
    fs::read(path).map_err(|e| io_error(path, e))
}

/// Write `contents` with unix permissions `mode` (ignored elsewhere).
fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<(), KeyMaterialError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path).map_err(|e| io_error(path, e))?;
    file.write_all(contents).map_err(|e| io_error(path, e))?;

    // `mode` only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| io_error(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> KeyMaterialError {
    if source.kind() == ErrorKind::NotFound {
        KeyMaterialError::MissingFile(path.to_path_buf())
    } else {
        KeyMaterialError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
