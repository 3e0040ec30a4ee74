//! Secret store adapter.
//!
//! Named secrets (the refresh-token HMAC key and the private-key encryption
//! password) live in an opaque key-value vault behind the [`SecretStore`]
//! trait. Production uses the platform keychain via [`KeyringSecretStore`];
//! tests and embedded deployments use [`InMemorySecretStore`].
//!
//! Every secret has one canonical form: standard base64 of exactly
//! [`SECRET_LEN`] random bytes. It is stored in that form and decoded exactly
//! once by [`decode_secret`].

use crate::crypto;
use crate::errors::IdentityError;
use base64::{engine::general_purpose, Engine as _};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use keyring::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::instrument;

/// Secret store name of the refresh-token HMAC key.
pub const JWT_SECRET_NAME: &str = "jwt_secret";

/// Secret store name of the private-key encryption password.
pub const KEY_PASSWORD_NAME: &str = "key_password";

/// Decoded length of every canonical secret.
pub const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret store access failed: {0}")]
    AccessFailed(String),

    #[error("Secret '{0}' is not in canonical form")]
    Invalid(String),
}

/// Opaque named-secret vault.
pub trait SecretStore: Send + Sync {
    fn store(&self, name: &str, value: &SecretString) -> Result<(), SecretStoreError>;

    /// Returns `SecretStoreError::NotFound` when no secret exists under `name`.
    fn retrieve(&self, name: &str) -> Result<SecretString, SecretStoreError>;
}

/// Platform keychain backed store (macOS Keychain, Windows Credential
/// Manager, Linux kernel keyutils).
pub struct KeyringSecretStore {
    service_name: String,
}

impl KeyringSecretStore {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry, SecretStoreError> {
        Entry::new(&self.service_name, name).map_err(|e| {
            SecretStoreError::AccessFailed(format!("Failed to open keychain entry {}: {}", name, e))
        })
    }
}

impl SecretStore for KeyringSecretStore {
    fn store(&self, name: &str, value: &SecretString) -> Result<(), SecretStoreError> {
        tracing::debug!(
            target: "identity.secrets",
            service = %self.service_name,
            name = %name,
            "Storing secret in keychain"
        );

        self.entry(name)?
            .set_password(value.expose_secret())
            .map_err(|e| {
                SecretStoreError::AccessFailed(format!("Failed to store secret {}: {}", name, e))
            })
    }

    fn retrieve(&self, name: &str) -> Result<SecretString, SecretStoreError> {
        let value = self.entry(name)?.get_password().map_err(|e| {
            if matches!(e, keyring::Error::NoEntry) {
                SecretStoreError::NotFound(name.to_string())
            } else {
                SecretStoreError::AccessFailed(format!("Failed to retrieve secret {}: {}", name, e))
            }
        })?;

        Ok(SecretString::from(value))
    }
}

/// Process-local store. Values vanish with the process.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, SecretString>>,
    unavailable: bool,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails with `AccessFailed`, for exercising
    /// error propagation.
    pub fn unavailable() -> Self {
        Self {
            secrets: RwLock::default(),
            unavailable: true,
        }
    }

    /// Drop a stored value, e.g. to simulate a wiped keychain.
    pub fn remove(&self, name: &str) -> Option<SecretString> {
        self.secrets.write().ok()?.remove(name)
    }

    fn check_available(&self) -> Result<(), SecretStoreError> {
        if self.unavailable {
            return Err(SecretStoreError::AccessFailed(
                "secret store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl SecretStore for InMemorySecretStore {
    fn store(&self, name: &str, value: &SecretString) -> Result<(), SecretStoreError> {
        self.check_available()?;
        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| SecretStoreError::AccessFailed("secret map lock poisoned".to_string()))?;
        secrets.insert(name.to_string(), value.clone());
        Ok(())
    }

    fn retrieve(&self, name: &str) -> Result<SecretString, SecretStoreError> {
        self.check_available()?;
        let secrets = self
            .secrets
            .read()
            .map_err(|_| SecretStoreError::AccessFailed("secret map lock poisoned".to_string()))?;
        secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(name.to_string()))
    }
}

/// Decode a canonical secret into its raw bytes.
///
/// # Errors
///
/// `SecretStoreError::Invalid` if the value is not standard base64 or does
/// not decode to exactly [`SECRET_LEN`] bytes.
pub fn decode_secret(name: &str, value: &SecretString) -> Result<SecretBox<Vec<u8>>, SecretStoreError> {
    let bytes = general_purpose::STANDARD
        .decode(value.expose_secret().as_bytes())
        .map_err(|_| SecretStoreError::Invalid(name.to_string()))?;

    if bytes.len() != SECRET_LEN {
        return Err(SecretStoreError::Invalid(name.to_string()));
    }

    Ok(SecretBox::new(Box::new(bytes)))
}

/// Fetch-or-generate access to named secrets.
///
/// Generation is serialized in-process, and after storing a freshly generated
/// value the resolver reads the store back: whatever the store holds wins,
/// so two processes racing on first use converge on one value.
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    generation_lock: Mutex<()>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            generation_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Retrieve an existing secret without generating one.
    #[instrument(skip_all, fields(name = %name))]
    pub fn get(&self, name: &str) -> Result<SecretString, IdentityError> {
        let value = self.store.retrieve(name)?;
        decode_secret(name, &value)?;
        Ok(value)
    }

    /// Retrieve `name`, generating and storing a fresh canonical secret on
    /// `NotFound`. Any other store failure propagates.
    #[instrument(skip_all, fields(name = %name))]
    pub fn get_or_generate(&self, name: &str) -> Result<SecretString, IdentityError> {
        if let Some(existing) = self.lookup(name)? {
            return Ok(existing);
        }

        let _guard = self
            .generation_lock
            .lock()
            .map_err(|_| IdentityError::Internal)?;

        // Another caller may have generated it while we waited
        if let Some(existing) = self.lookup(name)? {
            return Ok(existing);
        }

        let generated = crypto::generate_secret()?;
        self.store.store(name, &generated)?;

        tracing::info!(target: "identity.secrets", name = %name, "Generated new secret");

        // The stored value wins over our local copy
        let stored = self.store.retrieve(name)?;
        decode_secret(name, &stored)?;
        Ok(stored)
    }

    /// Fetch-or-generate and decode in one step.
    pub fn get_or_generate_bytes(&self, name: &str) -> Result<SecretBox<Vec<u8>>, IdentityError> {
        let value = self.get_or_generate(name)?;
        Ok(decode_secret(name, &value)?)
    }

    fn lookup(&self, name: &str) -> Result<Option<SecretString>, IdentityError> {
        match self.store.retrieve(name) {
            Ok(value) => {
                decode_secret(name, &value)?;
                Ok(Some(value))
            }
            Err(SecretStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
