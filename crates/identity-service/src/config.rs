use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default ID token lifetime (1 hour).
pub const DEFAULT_ID_TOKEN_TTL_SECONDS: i64 = 3600;

/// Default refresh token lifetime (7 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 3600;

/// Default authorization code lifetime.
pub const DEFAULT_AUTH_CODE_TTL_MINUTES: i64 = 10;

/// Default keychain service name for stored secrets.
pub const DEFAULT_KEYRING_SERVICE: &str = "identity";

const CERT_FILE_NAME: &str = "identity-cert.pem";
const KEY_FILE_NAME: &str = "identity-key.pem";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub keyring_service: String,
    pub id_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub auth_code_ttl_minutes: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let home = vars.get("HOME").map(PathBuf::from);
        let cert_path = path_or_default(vars, "IDENTITY_CERT_PATH", || {
            default_cert_path(home.as_deref())
        });
        let key_path = path_or_default(vars, "IDENTITY_KEY_PATH", || {
            default_key_path(home.as_deref())
        });

        let keyring_service = vars
            .get("IDENTITY_KEYRING_SERVICE")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string());

        Ok(Config {
            database_url,
            cert_path,
            key_path,
            keyring_service,
            id_token_ttl_seconds: positive_or_default(
                vars,
                "ID_TOKEN_TTL_SECONDS",
                DEFAULT_ID_TOKEN_TTL_SECONDS,
            )?,
            refresh_token_ttl_seconds: positive_or_default(
                vars,
                "REFRESH_TOKEN_TTL_SECONDS",
                DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            )?,
            auth_code_ttl_minutes: positive_or_default(
                vars,
                "AUTH_CODE_TTL_MINUTES",
                DEFAULT_AUTH_CODE_TTL_MINUTES,
            )?,
        })
    }
}

/// `$HOME/.identity/certs`, falling back to the working directory when
/// no home directory is known.
pub fn default_key_material_dir(home: Option<&Path>) -> PathBuf {
    home.unwrap_or_else(|| Path::new("."))
        .join(".identity")
        .join("certs")
}

pub fn default_cert_path(home: Option<&Path>) -> PathBuf {
    default_key_material_dir(home).join(CERT_FILE_NAME)
}

pub fn default_key_path(home: Option<&Path>) -> PathBuf {
    default_key_material_dir(home).join(KEY_FILE_NAME)
}

/// Home directory of the current process, if any.
pub fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

fn path_or_default(
    vars: &HashMap<String, String>,
    name: &str,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default)
}

/// Parse an integer variable. Absent or non-positive values use `default`.
fn positive_or_default(
    vars: &HashMap<String, String>,
    name: &str,
    default: i64,
) -> Result<i64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: i64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("{}", e),
    })?;

    Ok(if value > 0 { value } else { default })
}
