//! Credentials and SSH key resolution

use std::env;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::debug;

/// Where a private key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Explicit path to key file
    Path(PathBuf),
    /// Base64-encoded key from environment
    Env(String),
}

impl KeySource {
    /// Resolve the key source into something the SSH client can load
    ///
    /// # Errors
    /// Returns `KeyError` if the file is missing or too permissive, or the
    /// environment variable is unset or not valid base64
    pub fn resolve(&self) -> Result<ResolvedKey, KeyError> {
        match self {
            KeySource::Path(path) => {
                validate_key_permissions(path)?;
                Ok(ResolvedKey::Path(path.clone()))
            }
            KeySource::Env(var_name) => {
                let base64_key =
                    env::var(var_name).map_err(|_| KeyError::EnvNotSet(var_name.clone()))?;
                let key_data = base64_decode(&base64_key).map_err(|_| KeyError::InvalidBase64)?;
                let pem = String::from_utf8(key_data).map_err(|_| KeyError::InvalidBase64)?;
                debug!(var = %var_name, "decoded SSH key from environment");
                Ok(ResolvedKey::Inline(SecretString::new(pem)))
            }
        }
    }
}

/// Key material ready for authentication
#[derive(Debug)]
pub enum ResolvedKey {
    /// Key file on disk
    Path(PathBuf),
    /// PEM/OpenSSH text held in memory
    Inline(SecretString),
}

/// How to authenticate a session
#[derive(Debug)]
pub enum Credentials {
    /// Password authentication
    Password(SecretString),
    /// Public key authentication
    Key {
        /// Resolved private key
        key: ResolvedKey,
        /// Passphrase protecting the key
        passphrase: Option<SecretString>,
    },
}

impl Credentials {
    /// Password credentials
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password(SecretString::new(password.into()))
    }

    /// Key credentials, resolving the source now so bad keys fail early
    ///
    /// # Errors
    /// Returns `KeyError` if the key source cannot be resolved
    pub fn key(source: &KeySource, passphrase: Option<String>) -> Result<Self, KeyError> {
        Ok(Credentials::Key {
            key: source.resolve()?,
            passphrase: passphrase.map(SecretString::new),
        })
    }

    /// Authentication method name for logs
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Password(_) => "password",
            Credentials::Key { .. } => "publickey",
        }
    }
}

/// Key resolution errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("environment variable {0} not set")]
    EnvNotSet(String),

    #[error("invalid base64 encoding")]
    InvalidBase64,

    #[error("key file permissions too open: {0} (should be 600)")]
    BadPermissions(String),

    #[error("key file not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(input.trim())
}

fn validate_key_permissions(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => KeyError::NotFound(path.display().to_string()),
        _ => KeyError::Io(e),
    })?;

    // Group and other must have no access
    if metadata.permissions().mode() & 0o77 != 0 {
        return Err(KeyError::BadPermissions(path.display().to_string()));
    }

    Ok(())
}
