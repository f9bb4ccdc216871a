//! Core error types for hostctl-core

use hostctl_exec::ExecError;
use hostctl_os::DetectError;
use hostctl_resources::ResourceError;
use thiserror::Error;

/// Errors that can occur in host operations
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Host not found in configuration
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Command execution or transfer failed
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// OS detection failed
    #[error(transparent)]
    Detect(#[from] DetectError),

    /// Resource manager operation failed
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl CoreError {
    /// Check if a fresh attempt of the same operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Exec(e) => e.is_retryable(),
            CoreError::Detect(e) => e.is_retryable(),
            CoreError::Resource(e) => e.is_retryable(),
            CoreError::HostNotFound(_) | CoreError::ConfigError(_) => false,
        }
    }

    /// Check if the host's classification has no strategy for the request
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CoreError::Resource(e) if e.is_unsupported())
    }
}
