//! Error types for hostctl-resources

use hostctl_exec::ExecError;
use thiserror::Error;

/// Errors that can occur during resource operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A service control command exited non-zero
    #[error("service {service}: {action} failed with status {status}: {stderr}")]
    ServiceOperation {
        /// Service name
        service: String,
        /// start, stop, restart, enable, disable
        action: String,
        /// Exit status
        status: i32,
        /// Standard error
        stderr: String,
    },

    /// A package command exited non-zero
    #[error("package {package}: {action} failed with status {status}: {stderr}")]
    PackageOperation {
        /// Package name or pattern
        package: String,
        /// install, remove, update, ...
        action: String,
        /// Exit status
        status: i32,
        /// Standard error
        stderr: String,
    },

    /// Any other resource command exited non-zero
    #[error("command `{command}` failed with status {status}: {stderr}")]
    CommandFailed {
        /// Command line
        command: String,
        /// Exit status
        status: i32,
        /// Standard error
        stderr: String,
    },

    /// No strategy for this capability and classification, or the strategy
    /// lacks the operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Remote path or object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Refused before anything was sent to the host
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Lock file conflict (another package manager process running)
    #[error("lock file conflict: {0}")]
    LockConflict(String),

    /// Insufficient permissions (need sudo)
    #[error("insufficient permissions: {0}")]
    PermissionDenied(String),

    /// Failed to parse command output
    #[error("parse error: {0}")]
    ParseError(String),

    /// Execution error from remote executor
    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ResourceError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ResourceError::LockConflict(_) => true,
            ResourceError::Exec(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Check if error indicates need for sudo
    #[must_use]
    pub fn needs_sudo(&self) -> bool {
        matches!(self, ResourceError::PermissionDenied(_))
    }

    /// Check if the requested operation has no strategy
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ResourceError::Unsupported(_))
    }
}
