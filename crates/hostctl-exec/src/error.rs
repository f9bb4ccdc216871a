//! Error types for hostctl-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during remote execution and file transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Could not establish a session (DNS failure, refused, unreachable)
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication was rejected by the remote side
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command or connect attempt exceeded its timeout
    #[error("command timed out after {timeout:?}")]
    Timeout {
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// Session-level disruption (reset, broken pipe, channel failure)
    #[error("transport error: {0}")]
    Transport(String),

    /// Transport failure on a call that did not opt into retry
    #[error("execution of `{command}` failed: {reason}")]
    Execution {
        /// Command line that was being executed
        command: String,
        /// Underlying transport failure
        reason: String,
    },

    /// Retries exhausted, or the session was closed under an in-flight operation
    #[error("connection lost after {attempts} attempt(s): {reason}")]
    ConnectionLost {
        /// Total number of attempts made
        attempts: u32,
        /// Last observed failure
        reason: String,
    },

    /// Remote command ran but exited outside its accepted set
    #[error("command `{command}` failed with exit code {status}: {stderr}")]
    CommandFailed {
        /// Command line
        command: String,
        /// Exit status code
        status: i32,
        /// Stderr output
        stderr: String,
    },

    /// File transfer integrity check failed
    #[error("transfer of {path} failed: {reason}")]
    Transfer {
        /// Remote path
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Remote file does not exist
    #[error("remote file not found: {0}")]
    NotFound(String),

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Executor was closed explicitly
    #[error("executor closed")]
    Closed,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

impl ExecError {
    /// Check if error is recoverable by reconnecting and re-issuing the command
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecError::Transport(_) | ExecError::Timeout { .. })
    }

    /// Check if error means the session itself is no longer usable
    #[must_use]
    pub fn invalidates_session(&self) -> bool {
        matches!(self, ExecError::Transport(_))
    }

    /// Exit status carried by a `CommandFailed` error
    #[must_use]
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            ExecError::CommandFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ExecError::Transport("reset".into()).is_retryable());
        assert!(
            ExecError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .is_retryable()
        );
        assert!(!ExecError::AuthenticationFailed("denied".into()).is_retryable());
        assert!(!ExecError::ConnectionFailed("no route".into()).is_retryable());
        assert!(
            !ExecError::CommandFailed {
                command: "false".into(),
                status: 1,
                stderr: String::new(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_exit_status() {
        let err = ExecError::CommandFailed {
            command: "exit 3".into(),
            status: 3,
            stderr: "boom".into(),
        };
        assert_eq!(err.exit_status(), Some(3));
        assert_eq!(ExecError::Closed.exit_status(), None);
    }
}
