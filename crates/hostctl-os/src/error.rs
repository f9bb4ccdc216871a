//! Error types for hostctl-os

use hostctl_exec::ExecError;
use thiserror::Error;

use crate::probe::ProbeTrace;

/// Errors that can occur during OS detection
#[derive(Error, Debug, Clone)]
pub enum DetectError {
    /// No probe identified the OS family
    #[error("no probe identified the OS family: {trace}")]
    NoMatch {
        /// Every probe that ran and what it returned
        trace: ProbeTrace,
    },

    /// A probe pattern does not compile
    #[error("invalid probe pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Regex compiler message
        reason: String,
    },

    /// Unknown init system or package manager name
    #[error("unknown {0}")]
    UnknownKind(String),

    /// A probe command could not be delivered
    #[error("probe execution failed: {0}")]
    Exec(#[from] ExecError),
}

impl DetectError {
    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DetectError::Exec(e) if e.is_retryable())
    }

    /// Probe trace, when detection ran to completion without a match
    #[must_use]
    pub fn trace(&self) -> Option<&ProbeTrace> {
        match self {
            DetectError::NoMatch { trace } => Some(trace),
            _ => None,
        }
    }
}
