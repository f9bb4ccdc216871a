//! Executor timeout and retry policy

use std::time::Duration;

use crate::error::ExecError;

/// Default command timeout
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
/// Default TCP connect + handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default size of one file channel write
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Timeout and retry settings for one executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Time allowed to open and authenticate a session
    pub connect_timeout: Duration,
    /// Timeout applied to commands that don't carry their own
    pub command_timeout: Duration,
    /// Reconnect attempts after the first failed one
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff_base: Duration,
    /// Upper bound for the retry delay
    pub backoff_max: Duration,
    /// Retry flag used when a request does not set one
    pub retry_by_default: bool,
    /// SSH keep-alive interval
    pub keepalive_interval: Option<Duration>,
    /// Bytes per file channel write
    pub transfer_chunk_size: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            retry_by_default: false,
            keepalive_interval: Some(Duration::from_secs(30)),
            transfer_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ExecConfig {
    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    /// Reject settings that would make operations block forever
    ///
    /// # Errors
    /// Returns `ExecError::ConfigError` for zero timeouts or chunk size
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.connect_timeout.is_zero() {
            return Err(ExecError::ConfigError("connect_timeout must be > 0".into()));
        }
        if self.command_timeout.is_zero() {
            return Err(ExecError::ConfigError("command_timeout must be > 0".into()));
        }
        if self.transfer_chunk_size == 0 {
            return Err(ExecError::ConfigError(
                "transfer_chunk_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ExecConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
            ..ExecConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_validate() {
        assert!(ExecConfig::default().validate().is_ok());
        let config = ExecConfig {
            command_timeout: Duration::ZERO,
            ..ExecConfig::default()
        };
        assert!(matches!(config.validate(), Err(ExecError::ConfigError(_))));
    }
}
