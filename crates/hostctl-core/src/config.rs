//! Configuration types for hosts and executor settings

use std::time::Duration;

use hostctl_exec::ExecConfig;
use hostctl_os::{DEFAULT_PACKAGE_PRECEDENCE, PackageManagerKind};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Executor settings shared by every host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds allowed to open and authenticate a session
    pub connect_timeout_secs: u64,
    /// Seconds allowed per command when the command sets no timeout
    pub command_timeout_secs: u64,
    /// Reconnect attempts after a transport failure
    pub max_retries: u32,
    /// First retry delay in milliseconds
    pub backoff_base_ms: u64,
    /// Retry delay cap in milliseconds
    pub backoff_max_ms: u64,
    /// Whether commands retry unless they opt out
    pub retry_by_default: bool,
    /// SSH keep-alive interval in seconds, 0 disables
    pub keepalive_secs: u64,
    /// Bytes per file channel write
    pub transfer_chunk_size: usize,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let exec = ExecConfig::default();
        Self {
            connect_timeout_secs: exec.connect_timeout.as_secs(),
            command_timeout_secs: exec.command_timeout.as_secs(),
            max_retries: exec.max_retries,
            backoff_base_ms: millis(exec.backoff_base),
            backoff_max_ms: millis(exec.backoff_max),
            retry_by_default: exec.retry_by_default,
            keepalive_secs: exec.keepalive_interval.map_or(0, |d| d.as_secs()),
            transfer_chunk_size: exec.transfer_chunk_size,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Settings {
    /// Executor configuration for these settings
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` for zero timeouts or chunk size
    pub fn exec_config(&self) -> Result<ExecConfig, CoreError> {
        let config = ExecConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            retry_by_default: self.retry_by_default,
            keepalive_interval: (self.keepalive_secs > 0)
                .then(|| Duration::from_secs(self.keepalive_secs)),
            transfer_chunk_size: self.transfer_chunk_size,
        };
        config
            .validate()
            .map_err(|e| CoreError::ConfigError(e.to_string()))?;
        Ok(config)
    }
}

/// Configuration for a single managed host
#[derive(Debug, Deserialize)]
pub struct HostConfig {
    /// Unique host name
    pub name: String,
    /// IP address or hostname for SSH connection; `localhost` runs locally
    pub addr: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// SSH user (defaults to root)
    #[serde(default = "default_user")]
    pub user: String,
    /// Password authentication
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Path to SSH private key
    #[serde(default)]
    pub ssh_key: Option<String>,
    /// Environment variable holding a base64-encoded private key
    #[serde(default)]
    pub ssh_key_env: Option<String>,
    /// Passphrase for an encrypted key
    #[serde(default)]
    pub ssh_key_passphrase: Option<SecretString>,
    /// Prefix resource manager commands with sudo
    #[serde(default)]
    pub sudo: bool,
    /// Host-level retry default, overriding `settings.retry_by_default`
    #[serde(default)]
    pub retry: Option<bool>,
    /// Package manager precedence when several are installed
    #[serde(default)]
    pub package_precedence: Option<Vec<PackageManagerKind>>,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}

impl HostConfig {
    /// Minimal configuration for `addr`
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            port: default_port(),
            user: default_user(),
            password: None,
            ssh_key: None,
            ssh_key_env: None,
            ssh_key_passphrase: None,
            sudo: false,
            retry: None,
            package_precedence: None,
        }
    }

    /// Whether this host runs commands on the local machine
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.addr.as_str(), "localhost" | "127.0.0.1" | "::1")
    }

    /// Package manager precedence, falling back to the default order
    #[must_use]
    pub fn precedence(&self) -> Vec<PackageManagerKind> {
        self.package_precedence
            .clone()
            .unwrap_or_else(|| DEFAULT_PACKAGE_PRECEDENCE.to_vec())
    }

    /// Executor configuration for this host under `settings`
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` if the settings are invalid
    pub fn exec_config(&self, settings: &Settings) -> Result<ExecConfig, CoreError> {
        let mut config = settings.exec_config()?;
        if let Some(retry) = self.retry {
            config.retry_by_default = retry;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_match_executor() {
        let config = Settings::default().exec_config().unwrap();
        assert_eq!(config, ExecConfig::default());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let settings = Settings {
            command_timeout_secs: 0,
            ..Settings::default()
        };
        assert!(matches!(
            settings.exec_config(),
            Err(CoreError::ConfigError(_))
        ));
    }

    #[test]
    fn test_keepalive_zero_disables() {
        let settings = Settings {
            keepalive_secs: 0,
            ..Settings::default()
        };
        assert_eq!(settings.exec_config().unwrap().keepalive_interval, None);
    }

    #[test]
    fn test_host_overrides() {
        let mut host = HostConfig::new("web01", "10.0.0.5");
        assert!(!host.is_local());
        assert_eq!(host.precedence(), DEFAULT_PACKAGE_PRECEDENCE);

        host.retry = Some(true);
        host.package_precedence = Some(vec![PackageManagerKind::Apt]);
        let config = host.exec_config(&Settings::default()).unwrap();
        assert!(config.retry_by_default);
        assert_eq!(host.precedence(), [PackageManagerKind::Apt]);
    }
}
