//! Configuration loading from hostctl.toml

use std::path::{Path, PathBuf};

use hostctl_core::{CoreError, HostConfig, Settings};
use serde::Deserialize;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "HOSTCTL_CONFIG";

/// Top-level configuration file
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Executor and logging settings
    #[serde(default)]
    pub settings: Settings,
    /// Individual host configurations
    #[serde(default)]
    pub host: Vec<HostConfig>,
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("cannot read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("cannot parse {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Load from an explicit path, `HOSTCTL_CONFIG`, or the default paths
    ///
    /// Returns the path the configuration came from, `None` for defaults.
    ///
    /// # Errors
    /// Returns error if the chosen file cannot be read or parsed
    pub fn discover(explicit: Option<&Path>) -> eyre::Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        let mut paths = vec![
            PathBuf::from("hostctl.toml"),
            PathBuf::from("/etc/hostctl/hostctl.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("hostctl/hostctl.toml"));
        }

        for path in paths {
            if path.exists() {
                return Ok((Self::load(&path)?, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    /// Configuration entry for `name`
    ///
    /// # Errors
    /// Returns `CoreError::HostNotFound` for unknown names
    pub fn host(&self, name: &str) -> Result<&HostConfig, CoreError> {
        self.host
            .iter()
            .find(|h| h.name == name)
            .ok_or_else(|| CoreError::HostNotFound(name.to_string()))
    }
}
