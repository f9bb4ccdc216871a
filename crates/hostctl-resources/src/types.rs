//! Value types returned by resource managers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Observed state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service is running
    Running,
    /// Service is stopped or failed
    Stopped,
    /// The init system did not say
    Unknown,
}

impl ServiceStatus {
    /// Whether the service is running
    #[must_use]
    pub fn is_running(self) -> bool {
        self == ServiceStatus::Running
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped => write!(f, "stopped"),
            ServiceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A package with available updates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradablePackage {
    /// Package name
    pub name: String,
    /// Current installed version
    pub current_version: String,
    /// Available upgrade version
    pub new_version: String,
    /// Package architecture
    pub arch: Option<String>,
    /// Package repository
    pub repository: Option<String>,
}

impl UpgradablePackage {
    /// Create a new upgradable package
    pub fn new(
        name: impl Into<String>,
        current: impl Into<String>,
        new: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            current_version: current.into(),
            new_version: new.into(),
            arch: None,
            repository: None,
        }
    }

    /// Set architecture
    #[must_use]
    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    /// Set repository
    #[must_use]
    pub fn with_repository(mut self, repo: impl Into<String>) -> Self {
        self.repository = Some(repo.into());
        self
    }
}

/// Result of an update operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    /// Number of packages upgraded
    pub upgraded_count: u32,
    /// Number of packages newly installed
    pub new_count: u32,
    /// Number of packages removed
    pub removed_count: u32,
    /// Whether a reboot is required
    pub reboot_required: bool,
    /// Packages the update was restricted to; empty for a full update
    pub packages: Vec<String>,
}

impl UpdateResult {
    /// Create a result with only the upgrade count set
    #[must_use]
    pub fn upgraded(count: u32) -> Self {
        Self {
            upgraded_count: count,
            ..Self::default()
        }
    }

    /// Record the packages the update was restricted to
    #[must_use]
    pub fn with_packages(mut self, packages: &[String]) -> Self {
        self.packages = packages.to_vec();
        self
    }
}
