//! Capability interfaces

use std::path::Path;

use async_trait::async_trait;
use hostctl_exec::TransferReport;

use crate::capability::StrategyKind;
use crate::error::ResourceError;
use crate::types::{ServiceStatus, UpdateResult, UpgradablePackage};

type Result<T> = std::result::Result<T, ResourceError>;

/// Service control
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Whether the service is running
    async fn status(&self, name: &str) -> Result<ServiceStatus>;
    async fn start(&self, name: &str) -> Result<()>;
    async fn stop(&self, name: &str) -> Result<()>;
    async fn restart(&self, name: &str) -> Result<()>;
    /// Whether the service starts at boot
    async fn is_enabled(&self, name: &str) -> Result<bool>;
    async fn enable(&self, name: &str) -> Result<()>;
    async fn disable(&self, name: &str) -> Result<()>;
    fn strategy(&self) -> StrategyKind;
}

/// Package installation and queries
#[async_trait]
pub trait PackageManager: Send + Sync {
    async fn is_installed(&self, package: &str) -> Result<bool>;
    /// Install a package; succeeds without a transaction if already present
    async fn install(&self, package: &str) -> Result<()>;
    async fn remove(&self, package: &str) -> Result<()>;
    /// Remove every installed package whose name matches an extended regex
    async fn remove_matching(&self, pattern: &str) -> Result<()>;
    /// Update the given packages, or everything when `packages` is empty
    async fn update(&self, packages: &[String]) -> Result<UpdateResult>;
    async fn list_installed(&self) -> Result<Vec<String>>;
    async fn list_upgradable(&self) -> Result<Vec<UpgradablePackage>>;
    async fn reboot_required(&self) -> Result<bool>;
    fn strategy(&self) -> StrategyKind;
}

/// Remote filesystem access
#[async_trait]
pub trait FilesystemManager: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn is_file(&self, path: &str) -> Result<bool>;
    async fn is_dir(&self, path: &str) -> Result<bool>;
    async fn is_executable(&self, path: &str) -> Result<bool>;
    /// Remove a file; removing a missing file succeeds
    async fn remove(&self, path: &str) -> Result<()>;
    /// Remove a directory tree; refuses `/`
    async fn rmdir(&self, path: &str) -> Result<()>;
    /// Entry names in a directory, hidden ones included
    async fn listdir(&self, path: &str) -> Result<Vec<String>>;
    async fn touch(&self, path: &str) -> Result<()>;
    async fn read_file(&self, path: &str) -> Result<String>;
    /// Create or replace a file with `content`
    async fn create_file(&self, content: &str, path: &str) -> Result<()>;
    /// Create an executable file with `content`
    async fn create_script(&self, content: &str, path: &str) -> Result<()>;
    /// Create a directory; `mode` is octal, e.g. "0755"
    async fn mkdir(&self, path: &str, parents: bool, mode: Option<&str>) -> Result<()>;
    /// Change ownership; `owner` may be `user` or `user:group`
    async fn chown(&self, path: &str, owner: &str, recursive: bool) -> Result<()>;
    async fn chmod(&self, path: &str, mode: &str) -> Result<()>;
    async fn move_path(&self, source: &str, destination: &str) -> Result<()>;
    /// Truncate a file to zero length
    async fn flush_file(&self, path: &str) -> Result<()>;
    /// Create a temporary directory and return its path
    async fn mktemp_dir(&self) -> Result<String>;
    /// Upload a local file
    async fn put(&self, local: &Path, remote: &str) -> Result<TransferReport>;
    /// Download to a local file, returning the byte count
    async fn get(&self, remote: &str, local: &Path) -> Result<u64>;
    /// Download `url` into `dir` on the host, returning the file's path
    async fn wget(&self, url: &str, dir: &str) -> Result<String>;
    fn strategy(&self) -> StrategyKind;
}

/// Network configuration queries
#[async_trait]
pub trait NetworkManager: Send + Sync {
    async fn hostname(&self) -> Result<String>;
    async fn set_hostname(&self, name: &str) -> Result<()>;
    /// Interface names
    async fn interfaces(&self) -> Result<Vec<String>>;
    /// Addresses in CIDR notation assigned to `interface`
    async fn addresses(&self, interface: &str) -> Result<Vec<String>>;
    async fn default_gateway(&self) -> Result<Option<String>>;
    fn strategy(&self) -> StrategyKind;
}

/// Local account management
#[async_trait]
pub trait UserManager: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;
    /// Create a user with a home directory
    async fn create(&self, name: &str) -> Result<()>;
    /// Remove a user and their home directory
    async fn remove(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
    /// Group names the user belongs to
    async fn groups(&self, name: &str) -> Result<Vec<String>>;
    fn strategy(&self) -> StrategyKind;
}
