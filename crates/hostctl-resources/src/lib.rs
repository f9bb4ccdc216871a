//! hostctl-resources: Resource managers
//!
//! Service, package, filesystem, network and user managers, each with one
//! strategy per supported init system or tool, plus the table that picks a
//! strategy for a classified host.

pub mod capability;
pub mod dispatch;
pub mod error;
pub mod filesystem;
pub mod network;
pub mod package;
mod runner;
pub mod service;
pub mod traits;
pub mod types;
pub mod users;

pub use capability::{Capability, StrategyKind};
pub use dispatch::{DispatchTable, ResourceManager, Selector};
pub use error::ResourceError;
pub use filesystem::PosixFilesystem;
pub use network::Iproute2;
pub use package::{AptManager, DnfManager, RpmManager};
pub use service::{SysVinit, Systemd, Upstart};
pub use traits::{FilesystemManager, NetworkManager, PackageManager, ServiceManager, UserManager};
pub use types::{ServiceStatus, UpdateResult, UpgradablePackage};
pub use users::Shadow;
