//! Capability x classification -> strategy dispatch table

use std::sync::Arc;

use hostctl_exec::RemoteExecutor;
use hostctl_os::{Classification, InitSystem, PackageManagerKind};
use tracing::debug;

use crate::capability::{Capability, StrategyKind};
use crate::error::ResourceError;
use crate::filesystem::PosixFilesystem;
use crate::network::Iproute2;
use crate::package::{AptManager, DnfManager, RpmManager};
use crate::service::{SysVinit, Systemd, Upstart};
use crate::traits::{
    FilesystemManager, NetworkManager, PackageManager, ServiceManager, UserManager,
};
use crate::users::Shadow;

/// Which classifications a dispatch row applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Exactly this init system
    Init(InitSystem),
    /// Exactly this package manager
    PackageManager(PackageManagerKind),
    /// Exactly this distribution family
    Family(String),
    /// Every classification
    Any,
}

impl Selector {
    /// Exact match against a classification
    #[must_use]
    pub fn matches(&self, classification: &Classification) -> bool {
        match self {
            Selector::Init(init) => classification.init == Some(*init),
            Selector::PackageManager(kind) => classification.package_manager == Some(*kind),
            Selector::Family(family) => classification.family == *family,
            Selector::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DispatchRow {
    capability: Capability,
    selector: Selector,
    strategy: StrategyKind,
}

/// Ordered dispatch rows; the first matching row wins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTable {
    rows: Vec<DispatchRow>,
}

impl Default for DispatchTable {
    fn default() -> Self {
        use Capability as C;
        use StrategyKind as S;

        let rows = [
            (C::Service, Selector::Init(InitSystem::Systemd), S::Systemd),
            (C::Service, Selector::Init(InitSystem::SysVinit), S::SysVinit),
            (C::Service, Selector::Init(InitSystem::Upstart), S::Upstart),
            (C::Package, Selector::PackageManager(PackageManagerKind::Apt), S::Apt),
            (C::Package, Selector::PackageManager(PackageManagerKind::Dnf), S::Dnf),
            (C::Package, Selector::PackageManager(PackageManagerKind::Yum), S::Yum),
            (C::Package, Selector::PackageManager(PackageManagerKind::Rpm), S::Rpm),
            (C::Filesystem, Selector::Any, S::Posix),
            (C::Network, Selector::Any, S::Iproute2),
            (C::User, Selector::Any, S::Shadow),
        ]
        .into_iter()
        .map(|(capability, selector, strategy)| DispatchRow {
            capability,
            selector,
            strategy,
        })
        .collect();

        Self { rows }
    }
}

impl DispatchTable {
    /// Table with no rows; every lookup fails
    #[must_use]
    pub fn empty() -> Self {
        Self { rows: Vec::new() }
    }

    /// Add a row ahead of the existing ones
    ///
    /// # Errors
    /// Returns `ResourceError::InvalidArgument` if `strategy` does not
    /// implement `capability`
    pub fn prepend(
        &mut self,
        capability: Capability,
        selector: Selector,
        strategy: StrategyKind,
    ) -> Result<(), ResourceError> {
        if strategy.capability() != capability {
            return Err(ResourceError::InvalidArgument(format!(
                "{strategy} does not implement {capability}"
            )));
        }
        self.rows.insert(
            0,
            DispatchRow {
                capability,
                selector,
                strategy,
            },
        );
        Ok(())
    }

    /// Strategy for `capability` on a host classified as `classification`
    ///
    /// # Errors
    /// Returns `ResourceError::Unsupported` when no row matches
    pub fn resolve(
        &self,
        capability: Capability,
        classification: &Classification,
    ) -> Result<StrategyKind, ResourceError> {
        let strategy = self
            .rows
            .iter()
            .find(|row| row.capability == capability && row.selector.matches(classification))
            .map(|row| row.strategy)
            .ok_or_else(|| {
                ResourceError::Unsupported(format!(
                    "no {capability} strategy for {classification}"
                ))
            })?;
        debug!(%capability, %strategy, family = %classification.family, "strategy resolved");
        Ok(strategy)
    }
}

/// A constructed strategy for one capability
#[derive(Clone)]
pub enum ResourceManager {
    Service(Arc<dyn ServiceManager>),
    Package(Arc<dyn PackageManager>),
    Filesystem(Arc<dyn FilesystemManager>),
    Network(Arc<dyn NetworkManager>),
    User(Arc<dyn UserManager>),
}

impl ResourceManager {
    /// Instantiate `strategy` bound to `executor`
    pub fn build(strategy: StrategyKind, executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        match strategy {
            StrategyKind::Systemd => Self::Service(Arc::new(Systemd::new(executor, use_sudo))),
            StrategyKind::SysVinit => Self::Service(Arc::new(SysVinit::new(executor, use_sudo))),
            StrategyKind::Upstart => Self::Service(Arc::new(Upstart::new(executor, use_sudo))),
            StrategyKind::Apt => Self::Package(Arc::new(AptManager::new(executor, use_sudo))),
            StrategyKind::Dnf => Self::Package(Arc::new(DnfManager::new(executor, use_sudo))),
            StrategyKind::Yum => Self::Package(Arc::new(DnfManager::yum(executor, use_sudo))),
            StrategyKind::Rpm => Self::Package(Arc::new(RpmManager::new(executor, use_sudo))),
            StrategyKind::Posix => {
                Self::Filesystem(Arc::new(PosixFilesystem::new(executor, use_sudo)))
            }
            StrategyKind::Iproute2 => Self::Network(Arc::new(Iproute2::new(executor, use_sudo))),
            StrategyKind::Shadow => Self::User(Arc::new(Shadow::new(executor, use_sudo))),
        }
    }

    /// Capability this manager serves
    #[must_use]
    pub fn capability(&self) -> Capability {
        self.strategy().capability()
    }

    /// Concrete strategy
    #[must_use]
    pub fn strategy(&self) -> StrategyKind {
        match self {
            Self::Service(m) => m.strategy(),
            Self::Package(m) => m.strategy(),
            Self::Filesystem(m) => m.strategy(),
            Self::Network(m) => m.strategy(),
            Self::User(m) => m.strategy(),
        }
    }

    fn mismatch(&self, wanted: Capability) -> ResourceError {
        ResourceError::Unsupported(format!(
            "{} manager is not a {wanted} manager",
            self.capability()
        ))
    }

    /// Service view
    ///
    /// # Errors
    /// Returns `ResourceError::Unsupported` for any other capability
    pub fn service(&self) -> Result<Arc<dyn ServiceManager>, ResourceError> {
        match self {
            Self::Service(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(Capability::Service)),
        }
    }

    /// Package view
    ///
    /// # Errors
    /// Returns `ResourceError::Unsupported` for any other capability
    pub fn package(&self) -> Result<Arc<dyn PackageManager>, ResourceError> {
        match self {
            Self::Package(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(Capability::Package)),
        }
    }

    /// Filesystem view
    ///
    /// # Errors
    /// Returns `ResourceError::Unsupported` for any other capability
    pub fn filesystem(&self) -> Result<Arc<dyn FilesystemManager>, ResourceError> {
        match self {
            Self::Filesystem(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(Capability::Filesystem)),
        }
    }

    /// Network view
    ///
    /// # Errors
    /// Returns `ResourceError::Unsupported` for any other capability
    pub fn network(&self) -> Result<Arc<dyn NetworkManager>, ResourceError> {
        match self {
            Self::Network(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(Capability::Network)),
        }
    }

    /// User view
    ///
    /// # Errors
    /// Returns `ResourceError::Unsupported` for any other capability
    pub fn users(&self) -> Result<Arc<dyn UserManager>, ResourceError> {
        match self {
            Self::User(m) => Ok(Arc::clone(m)),
            _ => Err(self.mismatch(Capability::User)),
        }
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("capability", &self.capability())
            .field("strategy", &self.strategy())
            .finish()
    }
}
