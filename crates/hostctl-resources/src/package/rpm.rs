//! Bare rpm, for hosts without a resolving front end

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_exec::RemoteExecutor;
use tracing::{debug, info, instrument};

use super::{failure, parse_names, remove_matching_script, transact, with_args};
use crate::capability::StrategyKind;
use crate::error::ResourceError;
use crate::runner::Runner;
use crate::traits::PackageManager;
use crate::types::{UpdateResult, UpgradablePackage};

const LIST_INSTALLED: [&str; 3] = ["rpm", "-qa", "--queryformat=%{NAME}\\n"];

/// rpm package manager
///
/// `install` and `update` take package file paths or URLs, since rpm has no
/// repositories to resolve names against.
#[derive(Debug, Clone)]
pub struct RpmManager {
    runner: Runner,
}

impl RpmManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }
}

#[async_trait]
impl PackageManager for RpmManager {
    async fn is_installed(&self, package: &str) -> Result<bool, ResourceError> {
        self.runner
            .test(self.runner.argv(["rpm", "-q", package]))
            .await
    }

    #[instrument(skip(self))]
    async fn install(&self, package: &str) -> Result<(), ResourceError> {
        if self.is_installed(package).await? {
            debug!(package, "already installed");
            return Ok(());
        }
        transact(
            &self.runner,
            package,
            "install",
            with_args(&["rpm", "-i"], &[package.to_string()]),
        )
        .await?;
        info!(package, "package installed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, package: &str) -> Result<(), ResourceError> {
        transact(
            &self.runner,
            package,
            "remove",
            with_args(&["rpm", "-e"], &[package.to_string()]),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_matching(&self, pattern: &str) -> Result<(), ResourceError> {
        let script = remove_matching_script(&LIST_INSTALLED, pattern, &["rpm", "-e"]);
        let result = self.runner.run(self.runner.script(script)).await?;
        if !result.success() {
            return Err(failure(pattern, "remove", result));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update(&self, packages: &[String]) -> Result<UpdateResult, ResourceError> {
        if packages.is_empty() {
            return Err(ResourceError::Unsupported(
                "rpm cannot update without package files".into(),
            ));
        }
        transact(
            &self.runner,
            &packages.join(" "),
            "update",
            with_args(&["rpm", "-U"], packages),
        )
        .await?;
        let count = u32::try_from(packages.len()).unwrap_or(u32::MAX);
        Ok(UpdateResult::upgraded(count).with_packages(packages))
    }

    async fn list_installed(&self) -> Result<Vec<String>, ResourceError> {
        let result = transact(&self.runner, "*", "list", with_args(&LIST_INSTALLED, &[])).await?;
        Ok(parse_names(&result.stdout))
    }

    async fn list_upgradable(&self) -> Result<Vec<UpgradablePackage>, ResourceError> {
        Err(ResourceError::Unsupported(
            "rpm has no repositories to list upgrades from".into(),
        ))
    }

    async fn reboot_required(&self) -> Result<bool, ResourceError> {
        Err(ResourceError::Unsupported(
            "rpm cannot tell whether a reboot is required".into(),
        ))
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Rpm
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    #[tokio::test]
    async fn test_install_remove() {
        let fake = FakeRemote::new()
            .respond("rpm -q p-installed-1", 0, "p-installed-1-1.0-1.x86_64\n", "")
            .respond("rpm -e p-installed-1", 0, "", "");
        let rpm = RpmManager::new(Arc::new(fake.clone()), false);

        rpm.install("p-installed-1").await.unwrap();
        rpm.remove("p-installed-1").await.unwrap();
        assert_eq!(fake.issued(), ["rpm -q p-installed-1", "rpm -e p-installed-1"]);
    }

    #[tokio::test]
    async fn test_update_requires_packages() {
        let rpm = RpmManager::new(Arc::new(FakeRemote::new()), false);
        assert!(rpm.update(&[]).await.unwrap_err().is_unsupported());
        assert!(rpm.list_upgradable().await.unwrap_err().is_unsupported());
    }

    #[tokio::test]
    async fn test_update_with_files() {
        let fake = FakeRemote::new().respond("rpm -U /tmp/a.rpm /tmp/b.rpm", 0, "", "");
        let rpm = RpmManager::new(Arc::new(fake), false);

        let result = rpm
            .update(&["/tmp/a.rpm".into(), "/tmp/b.rpm".into()])
            .await
            .unwrap();
        assert_eq!(result.upgraded_count, 2);
    }
}
