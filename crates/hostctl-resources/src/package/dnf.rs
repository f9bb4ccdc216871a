//! DNF and YUM package managers (Fedora/RHEL/CentOS)

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

/// `check-update` exit status when updates are available
const UPDATES_AVAILABLE: i32 = 100;

/// DNF package manager implementation
///
/// The same command set drives `yum`, which is selected with
/// [`DnfManager::yum`].
#[derive(Debug, Clone)]
pub struct DnfManager {
    runner: Runner,
    /// Whether to use yum instead of dnf
    use_yum: bool,
}

impl DnfManager {
    /// Create a new DNF manager
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
            use_yum: false,
        }
    }

    /// Create a manager driving `yum`
    pub fn yum(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
            use_yum: true,
        }
    }

    fn tool(&self) -> &'static str {
        if self.use_yum { "yum" } else { "dnf" }
    }

    /// Tool invocation followed by `args`
    fn pkg_cmd(&self, args: &[&str], packages: &[String]) -> Vec<String> {
        let mut argv = vec![self.tool()];
        argv.extend_from_slice(args);
        with_args(&argv, packages)
    }

    /// Parse dnf check-update output
    fn parse_upgradable(output: &str) -> Vec<UpgradablePackage> {
        let mut packages = Vec::new();

        for line in output.lines() {
            // Skip empty lines and headers
            if line.is_empty()
                || line.starts_with("Last metadata")
                || line.starts_with("Obsoleting")
                || line.starts_with(' ')
            {
                continue;
            }

            // Parse: name.arch version repository
            // Example: vim-enhanced.x86_64 2:8.2.2637-20.el9_1 baseos
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                let name_arch = parts[0];
                let new_version = parts[1];
                let repository = parts[2];

                let (name, arch) = match name_arch.rsplit_once('.') {
                    Some((name, arch)) => (name, Some(arch)),
                    None => (name_arch, None),
                };

                // check-update doesn't show the installed version
                let mut pkg = UpgradablePackage::new(name, "unknown", new_version);
                if let Some(a) = arch {
                    pkg = pkg.with_arch(a);
                }
                pkg = pkg.with_repository(repository);
                packages.push(pkg);
            }
        }

        packages
    }

    /// Parse the transaction summary ("Upgrade  3 Packages")
    fn parse_update_output(output: &str) -> UpdateResult {
        let mut result = UpdateResult::default();

        for line in output.lines() {
            let mut words = line.split_whitespace();
            let (Some(verb), Some(count)) = (words.next(), words.next()) else {
                continue;
            };
            let Ok(count) = count.parse::<u32>() else {
                continue;
            };
            match verb {
                "Upgrade" | "Update" => result.upgraded_count = count,
                "Install" => result.new_count = count,
                "Remove" | "Erase" => result.removed_count = count,
                _ => {}
            }
        }

        result
    }
}

#[async_trait]
impl PackageManager for DnfManager {
    async fn is_installed(&self, package: &str) -> Result<bool, ResourceError> {
        self.runner
            .test(self.runner.argv(["rpm", "-q", package]))
            .await
    }

    #[instrument(skip(self), fields(tool = self.tool()))]
    async fn install(&self, package: &str) -> Result<(), ResourceError> {
        if self.is_installed(package).await? {
            debug!(package, "already installed");
            return Ok(());
        }
        let argv = self.pkg_cmd(&["install", "-y"], &[package.to_string()]);
        transact(&self.runner, package, "install", argv).await?;
        info!(package, "package installed");
        Ok(())
    }

    #[instrument(skip(self), fields(tool = self.tool()))]
    async fn remove(&self, package: &str) -> Result<(), ResourceError> {
        let argv = self.pkg_cmd(&["remove", "-y"], &[package.to_string()]);
        transact(&self.runner, package, "remove", argv).await?;
        info!(package, "package removed");
        Ok(())
    }

    #[instrument(skip(self), fields(tool = self.tool()))]
    async fn remove_matching(&self, pattern: &str) -> Result<(), ResourceError> {
        let script =
            remove_matching_script(&LIST_INSTALLED, pattern, &[self.tool(), "remove", "-y"]);
        let result = self.runner.run(self.runner.script(script)).await?;
        if !result.success() {
            return Err(failure(pattern, "remove", result));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tool = self.tool()))]
    async fn update(&self, packages: &[String]) -> Result<UpdateResult, ResourceError> {
        info!("starting update");

        let label = if packages.is_empty() {
            "*".to_string()
        } else {
            packages.join(" ")
        };
        let argv = self.pkg_cmd(&["update", "-y"], packages);
        let result = transact(&self.runner, &label, "update", argv).await?;

        let mut update_result = Self::parse_update_output(&result.stdout).with_packages(packages);
        update_result.reboot_required = self.reboot_required().await.unwrap_or(false);

        info!(
            upgraded = update_result.upgraded_count,
            reboot_required = update_result.reboot_required,
            "update completed"
        );

        Ok(update_result)
    }

    async fn list_installed(&self) -> Result<Vec<String>, ResourceError> {
        let result = transact(&self.runner, "*", "list", with_args(&LIST_INSTALLED, &[])).await?;
        Ok(parse_names(&result.stdout))
    }

    #[instrument(skip(self), fields(tool = self.tool()))]
    async fn list_upgradable(&self) -> Result<Vec<UpgradablePackage>, ResourceError> {
        debug!("listing upgradable packages");

        // check-update exits 100 when updates are available, 0 when none
        let request = self
            .runner
            .argv(self.pkg_cmd(&["check-update"], &[]))
            .with_expected_codes([0, UPDATES_AVAILABLE]);
        let result = self.runner.run(request).await?;
        if !result.success() {
            return Err(failure("*", "check-update", result));
        }

        let packages = Self::parse_upgradable(&result.stdout);
        info!(count = packages.len(), "found upgradable packages");

        Ok(packages)
    }

    async fn reboot_required(&self) -> Result<bool, ResourceError> {
        // needs-restarting -r exits 1 if reboot required, 0 if not
        let result = self
            .runner
            .run(self.runner.argv(["needs-restarting", "-r"]))
            .await?;
        match result.status {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ResourceError::CommandFailed {
                command: result.command,
                status: result.status,
                stderr: result.stderr,
            }),
        }
    }

    fn strategy(&self) -> StrategyKind {
        if self.use_yum {
            StrategyKind::Yum
        } else {
            StrategyKind::Dnf
        }
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    #[test]
    fn test_parse_upgradable() {
        let output = r"Last metadata expiration check: 0:05:31 ago.
vim-enhanced.x86_64 2:8.2.2637-20.el9_1 baseos
curl.x86_64         7.76.1-26.el9_0 baseos";

        let packages = DnfManager::parse_upgradable(output);

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "vim-enhanced");
        assert_eq!(packages[0].new_version, "2:8.2.2637-20.el9_1");
        assert_eq!(packages[1].arch.as_deref(), Some("x86_64"));
    }

    #[test]
    fn test_parse_update_output() {
        let output = "Transaction Summary\n\
            ================\n\
            Install   1 Package\n\
            Upgrade  12 Packages\n\
            \n\
            Complete!\n";

        let result = DnfManager::parse_update_output(output);
        assert_eq!(result.upgraded_count, 12);
        assert_eq!(result.new_count, 1);
        assert_eq!(result.removed_count, 0);
    }

    #[tokio::test]
    async fn test_yum_commands() {
        let fake = FakeRemote::new()
            .respond("rpm -q p-not-installed", 1, "", "")
            .respond("yum install -y p-not-installed", 0, "Complete!\n", "")
            .respond("yum remove -y p-installed-1", 0, "", "");
        let yum = DnfManager::yum(Arc::new(fake.clone()), false);

        yum.install("p-not-installed").await.unwrap();
        yum.remove("p-installed-1").await.unwrap();
        assert_eq!(yum.strategy(), StrategyKind::Yum);
        assert_eq!(
            fake.issued(),
            [
                "rpm -q p-not-installed",
                "yum install -y p-not-installed",
                "yum remove -y p-installed-1"
            ]
        );
    }

    #[tokio::test]
    async fn test_check_update_exit_100() {
        let fake = FakeRemote::new().respond(
            "sudo dnf check-update",
            100,
            "curl.x86_64 7.76.1-26.el9_0 baseos\n",
            "",
        );
        let dnf = DnfManager::new(Arc::new(fake), true);

        let packages = dnf.list_upgradable().await.unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "curl");
    }

    #[tokio::test]
    async fn test_update_all() {
        let fake = FakeRemote::new()
            .respond("dnf update -y", 0, "Upgrade  3 Packages\nComplete!\n", "")
            .respond("needs-restarting -r", 1, "Reboot is required\n", "");
        let dnf = DnfManager::new(Arc::new(fake), false);

        let result = dnf.update(&[]).await.unwrap();
        assert_eq!(result.upgraded_count, 3);
        assert!(result.reboot_required);
        assert!(result.packages.is_empty());
    }

    #[tokio::test]
    async fn test_remove_matching_with_sudo() {
        let fake = FakeRemote::new();
        let dnf = DnfManager::new(Arc::new(fake.clone()), true);
        let inner = "rpm -qa '--queryformat=%{NAME}\\n' | grep -E 'p-installed-(1|2)' | xargs -r dnf remove -y";
        fake.set(&format!("sudo sh -c {}", hostctl_exec::shell::quote(inner)), 0, "", "");

        dnf.remove_matching("p-installed-(1|2)").await.unwrap();
    }
}
