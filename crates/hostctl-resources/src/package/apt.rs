//! APT package manager (Debian/Ubuntu)

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

const LIST_INSTALLED: [&str; 3] = ["dpkg-query", "-W", "-f=${Package}\\n"];
const REMOVE: [&str; 3] = ["apt-get", "remove", "-y"];

/// APT package manager implementation
#[derive(Debug, Clone)]
pub struct AptManager {
    runner: Runner,
}

impl AptManager {
    /// Create a new APT manager
    ///
    /// # Arguments
    /// * `executor` - Remote executor for running apt commands
    /// * `use_sudo` - Whether to prefix commands with sudo
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }

    /// Refresh package lists
    async fn refresh(&self) -> Result<(), ResourceError> {
        transact(
            &self.runner,
            "*",
            "refresh",
            with_args(&["apt-get", "update", "-qq"], &[]),
        )
        .await?;
        Ok(())
    }

    /// Parse apt list --upgradable output
    fn parse_upgradable(output: &str) -> Vec<UpgradablePackage> {
        let mut packages = Vec::new();

        for line in output.lines() {
            // Skip header lines and empty lines
            if line.is_empty() || line.starts_with("Listing") || line.starts_with("WARNING") {
                continue;
            }

            // Parse: package/suite version arch [upgradable from: oldversion]
            // Example: vim/stable 2:9.0.1378-2+deb12u1 amd64 [upgradable from: 2:9.0.1378-2]
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                let name_suite = parts[0];
                let new_version = parts[1];

                let (name, suite) = match name_suite.split_once('/') {
                    Some((name, suite)) => (name, Some(suite)),
                    None => (name_suite, None),
                };

                // Extract old version from [...]
                let current_version = line
                    .split_once("[upgradable from: ")
                    .and_then(|(_, rest)| rest.split_once(']'))
                    .map_or("unknown", |(version, _)| version);

                let mut pkg = UpgradablePackage::new(name, current_version, new_version);
                if let Some(arch) = parts.get(2) {
                    pkg = pkg.with_arch(*arch);
                }
                if let Some(suite) = suite {
                    pkg = pkg.with_repository(suite);
                }
                packages.push(pkg);
            }
        }

        packages
    }

    /// Parse the "X upgraded, Y newly installed, Z to remove" summary
    fn parse_upgrade_output(output: &str) -> UpdateResult {
        let mut result = UpdateResult::default();

        for line in output.lines().filter(|l| l.contains("upgraded,")) {
            for part in line.split(',').map(str::trim) {
                if let Some(n) = part.find(" upgraded")
                    && let Ok(num) = part[..n].trim().parse::<u32>()
                {
                    result.upgraded_count = num;
                }
                if let Some(n) = part.find(" newly installed")
                    && let Ok(num) = part[..n].trim().parse::<u32>()
                {
                    result.new_count = num;
                }
                if let Some(n) = part.find(" to remove")
                    && let Ok(num) = part[..n].trim().parse::<u32>()
                {
                    result.removed_count = num;
                }
            }
        }

        result
    }
}

#[async_trait]
impl PackageManager for AptManager {
    async fn is_installed(&self, package: &str) -> Result<bool, ResourceError> {
        self.runner
            .test(self.runner.argv(["dpkg", "-s", package]))
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
            with_args(&["apt-get", "install", "-y"], &[package.to_string()]),
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
            with_args(&REMOVE, &[package.to_string()]),
        )
        .await?;
        info!(package, "package removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_matching(&self, pattern: &str) -> Result<(), ResourceError> {
        let script = remove_matching_script(&LIST_INSTALLED, pattern, &REMOVE);
        let result = self.runner.run(self.runner.script(script)).await?;
        if !result.success() {
            return Err(failure(pattern, "remove", result));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update(&self, packages: &[String]) -> Result<UpdateResult, ResourceError> {
        info!("starting apt upgrade");
        self.refresh().await?;

        let (label, argv) = if packages.is_empty() {
            ("*".to_string(), with_args(&["apt-get", "upgrade", "-y"], &[]))
        } else {
            (
                packages.join(" "),
                with_args(&["apt-get", "install", "--only-upgrade", "-y"], packages),
            )
        };
        let result = transact(&self.runner, &label, "update", argv).await?;

        let mut update_result =
            Self::parse_upgrade_output(&result.combined_output()).with_packages(packages);
        update_result.reboot_required = self.reboot_required().await.unwrap_or(false);

        info!(
            upgraded = update_result.upgraded_count,
            reboot_required = update_result.reboot_required,
            "apt upgrade completed"
        );

        Ok(update_result)
    }

    async fn list_installed(&self) -> Result<Vec<String>, ResourceError> {
        let result = transact(
            &self.runner,
            "*",
            "list",
            with_args(&LIST_INSTALLED, &[]),
        )
        .await?;
        Ok(parse_names(&result.stdout))
    }

    #[instrument(skip(self))]
    async fn list_upgradable(&self) -> Result<Vec<UpgradablePackage>, ResourceError> {
        debug!("listing upgradable packages");
        self.refresh().await?;

        let result = transact(
            &self.runner,
            "*",
            "list",
            with_args(&["apt", "list", "--upgradable"], &[]),
        )
        .await?;

        let packages = Self::parse_upgradable(&result.stdout);
        info!(count = packages.len(), "found upgradable packages");

        Ok(packages)
    }

    async fn reboot_required(&self) -> Result<bool, ResourceError> {
        // Debian/Ubuntu standard marker
        self.runner
            .test(self.runner.argv(["test", "-f", "/var/run/reboot-required"]))
            .await
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Apt
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    fn apt(fake: &FakeRemote, sudo: bool) -> AptManager {
        AptManager::new(Arc::new(fake.clone()), sudo)
    }

    #[test]
    fn test_parse_upgradable() {
        let output = r"Listing... Done
vim/now 2:8.2.2434-3+deb11u1 amd64 [upgradable from: 2:8.2.2434-3]
curl/stable 7.74.0-1.3+deb11u14 amd64 [upgradable from: 7.74.0-1.3+deb11u7]";

        let packages = AptManager::parse_upgradable(output);

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "vim");
        assert_eq!(packages[0].new_version, "2:8.2.2434-3+deb11u1");
        assert_eq!(packages[0].current_version, "2:8.2.2434-3");
        assert_eq!(packages[1].arch.as_deref(), Some("amd64"));
        assert_eq!(packages[1].repository.as_deref(), Some("stable"));
    }

    #[test]
    fn test_parse_upgrade_output() {
        let output = "5 upgraded, 2 newly installed, 1 to remove and 0 not upgraded.";

        let result = AptManager::parse_upgrade_output(output);

        assert_eq!(result.upgraded_count, 5);
        assert_eq!(result.new_count, 2);
        assert_eq!(result.removed_count, 1);
    }

    #[tokio::test]
    async fn test_install_skips_installed_package() {
        let fake = FakeRemote::new().respond("dpkg -s vim", 0, "Status: install ok installed\n", "");

        apt(&fake, false).install("vim").await.unwrap();
        assert_eq!(fake.issued(), ["dpkg -s vim"]);
    }

    #[tokio::test]
    async fn test_install_new_package_with_sudo() {
        let fake = FakeRemote::new()
            .respond("sudo dpkg -s htop", 1, "", "package 'htop' is not installed")
            .respond("sudo apt-get install -y htop", 0, "", "");

        apt(&fake, true).install("htop").await.unwrap();
        assert_eq!(fake.count("sudo apt-get install -y htop"), 1);
    }

    #[tokio::test]
    async fn test_install_missing_package_fails() {
        let fake = FakeRemote::new()
            .respond("dpkg -s nope", 1, "", "")
            .respond("apt-get install -y nope", 100, "", "E: Unable to locate package nope\n");

        let err = apt(&fake, false).install("nope").await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::PackageOperation { status: 100, ref action, .. } if action == "install"
        ));
    }

    #[tokio::test]
    async fn test_remove_matching() {
        let cmd = "dpkg-query -W '-f=${Package}\\n' | grep -E 'p-installed-(1|2)' | xargs -r apt-get remove -y";
        let fake = FakeRemote::new().respond(cmd, 0, "", "");

        apt(&fake, false)
            .remove_matching("p-installed-(1|2)")
            .await
            .unwrap();
        assert_eq!(fake.issued(), [cmd]);
    }

    #[tokio::test]
    async fn test_list_installed() {
        let fake = FakeRemote::new().respond(
            "dpkg-query -W '-f=${Package}\\n'",
            0,
            "p-installed-1\np-installed-2\np-installed-3\n",
            "",
        );

        let list = apt(&fake, false).list_installed().await.unwrap();
        assert_eq!(list, ["p-installed-1", "p-installed-2", "p-installed-3"]);
    }

    #[tokio::test]
    async fn test_update_selected_packages() {
        let fake = FakeRemote::new()
            .respond("apt-get update -qq", 0, "", "")
            .respond(
                "apt-get install --only-upgrade -y curl",
                0,
                "1 upgraded, 0 newly installed, 0 to remove and 3 not upgraded.\n",
                "",
            )
            .respond("test -f /var/run/reboot-required", 1, "", "");

        let result = apt(&fake, false)
            .update(&["curl".to_string()])
            .await
            .unwrap();
        assert_eq!(result.upgraded_count, 1);
        assert_eq!(result.packages, ["curl"]);
        assert!(!result.reboot_required);
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let fake = FakeRemote::new().respond(
            "apt-get update -qq",
            100,
            "",
            "E: Could not get lock /var/lib/apt/lists/lock",
        );

        let err = apt(&fake, false).update(&[]).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
