//! Service strategies: systemd, SysV init and Upstart

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_exec::{CommandRequest, RemoteExecutor, shell};
use tracing::{info, instrument};

use crate::capability::StrategyKind;
use crate::error::ResourceError;
use crate::runner::Runner;
use crate::traits::ServiceManager;
use crate::types::ServiceStatus;

/// LSB exit status of `service <name> status` for a stopped service
const LSB_NOT_RUNNING: i32 = 3;

/// Run a control command, mapping failure to `ServiceOperation`
async fn control(
    runner: &Runner,
    service: &str,
    action: &str,
    request: CommandRequest,
) -> Result<(), ResourceError> {
    let result = runner.run(request).await?;
    if !result.success() {
        return Err(ResourceError::ServiceOperation {
            service: service.to_string(),
            action: action.to_string(),
            status: result.status,
            stderr: result.stderr.trim().to_string(),
        });
    }
    info!(service, action, "service action completed");
    Ok(())
}

/// systemd via `systemctl`
#[derive(Debug, Clone)]
pub struct Systemd {
    runner: Runner,
}

impl Systemd {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }

    async fn systemctl(&self, action: &str, name: &str) -> Result<(), ResourceError> {
        let request = self.runner.argv(["systemctl", action, name]);
        control(&self.runner, name, action, request).await
    }
}

#[async_trait]
impl ServiceManager for Systemd {
    #[instrument(skip(self))]
    async fn status(&self, name: &str) -> Result<ServiceStatus, ResourceError> {
        let result = self
            .runner
            .run(self.runner.argv(["systemctl", "is-active", name]))
            .await?;
        // is-active exits non-zero for every state but active
        Ok(if result.stdout == "active\n" {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        })
    }

    async fn start(&self, name: &str) -> Result<(), ResourceError> {
        self.systemctl("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<(), ResourceError> {
        self.systemctl("stop", name).await
    }

    async fn restart(&self, name: &str) -> Result<(), ResourceError> {
        self.systemctl("restart", name).await
    }

    async fn is_enabled(&self, name: &str) -> Result<bool, ResourceError> {
        self.runner
            .test(self.runner.argv(["systemctl", "is-enabled", name]))
            .await
    }

    async fn enable(&self, name: &str) -> Result<(), ResourceError> {
        self.systemctl("enable", name).await
    }

    async fn disable(&self, name: &str) -> Result<(), ResourceError> {
        self.systemctl("disable", name).await
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Systemd
    }
}

/// SysV init scripts via `service` and `chkconfig`
#[derive(Debug, Clone)]
pub struct SysVinit {
    runner: Runner,
}

impl SysVinit {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }

    async fn service(&self, action: &str, name: &str) -> Result<(), ResourceError> {
        let request = self.runner.argv(["service", name, action]);
        control(&self.runner, name, action, request).await
    }

    async fn chkconfig(&self, action: &str, name: &str, state: &str) -> Result<(), ResourceError> {
        let request = self.runner.argv(["chkconfig", name, state]);
        control(&self.runner, name, action, request).await
    }
}

#[async_trait]
impl ServiceManager for SysVinit {
    #[instrument(skip(self))]
    async fn status(&self, name: &str) -> Result<ServiceStatus, ResourceError> {
        let result = self
            .runner
            .run(self.runner.argv(["service", name, "status"]))
            .await?;
        Ok(match result.status {
            0 => ServiceStatus::Running,
            LSB_NOT_RUNNING => ServiceStatus::Stopped,
            _ => ServiceStatus::Unknown,
        })
    }

    async fn start(&self, name: &str) -> Result<(), ResourceError> {
        self.service("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<(), ResourceError> {
        self.service("stop", name).await
    }

    async fn restart(&self, name: &str) -> Result<(), ResourceError> {
        self.service("restart", name).await
    }

    async fn is_enabled(&self, name: &str) -> Result<bool, ResourceError> {
        self.runner.test(self.runner.argv(["chkconfig", name])).await
    }

    async fn enable(&self, name: &str) -> Result<(), ResourceError> {
        self.chkconfig("enable", name, "on").await
    }

    async fn disable(&self, name: &str) -> Result<(), ResourceError> {
        self.chkconfig("disable", name, "off").await
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::SysVinit
    }
}

/// Upstart via `initctl`
///
/// Upstart jobs start according to their `start on` stanza; there is no
/// enable/disable switch to flip.
#[derive(Debug, Clone)]
pub struct Upstart {
    runner: Runner,
}

impl Upstart {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }

    async fn initctl(&self, action: &str, name: &str) -> Result<(), ResourceError> {
        let request = self.runner.argv(["initctl", action, name]);
        control(&self.runner, name, action, request).await
    }
}

#[async_trait]
impl ServiceManager for Upstart {
    #[instrument(skip(self))]
    async fn status(&self, name: &str) -> Result<ServiceStatus, ResourceError> {
        let result = self
            .runner
            .run(self.runner.argv(["initctl", "status", name]))
            .await?;
        Ok(if result.stdout.contains("start/running") {
            ServiceStatus::Running
        } else if result.stdout.contains("stop/waiting") {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::Unknown
        })
    }

    async fn start(&self, name: &str) -> Result<(), ResourceError> {
        self.initctl("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<(), ResourceError> {
        self.initctl("stop", name).await
    }

    async fn restart(&self, name: &str) -> Result<(), ResourceError> {
        self.initctl("restart", name).await
    }

    async fn is_enabled(&self, name: &str) -> Result<bool, ResourceError> {
        let conf = format!("/etc/init/{name}.conf");
        let overridden = format!("/etc/init/{name}.override");
        self.runner
            .test(self.runner.script(format!(
                "test -f {} && ! grep -qs '^manual' {}",
                shell::quote(&conf),
                shell::quote(&overridden)
            )))
            .await
    }

    async fn enable(&self, name: &str) -> Result<(), ResourceError> {
        Err(ResourceError::Unsupported(format!(
            "upstart cannot enable {name}"
        )))
    }

    async fn disable(&self, name: &str) -> Result<(), ResourceError> {
        Err(ResourceError::Unsupported(format!(
            "upstart cannot disable {name}"
        )))
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Upstart
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    fn systemd(fake: &FakeRemote, sudo: bool) -> Systemd {
        Systemd::new(Arc::new(fake.clone()), sudo)
    }

    #[tokio::test]
    async fn test_systemd_status() {
        let fake = FakeRemote::new().respond("systemctl is-active sshd", 0, "active\n", "");
        assert_eq!(
            systemd(&fake, false).status("sshd").await.unwrap(),
            ServiceStatus::Running
        );
        assert_eq!(fake.issued(), ["systemctl is-active sshd"]);

        fake.set("systemctl is-active sshd", 3, "inactive\n", "");
        assert_eq!(
            systemd(&fake, false).status("sshd").await.unwrap(),
            ServiceStatus::Stopped
        );

        fake.set("systemctl is-active sshd", 3, "failed\n", "");
        assert_eq!(
            systemd(&fake, false).status("sshd").await.unwrap(),
            ServiceStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_systemd_start_failure() {
        let fake = FakeRemote::new().respond(
            "sudo systemctl start nginx",
            5,
            "",
            "Unit nginx.service not found.\n",
        );
        let err = systemd(&fake, true).start("nginx").await.unwrap_err();
        assert_eq!(
            err,
            ResourceError::ServiceOperation {
                service: "nginx".into(),
                action: "start".into(),
                status: 5,
                stderr: "Unit nginx.service not found.".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_systemd_enable() {
        let fake = FakeRemote::new()
            .respond("systemctl enable sshd", 0, "", "")
            .respond("systemctl is-enabled sshd", 0, "enabled\n", "");
        let svc = systemd(&fake, false);
        svc.enable("sshd").await.unwrap();
        assert!(svc.is_enabled("sshd").await.unwrap());
    }

    #[tokio::test]
    async fn test_sysv_status_codes() {
        let fake = FakeRemote::new()
            .respond("service ntpd status", 0, "ntpd is running\n", "")
            .respond("service httpd status", 3, "httpd is stopped\n", "");
        let svc = SysVinit::new(Arc::new(fake.clone()), false);

        assert_eq!(svc.status("ntpd").await.unwrap(), ServiceStatus::Running);
        assert_eq!(svc.status("httpd").await.unwrap(), ServiceStatus::Stopped);
        assert_eq!(svc.status("nope").await.unwrap(), ServiceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_sysv_enable_uses_chkconfig() {
        let fake = FakeRemote::new().respond("chkconfig ntpd on", 0, "", "");
        SysVinit::new(Arc::new(fake.clone()), false)
            .enable("ntpd")
            .await
            .unwrap();
        assert_eq!(fake.issued(), ["chkconfig ntpd on"]);
    }

    #[tokio::test]
    async fn test_upstart() {
        let fake = FakeRemote::new()
            .respond("initctl status ssh", 0, "ssh start/running, process 812\n", "");
        let svc = Upstart::new(Arc::new(fake.clone()), false);

        assert_eq!(svc.status("ssh").await.unwrap(), ServiceStatus::Running);
        assert!(svc.enable("ssh").await.unwrap_err().is_unsupported());
        assert!(svc.disable("ssh").await.unwrap_err().is_unsupported());
        // Nothing was sent for the unsupported operations
        assert_eq!(fake.issued().len(), 1);
    }
}
