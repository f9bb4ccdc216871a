//! shadow-utils user strategy

use std::sync::Arc;

use async_trait::async_trait;
use hostctl_exec::RemoteExecutor;
use tracing::{info, instrument};

use crate::capability::StrategyKind;
use crate::error::ResourceError;
use crate::runner::Runner;
use crate::traits::UserManager;

/// Accounts via `useradd`, `userdel`, `id` and `getent`
#[derive(Debug, Clone)]
pub struct Shadow {
    runner: Runner,
}

impl Shadow {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            runner: Runner::new(executor, use_sudo),
        }
    }
}

#[async_trait]
impl UserManager for Shadow {
    async fn exists(&self, name: &str) -> Result<bool, ResourceError> {
        self.runner.test(self.runner.argv(["id", "-u", name])).await
    }

    #[instrument(skip(self))]
    async fn create(&self, name: &str) -> Result<(), ResourceError> {
        self.runner
            .check(self.runner.argv(["useradd", "-m", name]))
            .await?;
        info!(user = name, "user created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<(), ResourceError> {
        self.runner
            .check(self.runner.argv(["userdel", "-r", name]))
            .await?;
        info!(user = name, "user removed");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, ResourceError> {
        let result = self
            .runner
            .check(self.runner.argv(["getent", "passwd"]))
            .await?;
        Ok(result
            .stdout
            .lines()
            .filter_map(|line| line.split(':').next())
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect())
    }

    async fn groups(&self, name: &str) -> Result<Vec<String>, ResourceError> {
        let result = self.runner.run(self.runner.argv(["id", "-nG", name])).await?;
        if !result.success() {
            return Err(ResourceError::NotFound(format!("user {name}")));
        }
        Ok(result.stdout.split_whitespace().map(String::from).collect())
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Shadow
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    #[tokio::test]
    async fn test_exists_and_groups() {
        let fake = FakeRemote::new()
            .respond("id -u deploy", 0, "1001\n", "")
            .respond("id -nG deploy", 0, "deploy wheel docker\n", "");
        let users = Shadow::new(Arc::new(fake), false);

        assert!(users.exists("deploy").await.unwrap());
        assert!(!users.exists("ghost").await.unwrap());
        assert_eq!(users.groups("deploy").await.unwrap(), ["deploy", "wheel", "docker"]);
        assert!(matches!(
            users.groups("ghost").await.unwrap_err(),
            ResourceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_list() {
        let fake = FakeRemote::new().respond(
            "getent passwd",
            0,
            "root:x:0:0:root:/root:/bin/bash\ndeploy:x:1001:1001::/home/deploy:/bin/sh\n",
            "",
        );
        let users = Shadow::new(Arc::new(fake), false);
        assert_eq!(users.list().await.unwrap(), ["root", "deploy"]);
    }

    #[tokio::test]
    async fn test_create_with_sudo() {
        let fake = FakeRemote::new().respond("sudo useradd -m deploy", 0, "", "");
        Shadow::new(Arc::new(fake.clone()), true)
            .create("deploy")
            .await
            .unwrap();
        assert_eq!(fake.issued(), ["sudo useradd -m deploy"]);
    }
}
