//! Command plumbing shared by every strategy

use std::sync::Arc;

use hostctl_exec::{CommandRequest, CommandResult, RemoteExecutor};
use tracing::debug;

use crate::error::ResourceError;

/// Executor handle plus the sudo setting of one manager
#[derive(Clone)]
pub struct Runner {
    executor: Arc<dyn RemoteExecutor>,
    sudo: bool,
}

impl Runner {
    /// Create a runner
    pub fn new(executor: Arc<dyn RemoteExecutor>, sudo: bool) -> Self {
        Self { executor, sudo }
    }

    /// Request for `argv`, with sudo applied
    pub fn argv<I, S>(&self, argv: I) -> CommandRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandRequest::new(argv).with_sudo(self.sudo)
    }

    /// Request for a shell script, with sudo applied
    pub fn script(&self, script: impl Into<String>) -> CommandRequest {
        CommandRequest::shell(script).with_sudo(self.sudo)
    }

    /// Run a request, returning the result whatever the exit code
    ///
    /// # Errors
    /// Returns `ResourceError::Exec` if the command could not be delivered
    pub async fn run(&self, request: CommandRequest) -> Result<CommandResult, ResourceError> {
        let result = self.executor.run(&request).await?;
        debug!(
            command = %result.command,
            status = result.status,
            "resource command completed"
        );
        Ok(result)
    }

    /// Run a request and report whether it succeeded
    ///
    /// # Errors
    /// Returns `ResourceError::Exec` if the command could not be delivered
    pub async fn test(&self, request: CommandRequest) -> Result<bool, ResourceError> {
        Ok(self.run(request).await?.success())
    }

    /// Run a request, failing with `CommandFailed` on an unaccepted exit code
    ///
    /// # Errors
    /// Returns `ResourceError::CommandFailed` (or `PermissionDenied` when
    /// stderr says so) on failure, `ResourceError::Exec` if undeliverable
    pub async fn check(&self, request: CommandRequest) -> Result<CommandResult, ResourceError> {
        let result = self.run(request).await?;
        if result.success() {
            return Ok(result);
        }
        if result.stderr.contains("Permission denied") || result.stderr.contains("Operation not permitted") {
            return Err(ResourceError::PermissionDenied(result.stderr));
        }
        if result.stderr.contains("No such file or directory") {
            return Err(ResourceError::NotFound(result.stderr.trim().to_string()));
        }
        Err(ResourceError::CommandFailed {
            command: result.command,
            status: result.status,
            stderr: result.stderr,
        })
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("executor", &self.executor.executor_type())
            .field("sudo", &self.sudo)
            .finish()
    }
}
