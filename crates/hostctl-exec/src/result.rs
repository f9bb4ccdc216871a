//! Request and result types for command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::shell;

/// What to run on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
enum Program {
    /// Argument vector, quoted for `sh` when rendered
    Argv(Vec<String>),
    /// Verbatim shell script
    Shell(String),
}

/// A command to execute on a host
///
/// Built once and then only borrowed by the executor, so a retried command is
/// byte-for-byte the command that was first issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    program: Program,
    input: Option<Vec<u8>>,
    timeout: Option<Duration>,
    expected_codes: Option<Vec<i32>>,
    retry: Option<bool>,
}

impl CommandRequest {
    /// Create a request from an argument vector
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::from_program(Program::Argv(argv.into_iter().map(Into::into).collect()))
    }

    /// Create a request from a shell script (pipes, redirections, etc.)
    pub fn shell(script: impl Into<String>) -> Self {
        Self::from_program(Program::Shell(script.into()))
    }

    fn from_program(program: Program) -> Self {
        Self {
            program,
            input: None,
            timeout: None,
            expected_codes: None,
            retry: None,
        }
    }

    /// Data written to the command's stdin
    #[must_use]
    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Override the executor's default command timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Exit codes counted as success (default: only 0)
    #[must_use]
    pub fn with_expected_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.expected_codes = Some(codes.into_iter().collect());
        self
    }

    /// Opt in or out of reconnect-and-retry for this call
    #[must_use]
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Prefix the command with `sudo` when `sudo` is true
    #[must_use]
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        if !sudo {
            return self;
        }
        self.program = match self.program {
            Program::Argv(mut argv) => {
                argv.insert(0, "sudo".to_string());
                Program::Argv(argv)
            }
            Program::Shell(script) => Program::Shell(format!("sudo sh -c {}", shell::quote(&script))),
        };
        self
    }

    /// Command line as sent to the remote shell
    #[must_use]
    pub fn command_line(&self) -> String {
        match &self.program {
            Program::Argv(argv) => shell::join(argv),
            Program::Shell(script) => script.clone(),
        }
    }

    /// Stdin payload, if any
    #[must_use]
    pub fn input(&self) -> Option<&[u8]> {
        self.input.as_deref()
    }

    /// Per-request timeout, if any
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Per-request retry flag, if set
    #[must_use]
    pub fn retry(&self) -> Option<bool> {
        self.retry
    }

    /// Whether `status` is in the accepted set
    #[must_use]
    pub fn accepts(&self, status: i32) -> bool {
        match &self.expected_codes {
            Some(codes) => codes.contains(&status),
            None => status == 0,
        }
    }
}

/// Raw output of one remote invocation, before any interpretation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Exit status (-1 when the remote side never reported one)
    pub status: i32,
    /// stdout bytes
    pub stdout: Vec<u8>,
    /// stderr bytes
    pub stderr: Vec<u8>,
}

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Command line that produced this result
    pub command: String,
    /// Exit status code
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
    success: bool,
}

impl CommandResult {
    /// Build a result with the default success rule (exit code 0)
    pub fn new(
        command: impl Into<String>,
        status: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration,
            success: status == 0,
        }
    }

    /// Interpret raw output against the request's accepted exit codes
    #[must_use]
    pub fn from_raw(request: &CommandRequest, raw: RawOutput, duration: Duration) -> Self {
        Self {
            command: request.command_line(),
            status: raw.status,
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            duration,
            success: request.accepts(raw.status),
        }
    }

    /// Check if the exit status was in the accepted set
    #[must_use]
    pub fn success(&self) -> bool {
        self.success
    }

    /// Turn an unsuccessful result into `ExecError::CommandFailed`
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` when the success flag is false
    pub fn into_checked(self) -> Result<Self, ExecError> {
        if self.success {
            Ok(self)
        } else {
            Err(ExecError::CommandFailed {
                command: self.command,
                status: self.status,
                stderr: self.stderr,
            })
        }
    }

    /// Non-empty trimmed stdout lines
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Connection information for SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Host address
    pub host: String,
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username
    pub user: String,
}

fn default_port() -> u16 {
    22
}

impl ConnectionInfo {
    /// Create new connection info
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            user: user.into(),
        }
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@host:port`, used as the log prefix for this connection
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}
