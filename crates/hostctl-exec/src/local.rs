//! Local command execution using `tokio::process`

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error};

use crate::error::ExecError;
use crate::result::RawOutput;
use crate::stream::{LineSender, LineSplitter};
use crate::traits::{Connector, FileChannel, FileMode, Session};

const READ_CHUNK: usize = 64 * 1024;

/// Connector for the machine hostctl runs on
///
/// Commands go through `sh -c`, so pipes and redirections behave the same as
/// over SSH.
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl LocalConnector {
    /// Create a new local connector
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, _timeout: Duration) -> Result<Box<dyn Session>, ExecError> {
        Ok(Box::new(LocalSession { open: true }))
    }

    fn target(&self) -> String {
        "localhost".to_string()
    }

    fn transport_type(&self) -> &'static str {
        "local"
    }
}

struct LocalSession {
    open: bool,
}

impl LocalSession {
    /// Run `command` through `sh -c`, optionally streaming stdout lines
    async fn run_child(
        command: &str,
        input: Option<&[u8]>,
        lines: Option<&LineSender>,
    ) -> Result<RawOutput, ExecError> {
        debug!(command = %command, "executing local command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::SpawnError(e.to_string()))?;

        let stdin = child.stdin.take();
        let (Some(mut stdout_pipe), Some(mut stderr_pipe)) =
            (child.stdout.take(), child.stderr.take())
        else {
            return Err(ExecError::SpawnError("child output not captured".into()));
        };

        let feed_stdin = async move {
            if let (Some(input), Some(mut stdin)) = (input, stdin) {
                stdin.write_all(input).await?;
                // Dropping stdin delivers end of input
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stdout = async {
            let mut stdout = Vec::new();
            let mut splitter = LineSplitter::default();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = stdout_pipe.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if let Some(lines) = lines {
                    splitter.feed(&buf[..n], lines);
                }
                stdout.extend_from_slice(&buf[..n]);
            }
            if let Some(lines) = lines {
                splitter.finish(lines);
            }
            Ok::<_, std::io::Error>(stdout)
        };
        let read_stderr = async {
            let mut stderr = Vec::new();
            stderr_pipe.read_to_end(&mut stderr).await?;
            Ok::<_, std::io::Error>(stderr)
        };

        let ((), stdout, stderr) = tokio::try_join!(feed_stdin, read_stdout, read_stderr)
            .map_err(|e| ExecError::IoError(e.to_string()))?;
        let exit = child
            .wait()
            .await
            .map_err(|e| ExecError::IoError(e.to_string()))?;

        let status = exit.code().unwrap_or(-1);
        if status != 0 {
            error!(
                command = %command,
                status,
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                "local command failed"
            );
        }

        Ok(RawOutput {
            status,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Session for LocalSession {
    async fn execute(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<RawOutput, ExecError> {
        Self::run_child(command, input, None).await
    }

    async fn execute_streaming(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
        lines: &LineSender,
    ) -> Result<RawOutput, ExecError> {
        Self::run_child(command, input, Some(lines)).await
    }

    async fn open_file(
        &mut self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileChannel>, ExecError> {
        let file = match mode {
            FileMode::Read => File::open(path).await,
            FileMode::Write => File::create(path).await,
        }
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExecError::NotFound(path.to_string()),
            _ => ExecError::Transfer {
                path: path.to_string(),
                reason: e.to_string(),
            },
        })?;
        Ok(Box::new(LocalFileChannel { file }))
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct LocalFileChannel {
    file: File,
}

#[async_trait]
impl FileChannel for LocalFileChannel {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecError> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, ExecError> {
        self.file.write_all(data).await?;
        Ok(data.len())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), ExecError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::Executor;
    use crate::result::CommandRequest;
    use crate::traits::RemoteExecutor;

    fn executor() -> Executor {
        Executor::new(Arc::new(LocalConnector::new()), ExecConfig::default())
    }

    #[tokio::test]
    async fn test_run_success() {
        let result = executor()
            .run(&CommandRequest::shell("echo hello"))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_failure() {
        let result = executor()
            .run(&CommandRequest::shell("exit 42"))
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.status, 42);
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let request = CommandRequest::new(["sleep", "5"]).with_timeout(Duration::from_millis(100));
        let result = executor().run(&request).await;

        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_with_stderr() {
        let result = executor()
            .run(&CommandRequest::shell("echo error >&2"))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stderr.trim(), "error");
    }

    #[tokio::test]
    async fn test_run_with_input() {
        let request = CommandRequest::new(["cat"]).with_input("from stdin");
        let result = executor().run(&request).await.unwrap();

        assert_eq!(result.stdout, "from stdin");
    }

    #[tokio::test]
    async fn test_argv_is_quoted() {
        let request = CommandRequest::new(["echo", "a b", "$HOME"]);
        let result = executor().run(&request).await.unwrap();

        assert_eq!(result.stdout, "a b $HOME\n");
    }
}
