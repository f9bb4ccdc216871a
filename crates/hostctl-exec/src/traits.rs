//! Transport and executor traits

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandRequest, CommandResult, RawOutput};
use crate::stream::{LineSender, LineSplitter};

/// How a file channel is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Stream the remote file's content
    Read,
    /// Create or truncate the remote file and stream content into it
    Write,
}

/// Opens authenticated sessions to one target
///
/// Implementations perform network I/O only; retry policy belongs to the
/// [`Executor`](crate::executor::Executor).
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and authenticate a session within `timeout`
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Session>, ExecError>;

    /// Human-readable target, used in logs and errors
    fn target(&self) -> String;

    /// Transport name ("ssh", "local", ...)
    fn transport_type(&self) -> &'static str;
}

/// One live connection to a host
#[async_trait]
pub trait Session: Send + Sync {
    /// Run one command line to completion
    async fn execute(&mut self, command: &str, input: Option<&[u8]>)
    -> Result<RawOutput, ExecError>;

    /// Run one command line, sending each stdout line to `lines` as it arrives
    ///
    /// The default waits for completion and then replays stdout.
    async fn execute_streaming(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
        lines: &LineSender,
    ) -> Result<RawOutput, ExecError> {
        let output = self.execute(command, input).await?;
        let mut splitter = LineSplitter::default();
        splitter.feed(&output.stdout, lines);
        splitter.finish(lines);
        Ok(output)
    }

    /// Open a file channel on this session
    async fn open_file(&mut self, path: &str, mode: FileMode)
    -> Result<Box<dyn FileChannel>, ExecError>;

    /// Close the session; closing twice is a no-op
    async fn close(&mut self) -> Result<(), ExecError>;

    /// Whether the session still looks usable
    fn is_open(&self) -> bool;
}

/// Streaming handle to one remote file
#[async_trait]
pub trait FileChannel: Send {
    /// Next chunk of content, `None` at end of file
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecError>;

    /// Write one chunk, returning how many bytes were accepted
    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, ExecError>;

    /// Flush and close the channel
    async fn finish(self: Box<Self>) -> Result<(), ExecError>;
}

/// Remote command execution as seen by resource managers and the detector
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and return its result, successful or not
    async fn run(&self, request: &CommandRequest) -> Result<CommandResult, ExecError>;

    /// Open a file channel on the underlying session
    async fn open_file(&self, path: &str, mode: FileMode)
    -> Result<Box<dyn FileChannel>, ExecError>;

    /// Bytes per file channel write
    fn chunk_size(&self) -> usize {
        crate::config::DEFAULT_CHUNK_SIZE
    }

    /// Executor type ("ssh", "local", "fake", ...)
    fn executor_type(&self) -> &'static str;

    /// Run a command and return its stdout, failing on an unaccepted exit code
    ///
    /// # Errors
    /// Returns `ExecError::CommandFailed` with the exit code and stderr when
    /// the result's success flag is false, or any error from [`run`](Self::run)
    async fn run_checked(&self, request: &CommandRequest) -> Result<String, ExecError> {
        let result = self.run(request).await?.into_checked()?;
        Ok(result.stdout)
    }
}
