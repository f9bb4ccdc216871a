//! In-memory transports and executors for tests
//!
//! [`ScriptedConnector`] stands in for a network transport underneath a real
//! [`Executor`](crate::executor::Executor); [`FakeRemote`] replaces the whole
//! executor for code that only needs a [`RemoteExecutor`]. Both keep a file
//! map so file channels and the `wc -c` / `sha256sum` checks used by
//! transfers behave like a real host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::ExecError;
use crate::result::{CommandRequest, CommandResult, RawOutput};
use crate::traits::{Connector, FileChannel, FileMode, RemoteExecutor, Session};

const READ_CHUNK: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn output(status: i32, stdout: &str, stderr: &str) -> RawOutput {
    RawOutput {
        status,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

fn unquote(arg: &str) -> String {
    let arg = arg.trim();
    if arg.len() >= 2 && arg.starts_with('\'') && arg.ends_with('\'') {
        arg[1..arg.len() - 1]
            .replace(r"'\''", "'")
            .replace(r"'\!'", "!")
    } else {
        arg.to_string()
    }
}

/// Shared in-memory file map
#[derive(Debug, Clone, Default)]
pub struct FakeFiles {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FakeFiles {
    /// Store a file
    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        lock(&self.inner).insert(path.into(), data.into());
    }

    /// Read a file
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.inner).get(path).cloned()
    }

    /// Answer the file-inspection commands transfers rely on
    fn builtin(&self, command: &str) -> Option<RawOutput> {
        if let Some(path) = command.strip_prefix("wc -c ") {
            let path = unquote(path);
            return Some(match self.get(&path) {
                Some(data) => output(0, &format!("{} {path}\n", data.len()), ""),
                None => output(1, "", &format!("wc: {path}: No such file or directory\n")),
            });
        }
        if let Some(path) = command.strip_prefix("sha256sum ") {
            let path = unquote(path);
            return Some(match self.get(&path) {
                Some(data) => output(0, &format!("{:x}  {path}\n", Sha256::digest(&data)), ""),
                None => output(
                    1,
                    "",
                    &format!("sha256sum: {path}: No such file or directory\n"),
                ),
            });
        }
        None
    }

    fn open(&self, path: &str, mode: FileMode) -> Result<Box<dyn FileChannel>, ExecError> {
        let pending = match mode {
            FileMode::Read => self
                .get(path)
                .ok_or_else(|| ExecError::NotFound(path.to_string()))?,
            FileMode::Write => Vec::new(),
        };
        Ok(Box::new(FakeFileChannel {
            files: self.clone(),
            path: path.to_string(),
            mode,
            buffer: pending,
            offset: 0,
        }))
    }
}

struct FakeFileChannel {
    files: FakeFiles,
    path: String,
    mode: FileMode,
    buffer: Vec<u8>,
    offset: usize,
}

#[async_trait]
impl FileChannel for FakeFileChannel {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecError> {
        if self.offset >= self.buffer.len() {
            return Ok(None);
        }
        let end = (self.offset + READ_CHUNK).min(self.buffer.len());
        let chunk = self.buffer[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, ExecError> {
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    async fn finish(self: Box<Self>) -> Result<(), ExecError> {
        if self.mode == FileMode::Write {
            self.files.insert(self.path, self.buffer);
        }
        Ok(())
    }
}

/// Counters observed by tests
#[derive(Debug, Default)]
pub struct ScriptStats {
    connects: AtomicU32,
    executions: AtomicU32,
    commands: Mutex<Vec<String>>,
    inputs: Mutex<HashMap<String, Vec<u8>>>,
}

impl ScriptStats {
    /// Number of `connect` calls
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `execute` calls, failed ones included
    #[must_use]
    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Command lines in delivery order
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Stdin last sent with `command`, if any
    #[must_use]
    pub fn input(&self, command: &str) -> Option<String> {
        lock(&self.inputs)
            .get(command)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, RawOutput>,
    fail_next: u32,
    fail_always: bool,
    failure: Option<ExecError>,
    connect_error: Option<ExecError>,
    connect_delay: Option<Duration>,
    delay: Option<Duration>,
}

/// Transport double with canned responses and injectable failures
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    stats: Arc<ScriptStats>,
    files: FakeFiles,
}

impl ScriptedConnector {
    /// Create an empty script; unknown commands exit with 127
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned response for an exact command line
    #[must_use]
    pub fn respond(self, command: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        self.set(command, status, stdout, stderr);
        self
    }

    /// Add or replace a canned response on a live script
    pub fn set(&self, command: &str, status: i32, stdout: &str, stderr: &str) {
        lock(&self.script)
            .responses
            .insert(command.to_string(), output(status, stdout, stderr));
    }

    /// Fail the next `times` executions with `error`
    #[must_use]
    pub fn fail_next(self, times: u32, error: ExecError) -> Self {
        {
            let mut script = lock(&self.script);
            script.fail_next = times;
            script.failure = Some(error);
        }
        self
    }

    /// Fail every execution with `error`
    #[must_use]
    pub fn fail_always(self, error: ExecError) -> Self {
        {
            let mut script = lock(&self.script);
            script.fail_always = true;
            script.failure = Some(error);
        }
        self
    }

    /// Fail every connect with `error`
    #[must_use]
    pub fn refuse_connect(self, error: ExecError) -> Self {
        lock(&self.script).connect_error = Some(error);
        self
    }

    /// Make every execution take `delay`
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.script).delay = Some(delay);
        self
    }

    /// Make every connect take `delay`
    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        lock(&self.script).connect_delay = Some(delay);
        self
    }

    /// Shared counters
    #[must_use]
    pub fn stats(&self) -> Arc<ScriptStats> {
        Arc::clone(&self.stats)
    }

    /// Remote file map
    #[must_use]
    pub fn files(&self) -> FakeFiles {
        self.files.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _timeout: Duration) -> Result<Box<dyn Session>, ExecError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        let (delay, refused) = {
            let script = lock(&self.script);
            (script.connect_delay, script.connect_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = refused {
            return Err(err);
        }
        Ok(Box::new(ScriptedSession {
            connector: self.clone(),
            open: true,
        }))
    }

    fn target(&self) -> String {
        "scripted".to_string()
    }

    fn transport_type(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedSession {
    connector: ScriptedConnector,
    open: bool,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn execute(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<RawOutput, ExecError> {
        let stats = &self.connector.stats;
        stats.executions.fetch_add(1, Ordering::SeqCst);
        lock(&stats.commands).push(command.to_string());
        if let Some(input) = input {
            lock(&stats.inputs).insert(command.to_string(), input.to_vec());
        }

        let (delay, failure, response) = {
            let mut script = lock(&self.connector.script);
            let failure = if script.fail_always {
                script.failure.clone()
            } else if script.fail_next > 0 {
                script.fail_next -= 1;
                script.failure.clone()
            } else {
                None
            };
            (
                script.delay,
                failure,
                script.responses.get(command).cloned(),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(response
            .or_else(|| self.connector.files.builtin(command))
            .unwrap_or_else(|| output(127, "", &format!("{command}: command not found\n"))))
    }

    async fn open_file(
        &mut self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileChannel>, ExecError> {
        self.connector.files.open(path, mode)
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// [`RemoteExecutor`] double answering from a command table
///
/// Every issued command line is recorded so tests can assert exactly what a
/// resource manager sent.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    responses: Arc<Mutex<HashMap<String, (i32, String, String)>>>,
    issued: Arc<Mutex<Vec<String>>>,
    files: FakeFiles,
}

impl FakeRemote {
    /// Create an empty fake; unknown commands exit with 127
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned response for an exact command line
    #[must_use]
    pub fn respond(self, command: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        self.set(command, status, stdout, stderr);
        self
    }

    /// Add or replace a canned response after construction
    pub fn set(&self, command: &str, status: i32, stdout: &str, stderr: &str) {
        lock(&self.responses).insert(
            command.to_string(),
            (status, stdout.to_string(), stderr.to_string()),
        );
    }

    /// Seed a remote file
    #[must_use]
    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path, data);
        self
    }

    /// Remote file map
    #[must_use]
    pub fn files(&self) -> FakeFiles {
        self.files.clone()
    }

    /// Command lines issued so far, in order
    #[must_use]
    pub fn issued(&self) -> Vec<String> {
        lock(&self.issued).clone()
    }

    /// Number of times `command` was issued
    #[must_use]
    pub fn count(&self, command: &str) -> usize {
        lock(&self.issued).iter().filter(|c| *c == command).count()
    }
}

#[async_trait]
impl RemoteExecutor for FakeRemote {
    async fn run(&self, request: &CommandRequest) -> Result<CommandResult, ExecError> {
        let command = request.command_line();
        lock(&self.issued).push(command.clone());

        let canned = lock(&self.responses).get(&command).cloned();
        let raw = match canned {
            Some((status, stdout, stderr)) => output(status, &stdout, &stderr),
            None => self.files.builtin(&command).unwrap_or_else(|| {
                output(127, "", &format!("{command}: command not found\n"))
            }),
        };
        Ok(CommandResult::from_raw(request, raw, Duration::ZERO))
    }

    async fn open_file(
        &self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileChannel>, ExecError> {
        self.files.open(path, mode)
    }

    fn chunk_size(&self) -> usize {
        READ_CHUNK
    }

    fn executor_type(&self) -> &'static str {
        "fake"
    }
}
