//! Session-owning executor with timeout and reconnect-and-retry policy

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ExecConfig;
use crate::error::ExecError;
use crate::result::{CommandRequest, CommandResult, RawOutput};
use crate::stream::LineSender;
use crate::traits::{Connector, FileChannel, FileMode, RemoteExecutor, Session};

type SessionSlot = Option<Box<dyn Session>>;

/// Error for an operation cut short by [`Executor::close`]
fn aborted(attempts: u32, reason: &str) -> ExecError {
    ExecError::ConnectionLost {
        attempts,
        reason: reason.to_string(),
    }
}

/// Executes commands over a single lazily-opened session
///
/// The session slot is guarded by an async mutex: commands are delivered in
/// issuance order, and a reconnect replaces the session in place while no
/// other caller can observe it half-closed.
pub struct Executor {
    connector: Arc<dyn Connector>,
    config: ExecConfig,
    host: String,
    session: Mutex<SessionSlot>,
    closed: watch::Sender<bool>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("host", &self.host)
            .field("transport", &self.connector.transport_type())
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Create an executor; no connection is made until the first command
    pub fn new(connector: Arc<dyn Connector>, config: ExecConfig) -> Self {
        let host = connector.target();
        let (closed, _) = watch::channel(false);
        Self {
            connector,
            config,
            host,
            session: Mutex::new(None),
            closed,
        }
    }

    /// Executor settings
    #[must_use]
    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Target description of the underlying connector
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether [`close`](Self::close) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Whether a session is currently open
    ///
    /// Only a hint: the session can drop at any moment and is then
    /// re-opened by the next command.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session
            .try_lock()
            .map(|slot| slot.as_ref().is_some_and(|s| s.is_open()))
            .unwrap_or(true)
    }

    /// Lock the session slot, opening a session if there is none
    async fn connected(&self) -> Result<MutexGuard<'_, SessionSlot>, ExecError> {
        let mut closed_rx = self.closed.subscribe();
        let mut slot = self.session.lock().await;
        if *closed_rx.borrow_and_update() {
            return Err(ExecError::Closed);
        }

        if slot.as_ref().is_some_and(|s| !s.is_open()) {
            debug!(host = %self.host, "discarding stale session");
            *slot = None;
        }

        if slot.is_none() {
            info!(
                host = %self.host,
                transport = self.connector.transport_type(),
                "opening session"
            );
            let session = tokio::select! {
                res = self.connector.connect(self.config.connect_timeout) => res?,
                _ = closed_rx.changed() => return Err(ExecError::Closed),
            };
            *slot = Some(session);
        }

        Ok(slot)
    }

    /// Drop the current session after a transport failure
    async fn invalidate(&self, slot: &mut SessionSlot) {
        if let Some(mut session) = slot.take() {
            if let Err(e) = session.close().await {
                debug!(host = %self.host, error = %e, "error closing broken session");
            }
            warn!(host = %self.host, "session dropped, next attempt reconnects");
        }
    }

    /// One delivery attempt of `request`
    ///
    /// Transport failures drop the session. When `retry` is set a timeout
    /// drops it too, so the re-issued command never shares a session with
    /// the abandoned one.
    async fn attempt(
        &self,
        request: &CommandRequest,
        command: &str,
        timeout_duration: Duration,
        attempt: u32,
        retry: bool,
        lines: Option<&LineSender>,
    ) -> Result<RawOutput, ExecError> {
        let mut closed_rx = self.closed.subscribe();
        let mut slot = self.connected().await?;
        let Some(session) = slot.as_mut() else {
            return Err(ExecError::Transport("session unavailable".into()));
        };

        debug!(host = %self.host, command = %command, attempt, "executing command");

        let execution = async {
            match lines {
                Some(lines) => session.execute_streaming(command, request.input(), lines).await,
                None => session.execute(command, request.input()).await,
            }
        };
        let outcome = tokio::select! {
            res = timeout(timeout_duration, execution) => {
                res.unwrap_or(Err(ExecError::Timeout { timeout: timeout_duration }))
            }
            _ = closed_rx.changed() => Err(aborted(attempt, "executor closed during command")),
        };

        if let Err(e) = &outcome
            && (e.invalidates_session() || (retry && matches!(e, ExecError::Timeout { .. })))
        {
            self.invalidate(&mut slot).await;
        }

        outcome
    }

    /// Sleep for a retry delay, waking early with an error on close
    async fn backoff(&self, delay: Duration) -> Result<(), ExecError> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow_and_update() {
            return Err(ExecError::Closed);
        }
        tokio::select! {
            () = sleep(delay) => Ok(()),
            _ = closed_rx.changed() => Err(ExecError::Closed),
        }
    }

    /// Run a command, sending each stdout line to `lines` as it is produced
    ///
    /// The full output is still collected into the returned result, and the
    /// sender is dropped when the command ends. Streamed commands are never
    /// retried; a transport failure surfaces as `ExecError::Execution`.
    ///
    /// # Errors
    /// Same as [`run`](RemoteExecutor::run) with retry disabled
    #[instrument(skip(self, request, lines), fields(host = %self.host))]
    pub async fn run_streaming(
        &self,
        request: &CommandRequest,
        lines: LineSender,
    ) -> Result<CommandResult, ExecError> {
        if self.is_closed() {
            return Err(ExecError::Closed);
        }
        let command = request.command_line();
        let timeout_duration = request.timeout().unwrap_or(self.config.command_timeout);
        let start = Instant::now();

        info!(command = %command, "following command output");
        match self
            .attempt(request, &command, timeout_duration, 1, false, Some(&lines))
            .await
        {
            Ok(raw) => {
                let result = CommandResult::from_raw(request, raw, start.elapsed());
                debug!(
                    command = %command,
                    status = result.status,
                    duration = ?result.duration,
                    "streamed command completed"
                );
                Ok(result)
            }
            Err(ExecError::Transport(reason)) => Err(ExecError::Execution { command, reason }),
            Err(ExecError::Closed) => Err(aborted(1, "executor closed during connect")),
            Err(e) => Err(e),
        }
    }

    /// Drop the current session; the next command opens a fresh one
    ///
    /// # Errors
    /// Returns an error if the transport fails to close cleanly
    pub async fn disconnect(&self) -> Result<(), ExecError> {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            session.close().await?;
            info!(host = %self.host, "session disconnected");
        }
        Ok(())
    }

    /// Close the executor for good
    ///
    /// In-flight commands are aborted with `ConnectionLost`; every later
    /// operation fails with `ExecError::Closed`. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns an error if the transport fails to close cleanly
    pub async fn close(&self) -> Result<(), ExecError> {
        let was_closed = self.closed.send_replace(true);
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            session.close().await?;
        }
        if !was_closed {
            info!(host = %self.host, "executor closed");
        }
        Ok(())
    }

    /// Check whether the host answers a trivial command within `tcp_timeout`
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn is_connective(&self, tcp_timeout: Duration) -> bool {
        let request = CommandRequest::new(["true"])
            .with_timeout(tcp_timeout)
            .with_retry(false);
        match self.run(&request).await {
            Ok(result) => result.success(),
            Err(e) => {
                debug!(error = %e, "host not connective");
                // A failed probe must not leave a dead session for the next one
                let _ = self.disconnect().await;
                false
            }
        }
    }

    /// Poll until connectivity equals `positive` or `wait` elapses
    ///
    /// Returns whether the wanted state was reached.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn wait_for_connectivity_state(
        &self,
        positive: bool,
        wait: Duration,
        sample: Duration,
    ) -> bool {
        let start = Instant::now();
        loop {
            if self.is_closed() {
                return false;
            }
            if self.is_connective(self.config.connect_timeout).await == positive {
                return true;
            }
            if start.elapsed() >= wait {
                error!(
                    positive,
                    waited = ?start.elapsed(),
                    "host did not reach wanted connectivity state"
                );
                return false;
            }
            sleep(sample).await;
        }
    }
}

#[async_trait]
impl RemoteExecutor for Executor {
    #[instrument(skip(self, request), fields(host = %self.host))]
    async fn run(&self, request: &CommandRequest) -> Result<CommandResult, ExecError> {
        let command = request.command_line();
        let retry = request.retry().unwrap_or(self.config.retry_by_default);
        let timeout_duration = request.timeout().unwrap_or(self.config.command_timeout);

        if self.is_closed() {
            return Err(ExecError::Closed);
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let start = Instant::now();

            let err = match self
                .attempt(request, &command, timeout_duration, attempts, retry, None)
                .await
            {
                Ok(raw) => {
                    let result = CommandResult::from_raw(request, raw, start.elapsed());
                    debug!(
                        command = %command,
                        status = result.status,
                        success = result.success(),
                        duration = ?result.duration,
                        "command completed"
                    );
                    return Ok(result);
                }
                // Closed while this call was connecting
                Err(ExecError::Closed) => {
                    return Err(aborted(attempts, "executor closed during connect"));
                }
                Err(e) => e,
            };

            if let ExecError::Timeout { timeout } = &err {
                error!(command = %command, timeout = ?timeout, attempt = attempts, "command timed out");
            }

            if !err.is_retryable() {
                return Err(err);
            }

            if !retry {
                return Err(match err {
                    ExecError::Transport(reason) => ExecError::Execution { command, reason },
                    other => other,
                });
            }

            if attempts > self.config.max_retries {
                error!(command = %command, attempts, error = %err, "giving up after retries");
                return Err(ExecError::ConnectionLost {
                    attempts,
                    reason: err.to_string(),
                });
            }

            let delay = self.config.backoff(attempts);
            warn!(
                command = %command,
                attempt = attempts,
                delay = ?delay,
                error = %err,
                "retrying command"
            );
            if self.backoff(delay).await.is_err() {
                return Err(aborted(attempts, "executor closed during retry"));
            }
        }
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn open_file(
        &self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileChannel>, ExecError> {
        let mut slot = self.connected().await?;
        let Some(session) = slot.as_mut() else {
            return Err(ExecError::Transport("session unavailable".into()));
        };

        debug!(path, ?mode, "opening file channel");
        let outcome = session.open_file(path, mode).await;
        if let Err(e) = &outcome
            && e.invalidates_session()
        {
            self.invalidate(&mut slot).await;
        }
        outcome
    }

    fn chunk_size(&self) -> usize {
        self.config.transfer_chunk_size
    }

    fn executor_type(&self) -> &'static str {
        self.connector.transport_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;

    fn fast_config(max_retries: u32) -> ExecConfig {
        ExecConfig {
            max_retries,
            backoff_base: Duration::ZERO,
            command_timeout: Duration::from_secs(5),
            ..ExecConfig::default()
        }
    }

    #[tokio::test]
    async fn test_run_success_and_failure_flags() {
        let connector = ScriptedConnector::new()
            .respond("true", 0, "", "")
            .respond("false", 1, "", "nope");
        let executor = Executor::new(Arc::new(connector), fast_config(0));

        let ok = executor.run(&CommandRequest::new(["true"])).await.unwrap();
        assert!(ok.success());

        let failed = executor.run(&CommandRequest::new(["false"])).await.unwrap();
        assert!(!failed.success());
        assert_eq!(failed.status, 1);
    }

    #[tokio::test]
    async fn test_run_checked_raises_command_failed() {
        let connector = ScriptedConnector::new().respond("ls /missing", 2, "", "No such file");
        let executor = Executor::new(Arc::new(connector), fast_config(0));

        let err = executor
            .run_checked(&CommandRequest::new(["ls", "/missing"]))
            .await
            .unwrap_err();
        assert_eq!(err.exit_status(), Some(2));
        assert!(err.to_string().contains("No such file"));
    }

    #[tokio::test]
    async fn test_retry_bound_is_max_retries_plus_one() {
        let connector = ScriptedConnector::new()
            .fail_always(ExecError::Transport("connection reset".into()));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(3));

        let err = executor
            .run(&CommandRequest::new(["uptime"]).with_retry(true))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::ConnectionLost { attempts: 4, .. }));
        assert_eq!(stats.executions(), 4);
        // Every failure discards the session, so each attempt reconnects
        assert_eq!(stats.connects(), 4);
    }

    #[tokio::test]
    async fn test_retry_disabled_surfaces_execution_error() {
        let connector =
            ScriptedConnector::new().fail_always(ExecError::Transport("broken pipe".into()));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(3));

        let err = executor
            .run(&CommandRequest::new(["uptime"]))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Execution { ref command, .. } if command == "uptime"));
        assert_eq!(stats.executions(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let connector = ScriptedConnector::new()
            .respond("uptime", 0, "up 3 days", "")
            .fail_next(2, ExecError::Transport("connection reset".into()));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(3));

        let result = executor
            .run(&CommandRequest::new(["uptime"]).with_retry(true))
            .await
            .unwrap();

        assert_eq!(result.stdout, "up 3 days");
        assert_eq!(stats.executions(), 3);
        // Same command re-issued on every attempt
        assert_eq!(stats.commands(), vec!["uptime", "uptime", "uptime"]);
    }

    #[tokio::test]
    async fn test_authentication_failure_not_retried() {
        let connector = ScriptedConnector::new()
            .refuse_connect(ExecError::AuthenticationFailed("bad password".into()));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(5));

        let err = executor
            .run(&CommandRequest::new(["true"]).with_retry(true))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::AuthenticationFailed(_)));
        assert_eq!(stats.connects(), 1);
        assert_eq!(stats.executions(), 0);
    }

    #[tokio::test]
    async fn test_timeout_without_retry() {
        let connector = ScriptedConnector::new()
            .respond("sleep 5", 0, "", "")
            .with_delay(Duration::from_secs(5));
        let executor = Executor::new(Arc::new(connector), fast_config(2));

        let err = executor
            .run(&CommandRequest::new(["sleep", "5"]).with_timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timeout_with_retry_reports_connection_lost() {
        let connector = ScriptedConnector::new()
            .respond("sleep 5", 0, "", "")
            .with_delay(Duration::from_secs(5));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(2));

        let err = executor
            .run(
                &CommandRequest::new(["sleep", "5"])
                    .with_timeout(Duration::from_millis(50))
                    .with_retry(true),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::ConnectionLost { attempts: 3, .. }));
        assert_eq!(stats.executions(), 3);
        // Each re-issue gets a fresh session
        assert_eq!(stats.connects(), 3);
    }

    #[tokio::test]
    async fn test_timeout_without_retry_keeps_session() {
        let connector = ScriptedConnector::new()
            .respond("sleep 5", 0, "", "")
            .with_delay(Duration::from_secs(5));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(2));

        let request = CommandRequest::new(["sleep", "5"]).with_timeout(Duration::from_millis(20));
        for _ in 0..2 {
            let err = executor.run(&request).await.unwrap_err();
            assert!(matches!(err, ExecError::Timeout { .. }));
        }
        assert_eq!(stats.connects(), 1);
    }

    #[tokio::test]
    async fn test_session_reused_across_commands() {
        let connector = ScriptedConnector::new().respond("true", 0, "", "");
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(0));

        for _ in 0..3 {
            executor.run(&CommandRequest::new(["true"])).await.unwrap();
        }
        assert_eq!(stats.connects(), 1);
        assert!(executor.is_connected());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let connector = ScriptedConnector::new().respond("true", 0, "", "");
        let executor = Executor::new(Arc::new(connector), fast_config(0));

        executor.run(&CommandRequest::new(["true"])).await.unwrap();
        executor.close().await.unwrap();
        executor.close().await.unwrap();

        let err = executor
            .run(&CommandRequest::new(["true"]))
            .await
            .unwrap_err();
        assert_eq!(err, ExecError::Closed);
        assert!(executor.is_closed());
    }

    #[tokio::test]
    async fn test_close_aborts_in_flight_command() {
        let connector = ScriptedConnector::new()
            .respond("sleep 30", 0, "", "")
            .with_delay(Duration::from_secs(30));
        let executor = Arc::new(Executor::new(Arc::new(connector), fast_config(0)));

        let running = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run(&CommandRequest::new(["sleep", "30"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        executor.close().await.unwrap();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecError::ConnectionLost { .. }));
    }

    #[tokio::test]
    async fn test_close_during_backoff_reports_connection_lost() {
        let connector = ScriptedConnector::new()
            .fail_always(ExecError::Transport("connection reset".into()));
        let stats = connector.stats();
        let config = ExecConfig {
            max_retries: 3,
            backoff_base: Duration::from_secs(30),
            backoff_max: Duration::from_secs(30),
            ..ExecConfig::default()
        };
        let executor = Arc::new(Executor::new(Arc::new(connector), config));

        let running = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .run(&CommandRequest::new(["uptime"]).with_retry(true))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.close().await.unwrap();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecError::ConnectionLost { attempts: 1, .. }));
        assert_eq!(stats.executions(), 1);
    }

    #[tokio::test]
    async fn test_close_during_connect_reports_connection_lost() {
        let connector = ScriptedConnector::new()
            .respond("true", 0, "", "")
            .with_connect_delay(Duration::from_secs(30));
        let stats = connector.stats();
        let executor = Arc::new(Executor::new(Arc::new(connector), fast_config(0)));

        let running = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.run(&CommandRequest::new(["true"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        executor.close().await.unwrap();

        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecError::ConnectionLost { attempts: 1, .. }));
        assert_eq!(stats.executions(), 0);

        // Calls starting after close see Closed
        let err = executor.run(&CommandRequest::new(["true"])).await.unwrap_err();
        assert_eq!(err, ExecError::Closed);
    }

    #[tokio::test]
    async fn test_run_streaming_delivers_lines() {
        let connector =
            ScriptedConnector::new().respond("tail -n 3 /var/log/syslog", 0, "one\ntwo\nthree\n", "");
        let executor = Executor::new(Arc::new(connector), fast_config(0));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let request = CommandRequest::new(["tail", "-n", "3", "/var/log/syslog"]);
        let result = executor.run_streaming(&request, tx).await.unwrap();

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, ["one", "two", "three"]);
        assert_eq!(result.stdout, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_run_streaming_is_not_retried() {
        let connector = ScriptedConnector::new()
            .respond("uptime", 0, "up\n", "")
            .fail_next(1, ExecError::Transport("broken pipe".into()));
        let stats = connector.stats();
        let executor = Executor::new(Arc::new(connector), fast_config(3));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let err = executor
            .run_streaming(&CommandRequest::new(["uptime"]).with_retry(true), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Execution { .. }));
        assert_eq!(stats.executions(), 1);
    }

    #[tokio::test]
    async fn test_is_connective() {
        let up = Executor::new(
            Arc::new(ScriptedConnector::new().respond("true", 0, "", "")),
            fast_config(0),
        );
        assert!(up.is_connective(Duration::from_secs(1)).await);

        let down = Executor::new(
            Arc::new(
                ScriptedConnector::new()
                    .refuse_connect(ExecError::ConnectionFailed("no route to host".into())),
            ),
            fast_config(0),
        );
        assert!(!down.is_connective(Duration::from_secs(1)).await);
        assert!(
            down.wait_for_connectivity_state(false, Duration::from_secs(1), Duration::ZERO)
                .await
        );
    }
}
