//! SSH transport using russh crate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key, load_secret_key};
use russh::{Channel, ChannelMsg, Disconnect, client};
use secrecy::ExposeSecret;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::error::ExecError;
use crate::keys::{Credentials, KeyError, KeySource, ResolvedKey};
use crate::result::{ConnectionInfo, RawOutput};
use crate::shell;
use crate::stream::{LineSender, LineSplitter};
use crate::traits::{Connector, FileChannel, FileMode, Session};

/// SSH_EXTENDED_DATA_STDERR
const STDERR_STREAM: u32 = 1;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

fn transport(err: russh::Error) -> ExecError {
    ExecError::Transport(err.to_string())
}

/// Opens authenticated SSH sessions to one host
pub struct SshConnector {
    /// Connection configuration
    conn_info: ConnectionInfo,
    /// Password or key
    credentials: Credentials,
    /// Keep-alive interval for opened sessions
    keepalive_interval: Option<Duration>,
}

impl std::fmt::Debug for SshConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConnector")
            .field("conn_info", &self.conn_info)
            .field("auth", &self.credentials.method())
            .field("keepalive_interval", &self.keepalive_interval)
            .finish()
    }
}

impl SshConnector {
    /// Create a new SSH connector
    pub fn new(conn_info: ConnectionInfo, credentials: Credentials) -> Self {
        Self {
            conn_info,
            credentials,
            keepalive_interval: None,
        }
    }

    /// Send keep-alives every `interval` on opened sessions
    #[must_use]
    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Get connection info
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.conn_info
    }

    async fn authenticate(&self, handle: &mut client::Handle<SshClientHandler>) -> Result<(), ExecError> {
        let user = self.conn_info.user.clone();

        let auth_res = match &self.credentials {
            Credentials::Password(password) => handle
                .authenticate_password(user, password.expose_secret().clone())
                .await
                .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?,
            Credentials::Key { key, passphrase } => {
                let passphrase = passphrase.as_ref().map(|p| p.expose_secret().as_str());
                let key_pair = match key {
                    ResolvedKey::Path(path) => load_secret_key(path, passphrase),
                    ResolvedKey::Inline(pem) => decode_secret_key(pem.expose_secret(), passphrase),
                }
                .map_err(|e| ExecError::SshKeyError(e.to_string()))?;

                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                handle
                    .authenticate_publickey(
                        user,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await
                    .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?
            }
        };

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(format!(
                "{} authentication rejected for {}",
                self.credentials.method(),
                self.conn_info.target()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self), fields(host = %self.conn_info.host))]
    async fn connect(&self, connect_timeout: Duration) -> Result<Box<dyn Session>, ExecError> {
        info!(
            host = %self.conn_info.host,
            port = self.conn_info.port,
            user = %self.conn_info.user,
            auth = self.credentials.method(),
            "connecting to SSH"
        );

        let config = Arc::new(client::Config {
            keepalive_interval: self.keepalive_interval,
            ..Default::default()
        });

        let mut handle = timeout(
            connect_timeout,
            client::connect(
                config,
                (self.conn_info.host.as_str(), self.conn_info.port),
                SshClientHandler,
            ),
        )
        .await
        .map_err(|_| ExecError::Timeout {
            timeout: connect_timeout,
        })?
        .map_err(|e| ExecError::ConnectionFailed(format!("{}: {e}", self.conn_info.target())))?;

        timeout(connect_timeout, self.authenticate(&mut handle))
            .await
            .map_err(|_| ExecError::Timeout {
                timeout: connect_timeout,
            })??;

        info!(host = %self.conn_info.host, "SSH connected and authenticated");

        Ok(Box::new(SshSession {
            handle,
            host: self.conn_info.host.clone(),
            closed: false,
        }))
    }

    fn target(&self) -> String {
        self.conn_info.target()
    }

    fn transport_type(&self) -> &'static str {
        "ssh"
    }
}

/// One authenticated SSH connection
struct SshSession {
    handle: client::Handle<SshClientHandler>,
    host: String,
    closed: bool,
}

impl SshSession {
    async fn exec_channel(&mut self, command: &str) -> Result<Channel<client::Msg>, ExecError> {
        let channel = self.handle.channel_open_session().await.map_err(transport)?;
        channel.exec(true, command).await.map_err(transport)?;
        Ok(channel)
    }

    /// Run `command` on a fresh exec channel, optionally streaming stdout lines
    async fn run_channel(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
        lines: Option<&LineSender>,
    ) -> Result<RawOutput, ExecError> {
        let mut channel = self.exec_channel(command).await?;

        if let Some(input) = input {
            channel.data(input).await.map_err(transport)?;
        }
        // Commands reading stdin must see end of input
        channel.eof().await.map_err(transport)?;

        let mut status = None;
        let mut signal = None;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut splitter = LineSplitter::default();

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    if let Some(lines) = lines {
                        splitter.feed(&data, lines);
                    }
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } if ext == STDERR_STREAM => {
                    stderr.extend_from_slice(&data);
                }
                ChannelMsg::ExitStatus { exit_status } => status = Some(exit_status.cast_signed()),
                ChannelMsg::ExitSignal { signal_name, .. } => signal = Some(signal_name),
                _ => {}
            }
        }

        if let Some(lines) = lines {
            splitter.finish(lines);
        }

        let status = match (status, signal) {
            (Some(status), _) => status,
            (None, Some(signal)) => {
                stderr.extend_from_slice(format!("killed by signal {signal:?}").as_bytes());
                -1
            }
            (None, None) => {
                return Err(ExecError::Transport(format!(
                    "{}: channel closed without exit status",
                    self.host
                )));
            }
        };

        Ok(RawOutput {
            status,
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl Session for SshSession {
    async fn execute(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
    ) -> Result<RawOutput, ExecError> {
        self.run_channel(command, input, None).await
    }

    async fn execute_streaming(
        &mut self,
        command: &str,
        input: Option<&[u8]>,
        lines: &LineSender,
    ) -> Result<RawOutput, ExecError> {
        self.run_channel(command, input, Some(lines)).await
    }

    async fn open_file(
        &mut self,
        path: &str,
        mode: FileMode,
    ) -> Result<Box<dyn FileChannel>, ExecError> {
        let command = match mode {
            FileMode::Read => format!("cat -- {}", shell::quote(path)),
            FileMode::Write => format!("cat > {}", shell::quote(path)),
        };
        debug!(host = %self.host, command = %command, "opening file channel");
        let channel = self.exec_channel(&command).await?;

        Ok(Box::new(SshFileChannel {
            channel,
            path: path.to_string(),
            mode,
            status: None,
            stderr: Vec::new(),
            drained: false,
        }))
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(host = %self.host, error = %e, "disconnect on a dead session");
        }
        info!(host = %self.host, "SSH disconnected");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed && !self.handle.is_closed()
    }
}

/// `cat`-backed file channel
struct SshFileChannel {
    channel: Channel<client::Msg>,
    path: String,
    mode: FileMode,
    status: Option<i32>,
    stderr: Vec<u8>,
    drained: bool,
}

impl SshFileChannel {
    /// Record one channel message, returning its payload if it carried stdout
    fn observe(&mut self, msg: Option<ChannelMsg>) -> Option<Vec<u8>> {
        match msg {
            Some(ChannelMsg::Data { data }) => return Some(data.to_vec()),
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == STDERR_STREAM => {
                self.stderr.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                self.status = Some(exit_status.cast_signed());
            }
            Some(_) => {}
            None => self.drained = true,
        }
        None
    }

    fn outcome(&self) -> Result<(), ExecError> {
        match self.status {
            Some(0) => Ok(()),
            _ => {
                let stderr = String::from_utf8_lossy(&self.stderr);
                if stderr.contains("No such file") {
                    Err(ExecError::NotFound(self.path.clone()))
                } else {
                    Err(ExecError::Transfer {
                        path: self.path.clone(),
                        reason: format!("cat exited with {:?}: {}", self.status, stderr.trim()),
                    })
                }
            }
        }
    }

    async fn drain(&mut self) {
        while !self.drained {
            let msg = self.channel.wait().await;
            // Data after the writer finished is not expected; drop it
            let _ = self.observe(msg);
        }
    }
}

#[async_trait]
impl FileChannel for SshFileChannel {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, ExecError> {
        while !self.drained {
            let msg = self.channel.wait().await;
            if let Some(data) = self.observe(msg) {
                return Ok(Some(data));
            }
        }
        self.outcome().map(|()| None)
    }

    async fn write_chunk(&mut self, data: &[u8]) -> Result<usize, ExecError> {
        if self.mode != FileMode::Write {
            return Err(ExecError::Transfer {
                path: self.path.clone(),
                reason: "channel opened for reading".into(),
            });
        }
        self.channel.data(data).await.map_err(transport)?;
        Ok(data.len())
    }

    async fn finish(mut self: Box<Self>) -> Result<(), ExecError> {
        if self.mode == FileMode::Write {
            self.channel.eof().await.map_err(transport)?;
        }
        self.drain().await;
        self.outcome()
    }
}

/// Builder for `SshConnector`
pub struct SshConnectorBuilder {
    conn_info: ConnectionInfo,
    password: Option<String>,
    key_source: Option<KeySource>,
    passphrase: Option<String>,
    keepalive_interval: Option<Duration>,
}

impl SshConnectorBuilder {
    /// Create builder with required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            conn_info: ConnectionInfo::new(host, user),
            password: None,
            key_source: None,
            passphrase: None,
            keepalive_interval: None,
        }
    }

    /// Authenticate with a password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set SSH key path
    #[must_use]
    pub fn with_key_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.key_source = Some(KeySource::Path(path.into()));
        self
    }

    /// Set key from environment variable (base64)
    #[must_use]
    pub fn with_env_key(mut self, var_name: impl Into<String>) -> Self {
        self.key_source = Some(KeySource::Env(var_name.into()));
        self
    }

    /// Passphrase for an encrypted key
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.conn_info.port = port;
        self
    }

    /// Keep-alive interval for sessions
    #[must_use]
    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Build the connector
    ///
    /// A key takes precedence over a password when both are set.
    ///
    /// # Errors
    /// Returns `ExecError::SshKeyError` if key resolution fails and
    /// `ExecError::ConfigError` if no authentication method was given
    pub fn build(self) -> Result<SshConnector, ExecError> {
        let credentials = match (self.key_source, self.password) {
            (Some(source), _) => Credentials::key(&source, self.passphrase)
                .map_err(|e: KeyError| ExecError::SshKeyError(e.to_string()))?,
            (None, Some(password)) => Credentials::password(password),
            (None, None) => {
                return Err(ExecError::ConfigError(format!(
                    "no password or key configured for {}",
                    self.conn_info.target()
                )));
            }
        };
        Ok(SshConnector::new(self.conn_info, credentials).with_keepalive(self.keepalive_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_credentials() {
        let err = SshConnectorBuilder::new("10.0.0.5", "root").build().unwrap_err();
        assert!(matches!(err, ExecError::ConfigError(_)));
    }

    #[test]
    fn test_builder_password() {
        let connector = SshConnectorBuilder::new("10.0.0.5", "admin")
            .with_password("secret")
            .with_port(2222)
            .build()
            .unwrap();
        assert_eq!(connector.target(), "admin@10.0.0.5:2222");
        assert_eq!(connector.transport_type(), "ssh");
        assert!(!format!("{connector:?}").contains("secret"));
    }

    #[test]
    fn test_builder_bad_key_path() {
        let err = SshConnectorBuilder::new("10.0.0.5", "root")
            .with_key_path("/nonexistent/id_rsa")
            .build()
            .unwrap_err();
        assert!(matches!(err, ExecError::SshKeyError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_not_retryable() {
        // Port 1 on localhost refuses connections on any sane test machine
        let connector = SshConnectorBuilder::new("127.0.0.1", "root")
            .with_password("x")
            .with_port(1)
            .build()
            .unwrap();
        let err = connector
            .connect(Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExecError::ConnectionFailed(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    #[ignore = "requires SSH server"]
    async fn test_ssh_round_trip() {
        let connector = SshConnectorBuilder::new("127.0.0.1", "root")
            .with_key_path("/root/.ssh/id_ed25519")
            .build()
            .unwrap();
        let mut session = connector.connect(Duration::from_secs(10)).await.unwrap();
        let out = session.execute("echo hello", None).await.unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout, b"hello\n");
        session.close().await.unwrap();
    }
}
