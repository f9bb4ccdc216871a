//! `Host`: one managed machine
//!
//! Owns the machine's executor, caches its OS classification and the
//! resource managers built for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hostctl_exec::{
    CommandRequest, CommandResult, Connector, ExecConfig, Executor, FileTransfer, LineSender,
    LocalConnector, RemoteExecutor, SshConnectorBuilder,
};
use hostctl_os::{
    Classification, DEFAULT_PACKAGE_PRECEDENCE, Detector, PackageManagerKind, ProbeTable,
};
use hostctl_resources::{
    Capability, DispatchTable, FilesystemManager, NetworkManager, PackageManager,
    ResourceManager, ServiceManager, UserManager,
};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::{HostConfig, Settings};
use crate::error::CoreError;

/// A managed machine reached through one executor
pub struct Host {
    name: String,
    executor: Arc<Executor>,
    transfer: FileTransfer,
    sudo: bool,
    precedence: Vec<PackageManagerKind>,
    dispatch: DispatchTable,
    classification: Mutex<Option<Classification>>,
    managers: Mutex<HashMap<Capability, ResourceManager>>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("executor", &self.executor)
            .field("sudo", &self.sudo)
            .field("precedence", &self.precedence)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Create a host over `connector`; nothing connects until first use
    pub fn new(name: impl Into<String>, connector: Arc<dyn Connector>, config: ExecConfig) -> Self {
        let executor = Arc::new(Executor::new(connector, config));
        let remote: Arc<dyn RemoteExecutor> = executor.clone();
        Self {
            name: name.into(),
            transfer: FileTransfer::new(remote),
            executor,
            sudo: false,
            precedence: DEFAULT_PACKAGE_PRECEDENCE.to_vec(),
            dispatch: DispatchTable::default(),
            classification: Mutex::new(None),
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Host running commands on this machine
    #[must_use]
    pub fn local() -> Self {
        Self::new("localhost", Arc::new(LocalConnector::new()), ExecConfig::default())
    }

    /// Build a host from its configuration entry
    ///
    /// `localhost` addresses use the local transport; everything else goes
    /// over SSH, preferring a key file, then an environment key, then a
    /// password.
    ///
    /// # Errors
    /// Returns `CoreError::ConfigError` for invalid settings and
    /// `CoreError::Exec` when no credentials are configured or the key
    /// cannot be loaded
    pub fn from_config(config: &HostConfig, settings: &Settings) -> Result<Self, CoreError> {
        let exec_config = config.exec_config(settings)?;

        let connector: Arc<dyn Connector> = if config.is_local() {
            Arc::new(LocalConnector::new())
        } else {
            let mut builder = SshConnectorBuilder::new(&config.addr, &config.user)
                .with_port(config.port)
                .with_keepalive(exec_config.keepalive_interval);
            if let Some(path) = &config.ssh_key {
                builder = builder.with_key_path(path);
            } else if let Some(var) = &config.ssh_key_env {
                builder = builder.with_env_key(var);
            }
            if let Some(passphrase) = &config.ssh_key_passphrase {
                builder = builder.with_passphrase(passphrase.expose_secret().as_str());
            }
            if let Some(password) = &config.password {
                builder = builder.with_password(password.expose_secret().as_str());
            }
            Arc::new(builder.build()?)
        };

        Ok(Self::new(&config.name, connector, exec_config)
            .with_sudo(config.sudo)
            .with_precedence(config.precedence()))
    }

    /// Prefix resource manager commands with sudo
    #[must_use]
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Package manager precedence used by detection
    #[must_use]
    pub fn with_precedence(mut self, precedence: Vec<PackageManagerKind>) -> Self {
        self.precedence = precedence;
        self
    }

    /// Replace the capability dispatch table
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: DispatchTable) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Host name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether resource commands are prefixed with sudo
    #[must_use]
    pub fn uses_sudo(&self) -> bool {
        self.sudo
    }

    /// The host's executor
    #[must_use]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    fn remote(&self) -> Arc<dyn RemoteExecutor> {
        self.executor.clone()
    }

    /// Run a command, successful or not
    ///
    /// # Errors
    /// Any execution error from the executor
    pub async fn run(&self, request: &CommandRequest) -> Result<CommandResult, CoreError> {
        Ok(self.executor.run(request).await?)
    }

    /// Run a command, sending each stdout line to `lines` as it is produced
    ///
    /// # Errors
    /// Any execution error from the executor; streamed commands are not retried
    pub async fn run_streaming(
        &self,
        request: &CommandRequest,
        lines: LineSender,
    ) -> Result<CommandResult, CoreError> {
        Ok(self.executor.run_streaming(request, lines).await?)
    }

    /// Run a command and return its stdout
    ///
    /// # Errors
    /// Returns `CoreError::Exec(CommandFailed)` on an unaccepted exit code
    pub async fn run_checked(&self, request: &CommandRequest) -> Result<String, CoreError> {
        Ok(self.executor.run_checked(request).await?)
    }

    /// Cached OS classification, detecting it on first use
    ///
    /// # Errors
    /// Returns `CoreError::Detect` if the probes identify no OS family
    #[instrument(skip(self), fields(host = %self.name))]
    pub async fn classification(&self) -> Result<Classification, CoreError> {
        let mut cached = self.classification.lock().await;
        if let Some(classification) = cached.as_ref() {
            return Ok(classification.clone());
        }
        let fresh = self.detect().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drop the cached classification and managers, then detect again
    ///
    /// # Errors
    /// Same as [`classification`](Self::classification)
    #[instrument(skip(self), fields(host = %self.name))]
    pub async fn force_redetect(&self) -> Result<Classification, CoreError> {
        let mut cached = self.classification.lock().await;
        *cached = None;
        self.managers.lock().await.clear();
        let fresh = self.detect().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    async fn detect(&self) -> Result<Classification, CoreError> {
        let table = ProbeTable::with_precedence(&self.precedence)?;
        Ok(Detector::with_table(self.remote(), table).detect().await?)
    }

    /// Manager for `capability`, built on first request and cached
    ///
    /// # Errors
    /// Returns `CoreError::Detect` if classification fails and an
    /// unsupported `CoreError::Resource` if the classification has no
    /// strategy for `capability`
    #[instrument(skip(self), fields(host = %self.name))]
    pub async fn manager(&self, capability: Capability) -> Result<ResourceManager, CoreError> {
        if let Some(manager) = self.managers.lock().await.get(&capability) {
            return Ok(manager.clone());
        }

        let classification = self.classification().await?;
        let strategy = self.dispatch.resolve(capability, &classification)?;
        let manager = ResourceManager::build(strategy, self.remote(), self.sudo);
        debug!(%capability, %strategy, "manager built");

        let mut managers = self.managers.lock().await;
        Ok(managers.entry(capability).or_insert(manager).clone())
    }

    /// Manager for a capability given by name ("service", "package", ...)
    ///
    /// # Errors
    /// Returns an unsupported `CoreError::Resource` for unknown names, and
    /// everything [`manager`](Self::manager) returns
    pub async fn get_resource(&self, capability: &str) -> Result<ResourceManager, CoreError> {
        let capability: Capability = capability.parse()?;
        self.manager(capability).await
    }

    /// Service manager for this host
    ///
    /// # Errors
    /// Same as [`manager`](Self::manager)
    pub async fn service(&self) -> Result<Arc<dyn ServiceManager>, CoreError> {
        Ok(self.manager(Capability::Service).await?.service()?)
    }

    /// Package manager for this host
    ///
    /// # Errors
    /// Same as [`manager`](Self::manager)
    pub async fn package(&self) -> Result<Arc<dyn PackageManager>, CoreError> {
        Ok(self.manager(Capability::Package).await?.package()?)
    }

    /// Filesystem manager for this host
    ///
    /// # Errors
    /// Same as [`manager`](Self::manager)
    pub async fn filesystem(&self) -> Result<Arc<dyn FilesystemManager>, CoreError> {
        Ok(self.manager(Capability::Filesystem).await?.filesystem()?)
    }

    /// Network manager for this host
    ///
    /// # Errors
    /// Same as [`manager`](Self::manager)
    pub async fn network(&self) -> Result<Arc<dyn NetworkManager>, CoreError> {
        Ok(self.manager(Capability::Network).await?.network()?)
    }

    /// User manager for this host
    ///
    /// # Errors
    /// Same as [`manager`](Self::manager)
    pub async fn users(&self) -> Result<Arc<dyn UserManager>, CoreError> {
        Ok(self.manager(Capability::User).await?.users()?)
    }

    /// File transfer over this host's executor
    #[must_use]
    pub fn transfer(&self) -> &FileTransfer {
        &self.transfer
    }

    /// Whether the host answers within the connect timeout
    pub async fn is_connective(&self) -> bool {
        let timeout = self.executor.config().connect_timeout;
        self.executor.is_connective(timeout).await
    }

    /// Poll until connectivity equals `positive` or `wait` elapses
    pub async fn wait_for_connectivity_state(
        &self,
        positive: bool,
        wait: Duration,
        sample: Duration,
    ) -> bool {
        self.executor
            .wait_for_connectivity_state(positive, wait, sample)
            .await
    }

    /// Close the executor and drop cached managers
    ///
    /// Every later operation fails with `ExecError::Closed`.
    ///
    /// # Errors
    /// Returns an error if the transport fails to close cleanly
    #[instrument(skip(self), fields(host = %self.name))]
    pub async fn close(&self) -> Result<(), CoreError> {
        self.managers.lock().await.clear();
        self.executor.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_credentials() {
        let config = HostConfig::new("web01", "10.0.0.5");
        let err = Host::from_config(&config, &Settings::default()).unwrap_err();
        assert!(matches!(err, CoreError::Exec(_)));
    }

    #[test]
    fn test_from_config_local() {
        let mut config = HostConfig::new("self", "localhost");
        config.sudo = true;
        let host = Host::from_config(&config, &Settings::default()).unwrap();
        assert_eq!(host.name(), "self");
        assert_eq!(host.executor().host(), "localhost");
    }

    #[test]
    fn test_from_config_password() {
        let config: HostConfig = toml::from_str(
            r#"
            name = "db01"
            addr = "10.0.0.7"
            port = 2222
            user = "admin"
            password = "hunter2"
            "#,
        )
        .unwrap();
        let host = Host::from_config(&config, &Settings::default()).unwrap();
        assert_eq!(host.executor().host(), "admin@10.0.0.7:2222");
        assert!(!format!("{host:?}").contains("hunter2"));
    }
}
