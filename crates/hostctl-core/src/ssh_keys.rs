//! SSH key housekeeping on a managed host

use hostctl_exec::CommandRequest;
use tracing::{info, instrument};

use crate::error::CoreError;
use crate::host::Host;

const DEFAULT_USER: &str = "root";

impl Host {
    /// Home directory of `user` from the passwd database
    async fn home_dir(&self, user: &str) -> Result<String, CoreError> {
        let entry = self
            .run_checked(&CommandRequest::new(["getent", "passwd", user]))
            .await?;
        entry
            .lines()
            .next()
            .and_then(|line| line.split(':').nth(5))
            .filter(|home| !home.is_empty())
            .map(|home| home.trim_end_matches('/').to_string())
            .ok_or_else(|| CoreError::ConfigError(format!("no home directory for {user}")))
    }

    /// Public RSA key of `user` (root by default), generated if missing
    ///
    /// # Errors
    /// Returns an error if the user is unknown or key generation fails
    #[instrument(skip(self), fields(host = %self.name()))]
    pub async fn ssh_public_key(&self, user: Option<&str>) -> Result<String, CoreError> {
        let home = self.home_dir(user.unwrap_or(DEFAULT_USER)).await?;
        let private = format!("{home}/.ssh/id_rsa");
        let public = format!("{private}.pub");
        let fs = self.filesystem().await?;

        if !fs.exists(&public).await? {
            let keygen = ["ssh-keygen", "-q", "-t", "rsa", "-N", "", "-f", private.as_str()];
            self.run_checked(&CommandRequest::new(keygen).with_sudo(self.uses_sudo()))
                .await?;
            info!(path = %public, "generated SSH key pair");
        }

        Ok(fs.read_file(&public).await?.trim().to_string())
    }

    /// Drop `names` (addresses or host names) from `user`'s known_hosts
    ///
    /// A missing known_hosts file is left alone.
    ///
    /// # Errors
    /// Returns an error if `ssh-keygen -R` fails for any name
    #[instrument(skip(self), fields(host = %self.name()))]
    pub async fn remove_known_host(&self, names: &[&str], user: Option<&str>) -> Result<(), CoreError> {
        let home = self.home_dir(user.unwrap_or(DEFAULT_USER)).await?;
        let known_hosts = format!("{home}/.ssh/known_hosts");
        if !self.filesystem().await?.exists(&known_hosts).await? {
            return Ok(());
        }

        for name in names {
            let request = CommandRequest::new(["ssh-keygen", "-R", *name, "-f", known_hosts.as_str()])
                .with_sudo(self.uses_sudo());
            self.run_checked(&request).await?;
        }
        Ok(())
    }

    /// Remove every authorized key of `user` whose line contains `pattern`
    ///
    /// Returns how many keys were removed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or rewritten
    #[instrument(skip(self), fields(host = %self.name()))]
    pub async fn remove_authorized_key(
        &self,
        pattern: &str,
        user: Option<&str>,
    ) -> Result<usize, CoreError> {
        if pattern.is_empty() {
            return Err(CoreError::ConfigError("empty authorized key pattern".into()));
        }
        let home = self.home_dir(user.unwrap_or(DEFAULT_USER)).await?;
        let authorized = format!("{home}/.ssh/authorized_keys");
        let fs = self.filesystem().await?;
        if !fs.exists(&authorized).await? {
            return Ok(0);
        }

        let content = fs.read_file(&authorized).await?;
        let kept: Vec<&str> = content.lines().filter(|l| !l.contains(pattern)).collect();
        let removed = content.lines().count() - kept.len();
        if removed > 0 {
            let mut rewritten = kept.join("\n");
            if !rewritten.is_empty() {
                rewritten.push('\n');
            }
            fs.create_file(&rewritten, &authorized).await?;
            info!(path = %authorized, removed, "authorized keys removed");
        }
        Ok(removed)
    }
}
