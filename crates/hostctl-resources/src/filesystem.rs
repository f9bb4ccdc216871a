//! POSIX filesystem strategy

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use hostctl_exec::{FileTransfer, RemoteExecutor, TransferReport, shell};
use tracing::{info, instrument};

use crate::capability::StrategyKind;
use crate::error::ResourceError;
use crate::runner::Runner;
use crate::traits::FilesystemManager;

/// Filesystem access through coreutils
///
/// `put` and `get` stream through the executor's file channels; file
/// channels do not go through sudo, so they run with the login user's
/// permissions.
#[derive(Debug, Clone)]
pub struct PosixFilesystem {
    runner: Runner,
    transfer: FileTransfer,
}

impl PosixFilesystem {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            transfer: FileTransfer::new(Arc::clone(&executor)),
            runner: Runner::new(executor, use_sudo),
        }
    }

    async fn test_flag(&self, flag: &str, path: &str) -> Result<bool, ResourceError> {
        self.runner
            .test(self.runner.argv(["test", flag, path]))
            .await
    }

    async fn check<const N: usize>(&self, argv: [&str; N]) -> Result<String, ResourceError> {
        Ok(self.runner.check(self.runner.argv(argv)).await?.stdout)
    }

    /// Write `content` through stdin so it never appears on a command line
    async fn write(&self, content: &str, path: &str) -> Result<(), ResourceError> {
        let request = self
            .runner
            .script(format!("cat > {}", shell::quote(path)))
            .with_input(content);
        self.runner.check(request).await?;
        Ok(())
    }
}

#[async_trait]
impl FilesystemManager for PosixFilesystem {
    async fn exists(&self, path: &str) -> Result<bool, ResourceError> {
        self.test_flag("-e", path).await
    }

    async fn is_file(&self, path: &str) -> Result<bool, ResourceError> {
        self.test_flag("-f", path).await
    }

    async fn is_dir(&self, path: &str) -> Result<bool, ResourceError> {
        self.test_flag("-d", path).await
    }

    async fn is_executable(&self, path: &str) -> Result<bool, ResourceError> {
        self.test_flag("-x", path).await
    }

    async fn remove(&self, path: &str) -> Result<(), ResourceError> {
        self.check(["rm", "-f", path]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rmdir(&self, path: &str) -> Result<(), ResourceError> {
        if path.trim_end_matches('/').is_empty() {
            return Err(ResourceError::InvalidArgument(
                "refusing to remove /".into(),
            ));
        }
        self.check(["rm", "-rf", path]).await?;
        info!(path, "directory removed");
        Ok(())
    }

    async fn listdir(&self, path: &str) -> Result<Vec<String>, ResourceError> {
        let stdout = self.check(["ls", "-A1", path]).await?;
        Ok(stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn touch(&self, path: &str) -> Result<(), ResourceError> {
        self.check(["touch", path]).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, ResourceError> {
        self.check(["cat", path]).await
    }

    async fn create_file(&self, content: &str, path: &str) -> Result<(), ResourceError> {
        self.write(content, path).await
    }

    async fn create_script(&self, content: &str, path: &str) -> Result<(), ResourceError> {
        self.write(content, path).await?;
        self.chmod(path, "+x").await
    }

    async fn mkdir(&self, path: &str, parents: bool, mode: Option<&str>) -> Result<(), ResourceError> {
        let mut argv = vec!["mkdir"];
        if parents {
            argv.push("-p");
        }
        if let Some(mode) = mode {
            argv.extend(["-m", mode]);
        }
        argv.push(path);
        self.runner.check(self.runner.argv(argv)).await?;
        Ok(())
    }

    async fn chown(&self, path: &str, owner: &str, recursive: bool) -> Result<(), ResourceError> {
        if recursive {
            self.check(["chown", "-R", owner, path]).await?;
        } else {
            self.check(["chown", owner, path]).await?;
        }
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: &str) -> Result<(), ResourceError> {
        self.check(["chmod", mode, path]).await?;
        Ok(())
    }

    async fn move_path(&self, source: &str, destination: &str) -> Result<(), ResourceError> {
        self.check(["mv", source, destination]).await?;
        Ok(())
    }

    async fn flush_file(&self, path: &str) -> Result<(), ResourceError> {
        self.check(["truncate", "-s", "0", path]).await?;
        Ok(())
    }

    async fn mktemp_dir(&self) -> Result<String, ResourceError> {
        let path = self.check(["mktemp", "-d"]).await?.trim().to_string();
        if path.is_empty() {
            return Err(ResourceError::ParseError("mktemp printed no path".into()));
        }
        Ok(path)
    }

    #[instrument(skip(self))]
    async fn put(&self, local: &Path, remote: &str) -> Result<TransferReport, ResourceError> {
        Ok(self.transfer.upload_file(local, remote).await?)
    }

    #[instrument(skip(self))]
    async fn get(&self, remote: &str, local: &Path) -> Result<u64, ResourceError> {
        Ok(self.transfer.download_file(remote, local).await?)
    }

    #[instrument(skip(self))]
    async fn wget(&self, url: &str, dir: &str) -> Result<String, ResourceError> {
        let name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ResourceError::InvalidArgument(format!("no file name in {url}")))?;
        let path = format!("{}/{name}", dir.trim_end_matches('/'));

        self.check(["wget", "-q", "-O", &path, url]).await?;
        info!(path, "downloaded");
        Ok(path)
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Posix
    }
}

#[cfg(test)]
mod tests {
    use hostctl_exec::testing::FakeRemote;

    use super::*;

    fn fs(fake: &FakeRemote, sudo: bool) -> PosixFilesystem {
        PosixFilesystem::new(Arc::new(fake.clone()), sudo)
    }

    #[tokio::test]
    async fn test_predicates() {
        let fake = FakeRemote::new()
            .respond("test -e /tmp/x", 0, "", "")
            .respond("test -d /tmp/x", 1, "", "")
            .respond("test -x '/tmp/with space'", 0, "", "");
        let fs = fs(&fake, false);

        assert!(fs.exists("/tmp/x").await.unwrap());
        assert!(!fs.is_dir("/tmp/x").await.unwrap());
        assert!(fs.is_executable("/tmp/with space").await.unwrap());
    }

    #[tokio::test]
    async fn test_rmdir_refuses_root() {
        let fake = FakeRemote::new();
        let fs = fs(&fake, true);

        for root in ["/", "//"] {
            let err = fs.rmdir(root).await.unwrap_err();
            assert!(matches!(err, ResourceError::InvalidArgument(_)));
        }
        assert!(fake.issued().is_empty());
    }

    #[tokio::test]
    async fn test_rmdir_with_sudo() {
        let fake = FakeRemote::new().respond("sudo rm -rf /tmp/dir", 0, "", "");
        fs(&fake, true).rmdir("/tmp/dir").await.unwrap();
        assert_eq!(fake.issued(), ["sudo rm -rf /tmp/dir"]);
    }

    #[tokio::test]
    async fn test_listdir() {
        let fake = FakeRemote::new().respond("ls -A1 /etc/ssh", 0, ".hidden\nsshd_config\n", "");
        let entries = fs(&fake, false).listdir("/etc/ssh").await.unwrap();
        assert_eq!(entries, [".hidden", "sshd_config"]);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let fake = FakeRemote::new().respond(
            "cat /nope",
            1,
            "",
            "cat: /nope: No such file or directory\n",
        );
        let err = fs(&fake, false).read_file("/nope").await.unwrap_err();
        assert!(matches!(err, ResourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_script() {
        let fake = FakeRemote::new()
            .respond("cat > /usr/local/bin/hello", 0, "", "")
            .respond("chmod +x /usr/local/bin/hello", 0, "", "");

        fs(&fake, false)
            .create_script("#!/bin/sh\necho hello\n", "/usr/local/bin/hello")
            .await
            .unwrap();
        assert_eq!(
            fake.issued(),
            ["cat > /usr/local/bin/hello", "chmod +x /usr/local/bin/hello"]
        );
    }

    #[tokio::test]
    async fn test_mkdir_flags() {
        let fake = FakeRemote::new().respond("mkdir -p -m 0750 /srv/app/data", 0, "", "");
        fs(&fake, false)
            .mkdir("/srv/app/data", true, Some("0750"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mktemp_dir() {
        let fake = FakeRemote::new().respond("mktemp -d", 0, "/tmp/tmp.Xa81bQ\n", "");
        assert_eq!(fs(&fake, false).mktemp_dir().await.unwrap(), "/tmp/tmp.Xa81bQ");
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let fake = FakeRemote::new().respond(
            &format!("chown {} /etc/motd", shell::quote("root:root")),
            1,
            "",
            "chown: changing ownership of '/etc/motd': Operation not permitted\n",
        );
        let err = fs(&fake, false)
            .chown("/etc/motd", "root:root", false)
            .await
            .unwrap_err();
        assert!(err.needs_sudo());
    }

    #[tokio::test]
    async fn test_wget_into_dir() {
        let url = "https://example.com/releases/tool-1.2.tar.gz";
        let command = shell::join(&["wget", "-q", "-O", "/opt/dl/tool-1.2.tar.gz", url]);
        let fake = FakeRemote::new().respond(&command, 0, "", "");

        let path = fs(&fake, false).wget(url, "/opt/dl/").await.unwrap();
        assert_eq!(path, "/opt/dl/tool-1.2.tar.gz");
        assert_eq!(fake.issued(), [command]);
    }

    #[tokio::test]
    async fn test_wget_failure_and_bad_url() {
        let url = "http://mirror.local/missing.iso";
        let fake = FakeRemote::new().respond(
            &shell::join(&["wget", "-q", "-O", "/tmp/missing.iso", url]),
            8,
            "",
            "ERROR 404: Not Found.\n",
        );
        let fs = fs(&fake, false);

        let err = fs.wget(url, "/tmp").await.unwrap_err();
        assert!(matches!(err, ResourceError::CommandFailed { status: 8, .. }));

        let err = fs.wget("http://mirror.local/", "/tmp").await.unwrap_err();
        assert!(matches!(err, ResourceError::InvalidArgument(_)));
        assert_eq!(fake.issued().len(), 1);
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let fake = FakeRemote::new();
        let fs = fs(&fake, false);
        let dir = std::env::temp_dir();
        let src = dir.join(format!("hostctl_put_{}", std::process::id()));
        let dst = dir.join(format!("hostctl_get_{}", std::process::id()));
        std::fs::write(&src, b"payload").unwrap();

        let report = fs.put(&src, "/tmp/payload").await.unwrap();
        let bytes = fs.get("/tmp/payload", &dst).await.unwrap();
        let back = std::fs::read(&dst).unwrap();
        std::fs::remove_file(&src).unwrap();
        std::fs::remove_file(&dst).unwrap();

        assert_eq!(report.bytes, 7);
        assert_eq!(bytes, 7);
        assert_eq!(back, b"payload");
    }
}
