//! File transfer over an executor's file channels with integrity checks

use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument, warn};

use crate::error::ExecError;
use crate::result::CommandRequest;
use crate::traits::{FileMode, RemoteExecutor};

/// Exit status of a shell that could not find the command
const COMMAND_NOT_FOUND: i32 = 127;

/// Outcome of a verified transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Remote path
    pub path: String,
    /// Bytes transferred
    pub bytes: u64,
    /// Hex SHA-256 of the content
    pub sha256: String,
    /// Whether the remote checksum could be compared
    pub checksum_verified: bool,
}

/// Streams file content to and from one host
///
/// A transfer that fails verification is reported, never retried: the caller
/// decides whether to re-invoke it.
#[derive(Clone)]
pub struct FileTransfer {
    executor: Arc<dyn RemoteExecutor>,
}

impl std::fmt::Debug for FileTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransfer")
            .field("executor", &self.executor.executor_type())
            .finish()
    }
}

impl FileTransfer {
    /// Create a transfer helper bound to `executor`
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Upload an in-memory payload to `remote_path`
    ///
    /// # Errors
    /// Returns `ExecError::Transfer` on a short write or size/checksum
    /// mismatch, or any execution error from the verification commands
    pub async fn upload(&self, data: &[u8], remote_path: &str) -> Result<TransferReport, ExecError> {
        self.upload_stream(data, remote_path).await
    }

    /// Upload everything `reader` yields to `remote_path`
    ///
    /// # Errors
    /// Same as [`upload`](Self::upload), plus local read errors
    #[instrument(skip(self, reader))]
    pub async fn upload_stream<R>(
        &self,
        mut reader: R,
        remote_path: &str,
    ) -> Result<TransferReport, ExecError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut channel = self.executor.open_file(remote_path, FileMode::Write).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.executor.chunk_size().max(1)];
        let mut total = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            let written = channel.write_chunk(chunk).await?;
            if written < n {
                return Err(ExecError::Transfer {
                    path: remote_path.to_string(),
                    reason: format!("short write: {written} of {n} bytes accepted"),
                });
            }
            hasher.update(chunk);
            total += n as u64;
        }
        channel.finish().await?;

        let sha256 = format!("{:x}", hasher.finalize());
        let report = self.verify(remote_path, total, sha256).await?;
        info!(path = remote_path, bytes = report.bytes, "upload verified");
        Ok(report)
    }

    /// Download `remote_path` into memory
    ///
    /// # Errors
    /// Returns `ExecError::NotFound` if the file does not exist and
    /// `ExecError::Transfer` on size/checksum mismatch
    #[instrument(skip(self))]
    pub async fn download(&self, remote_path: &str) -> Result<Vec<u8>, ExecError> {
        let mut channel = self.executor.open_file(remote_path, FileMode::Read).await?;
        let mut hasher = Sha256::new();
        let mut data = Vec::new();

        while let Some(chunk) = channel.read_chunk().await? {
            hasher.update(&chunk);
            data.extend_from_slice(&chunk);
        }
        channel.finish().await?;

        let sha256 = format!("{:x}", hasher.finalize());
        let report = self.verify(remote_path, data.len() as u64, sha256).await?;
        info!(path = remote_path, bytes = report.bytes, "download verified");
        Ok(data)
    }

    /// Upload a local file
    ///
    /// # Errors
    /// Same as [`upload_stream`](Self::upload_stream)
    pub async fn upload_file(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<TransferReport, ExecError> {
        let file = tokio::fs::File::open(local_path).await?;
        self.upload_stream(file, remote_path).await
    }

    /// Download to a local file, replacing it
    ///
    /// # Errors
    /// Same as [`download`](Self::download), plus local write errors
    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<u64, ExecError> {
        let data = self.download(remote_path).await?;
        tokio::fs::write(local_path, &data).await?;
        Ok(data.len() as u64)
    }

    /// Copy a file from this host to another one
    ///
    /// # Errors
    /// Any download error from this host or upload error on `dest`
    pub async fn transfer(
        &self,
        src_path: &str,
        dest: &FileTransfer,
        dest_path: &str,
    ) -> Result<TransferReport, ExecError> {
        let data = self.download(src_path).await?;
        dest.upload(&data, dest_path).await
    }

    /// Compare the remote size and, when possible, checksum
    async fn verify(
        &self,
        remote_path: &str,
        expected_len: u64,
        sha256: String,
    ) -> Result<TransferReport, ExecError> {
        let remote_len = self.remote_size(remote_path).await?;
        if remote_len != expected_len {
            return Err(ExecError::Transfer {
                path: remote_path.to_string(),
                reason: format!("size mismatch: local {expected_len}, remote {remote_len}"),
            });
        }

        let checksum_verified = match self.remote_sha256(remote_path).await? {
            Some(remote) if remote == sha256 => true,
            Some(remote) => {
                return Err(ExecError::Transfer {
                    path: remote_path.to_string(),
                    reason: format!("checksum mismatch: local {sha256}, remote {remote}"),
                });
            }
            None => {
                warn!(path = remote_path, "sha256sum unavailable, checked size only");
                false
            }
        };

        Ok(TransferReport {
            path: remote_path.to_string(),
            bytes: expected_len,
            sha256,
            checksum_verified,
        })
    }

    async fn remote_size(&self, remote_path: &str) -> Result<u64, ExecError> {
        let request = CommandRequest::new(["wc", "-c", remote_path]).with_retry(true);
        let result = self.executor.run(&request).await?;
        if !result.success() {
            return Err(missing_or_failed(remote_path, &result.stderr));
        }
        result
            .stdout
            .split_whitespace()
            .next()
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| ExecError::Transfer {
                path: remote_path.to_string(),
                reason: format!("unreadable size output: {}", result.stdout.trim()),
            })
    }

    async fn remote_sha256(&self, remote_path: &str) -> Result<Option<String>, ExecError> {
        let request = CommandRequest::new(["sha256sum", remote_path]).with_retry(true);
        let result = self.executor.run(&request).await?;
        if result.status == COMMAND_NOT_FOUND {
            return Ok(None);
        }
        if !result.success() {
            return Err(missing_or_failed(remote_path, &result.stderr));
        }
        let digest = parse_sha256(&result.stdout);
        if digest.is_none() {
            debug!(output = %result.stdout.trim(), "no digest in sha256sum output");
        }
        Ok(digest)
    }
}

fn missing_or_failed(path: &str, stderr: &str) -> ExecError {
    if stderr.contains("No such file") {
        ExecError::NotFound(path.to_string())
    } else {
        ExecError::Transfer {
            path: path.to_string(),
            reason: stderr.trim().to_string(),
        }
    }
}

fn parse_sha256(output: &str) -> Option<String> {
    let token = output.split_whitespace().next()?;
    (token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| token.to_ascii_lowercase())
}
