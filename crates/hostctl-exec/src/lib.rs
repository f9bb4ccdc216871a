//! hostctl-exec: Remote execution abstraction
//!
//! Provides the transport traits, an executor with reconnect-and-retry
//! policy, and SSH and local transports. File transfer with size and
//! checksum verification is built on the same executor.

pub mod config;
pub mod error;
pub mod executor;
pub mod keys;
pub mod local;
pub mod result;
pub mod shell;
pub mod ssh;
pub mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;
pub mod transfer;

pub use config::ExecConfig;
pub use error::ExecError;
pub use executor::Executor;
pub use keys::{Credentials, KeySource};
pub use local::LocalConnector;
pub use result::{CommandRequest, CommandResult, ConnectionInfo, RawOutput};
pub use ssh::{SshConnector, SshConnectorBuilder};
pub use stream::LineSender;
pub use traits::{Connector, FileChannel, FileMode, RemoteExecutor, Session};
pub use transfer::{FileTransfer, TransferReport};
