//! hostctl-core: Host abstraction
//!
//! A `Host` owns one executor, detects its OS once and hands out resource
//! managers bound to that executor.

pub mod config;
pub mod error;
pub mod host;
mod ssh_keys;

pub use config::{HostConfig, Settings};
pub use error::CoreError;
pub use host::Host;
