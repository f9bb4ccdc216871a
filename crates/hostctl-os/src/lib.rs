//! hostctl-os: OS and distribution detection
//!
//! Classifies a host's distribution family, init system and package manager
//! by running a table of probe commands through its executor.

pub mod detector;
pub mod error;
pub mod probe;
pub mod types;

pub use detector::Detector;
pub use error::DetectError;
pub use probe::{DEFAULT_PACKAGE_PRECEDENCE, Fact, ProbeRule, ProbeTable, ProbeTrace};
pub use types::{Classification, InitSystem, PackageManagerKind, ReleaseInfo};
