//! Capability and strategy names

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResourceError;

/// Logical resource family a caller can ask a host for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Service,
    Package,
    Filesystem,
    Network,
    User,
}

impl Capability {
    /// Every capability, in display order
    pub const ALL: [Capability; 5] = [
        Capability::Service,
        Capability::Package,
        Capability::Filesystem,
        Capability::Network,
        Capability::User,
    ];

    /// Capability name as accepted by [`FromStr`]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Service => "service",
            Capability::Package => "package",
            Capability::Filesystem => "filesystem",
            Capability::Network => "network",
            Capability::User => "user",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "service" => Ok(Capability::Service),
            "package" => Ok(Capability::Package),
            "filesystem" | "fs" => Ok(Capability::Filesystem),
            "network" => Ok(Capability::Network),
            "user" | "users" => Ok(Capability::User),
            other => Err(ResourceError::Unsupported(format!("unknown capability {other}"))),
        }
    }
}

/// Concrete OS-specific implementation of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Systemd,
    #[serde(rename = "sysvinit")]
    SysVinit,
    Upstart,
    Apt,
    Dnf,
    Yum,
    Rpm,
    Posix,
    Iproute2,
    Shadow,
}

impl StrategyKind {
    /// Capability this strategy implements
    #[must_use]
    pub fn capability(self) -> Capability {
        match self {
            StrategyKind::Systemd | StrategyKind::SysVinit | StrategyKind::Upstart => {
                Capability::Service
            }
            StrategyKind::Apt | StrategyKind::Dnf | StrategyKind::Yum | StrategyKind::Rpm => {
                Capability::Package
            }
            StrategyKind::Posix => Capability::Filesystem,
            StrategyKind::Iproute2 => Capability::Network,
            StrategyKind::Shadow => Capability::User,
        }
    }

    /// Strategy name for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Systemd => "systemd",
            StrategyKind::SysVinit => "sysvinit",
            StrategyKind::Upstart => "upstart",
            StrategyKind::Apt => "apt",
            StrategyKind::Dnf => "dnf",
            StrategyKind::Yum => "yum",
            StrategyKind::Rpm => "rpm",
            StrategyKind::Posix => "posix",
            StrategyKind::Iproute2 => "iproute2",
            StrategyKind::Shadow => "shadow",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parse() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
        assert_eq!("Service".parse::<Capability>().unwrap(), Capability::Service);
        assert!("power".parse::<Capability>().unwrap_err().is_unsupported());
    }

    #[test]
    fn test_strategy_capability() {
        assert_eq!(StrategyKind::Upstart.capability(), Capability::Service);
        assert_eq!(StrategyKind::Rpm.capability(), Capability::Package);
        assert_eq!(StrategyKind::Shadow.capability(), Capability::User);
    }
}
