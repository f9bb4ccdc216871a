//! Classification type definitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DetectError;

/// Init system running on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystem {
    /// systemd (systemctl)
    Systemd,
    /// SysV init scripts (service/chkconfig)
    #[serde(rename = "sysvinit")]
    SysVinit,
    /// Upstart (initctl)
    Upstart,
}

impl InitSystem {
    /// Name used in configuration, logs and the dispatch table
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::SysVinit => "sysvinit",
            InitSystem::Upstart => "upstart",
        }
    }
}

impl fmt::Display for InitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitSystem {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "systemd" => Ok(InitSystem::Systemd),
            "sysvinit" | "sysv" => Ok(InitSystem::SysVinit),
            "upstart" | "initctl" => Ok(InitSystem::Upstart),
            other => Err(DetectError::UnknownKind(format!("init system {other}"))),
        }
    }
}

/// Package manager available on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    /// Debian family (apt-get/dpkg)
    Apt,
    /// Fedora and RHEL 8+
    Dnf,
    /// RHEL/CentOS 7 and older
    Yum,
    /// Bare rpm, no dependency resolution
    Rpm,
}

impl PackageManagerKind {
    /// Binary whose presence marks this package manager
    #[must_use]
    pub fn binary(self) -> &'static str {
        match self {
            PackageManagerKind::Apt => "apt-get",
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Yum => "yum",
            PackageManagerKind::Rpm => "rpm",
        }
    }

    /// Name used in configuration, logs and the dispatch table
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PackageManagerKind::Apt => "apt",
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Yum => "yum",
            PackageManagerKind::Rpm => "rpm",
        }
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageManagerKind {
    type Err = DetectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apt" | "apt-get" => Ok(PackageManagerKind::Apt),
            "dnf" => Ok(PackageManagerKind::Dnf),
            "yum" => Ok(PackageManagerKind::Yum),
            "rpm" => Ok(PackageManagerKind::Rpm),
            other => Err(DetectError::UnknownKind(format!("package manager {other}"))),
        }
    }
}

/// Fields parsed from `/etc/os-release`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// `ID` (debian, rhel, ...)
    pub id: Option<String>,
    /// `NAME` (Debian GNU/Linux, ...)
    pub name: Option<String>,
    /// `VERSION_ID` (12, 9.3, ...)
    pub version_id: Option<String>,
    /// `VERSION_CODENAME` (bookworm, ...)
    pub codename: Option<String>,
}

impl ReleaseInfo {
    /// Parse `KEY=value` lines, unquoting values
    ///
    /// Returns `None` when none of the known keys is present.
    #[must_use]
    pub fn parse(os_release: &str) -> Option<Self> {
        let mut info = ReleaseInfo::default();
        for line in os_release.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
            if value.is_empty() {
                continue;
            }
            match key {
                "ID" => info.id = Some(value),
                "NAME" => info.name = Some(value),
                "VERSION_ID" => info.version_id = Some(value),
                "VERSION_CODENAME" => info.codename = Some(value),
                _ => {}
            }
        }
        (info != ReleaseInfo::default()).then_some(info)
    }
}

/// What the detector concluded about a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Distribution identity (debian, ubuntu, rhel, ...)
    pub family: String,
    /// Init system, if any probe identified one
    pub init: Option<InitSystem>,
    /// Package manager, if any probe identified one
    pub package_manager: Option<PackageManagerKind>,
    /// Release details, when `/etc/os-release` was readable
    pub release: Option<ReleaseInfo>,
    /// When detection ran
    pub detected_at: DateTime<Utc>,
}

impl Classification {
    /// Create a classification with only the family set
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            init: None,
            package_manager: None,
            release: None,
            detected_at: Utc::now(),
        }
    }

    /// Set the init system
    #[must_use]
    pub fn with_init(mut self, init: InitSystem) -> Self {
        self.init = Some(init);
        self
    }

    /// Set the package manager
    #[must_use]
    pub fn with_package_manager(mut self, kind: PackageManagerKind) -> Self {
        self.package_manager = Some(kind);
        self
    }

    /// Same family, init system and package manager
    ///
    /// Ignores the detection timestamp and release details.
    #[must_use]
    pub fn same_kind(&self, other: &Classification) -> bool {
        self.family == other.family
            && self.init == other.init
            && self.package_manager == other.package_manager
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let init = self.init.map_or("unknown", InitSystem::as_str);
        let pkg = self.package_manager.map_or("unknown", PackageManagerKind::as_str);
        write!(f, "{} (init: {init}, pkg: {pkg})", self.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBIAN: &str = r#"PRETTY_NAME="Debian GNU/Linux 12 (bookworm)"
NAME="Debian GNU/Linux"
VERSION_ID="12"
VERSION_CODENAME=bookworm
ID=debian
"#;

    #[test]
    fn test_parse_os_release() {
        let info = ReleaseInfo::parse(DEBIAN).unwrap();
        assert_eq!(info.id.as_deref(), Some("debian"));
        assert_eq!(info.name.as_deref(), Some("Debian GNU/Linux"));
        assert_eq!(info.version_id.as_deref(), Some("12"));
        assert_eq!(info.codename.as_deref(), Some("bookworm"));
    }

    #[test]
    fn test_parse_os_release_without_known_keys() {
        assert_eq!(ReleaseInfo::parse("garbage\nFOO=bar\n"), None);
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in [
            PackageManagerKind::Apt,
            PackageManagerKind::Dnf,
            PackageManagerKind::Yum,
            PackageManagerKind::Rpm,
        ] {
            assert_eq!(kind.as_str().parse::<PackageManagerKind>().unwrap(), kind);
        }
        assert_eq!("sysv".parse::<InitSystem>().unwrap(), InitSystem::SysVinit);
        assert!("launchd".parse::<InitSystem>().is_err());
    }

    #[test]
    fn test_display() {
        let c = Classification::new("debian")
            .with_init(InitSystem::Systemd)
            .with_package_manager(PackageManagerKind::Apt);
        assert_eq!(c.to_string(), "debian (init: systemd, pkg: apt)");
        assert_eq!(Classification::new("alpine").to_string(), "alpine (init: unknown, pkg: unknown)");
    }
}
