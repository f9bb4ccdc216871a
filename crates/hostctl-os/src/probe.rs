//! Probe table: `(command, pattern, fact)` rows evaluated in order
//!
//! Each row contributes one fact about the host when its command exits 0 and
//! its pattern matches the command's stdout. For every field the first
//! matching row wins, so row order is the precedence order. Supporting a new
//! distribution means appending rows, not changing the detector.

use std::fmt;

use regex::Regex;
use serde::Serialize;

use crate::error::DetectError;
use crate::types::{InitSystem, PackageManagerKind};

/// Package manager precedence when several are installed
pub const DEFAULT_PACKAGE_PRECEDENCE: [PackageManagerKind; 4] = [
    PackageManagerKind::Dnf,
    PackageManagerKind::Yum,
    PackageManagerKind::Apt,
    PackageManagerKind::Rpm,
];

const OS_RELEASE: &str = "cat /etc/os-release";
const OS_ID: &str = r#"(?m)^ID="?([A-Za-z0-9._-]+)"?\s*$"#;

/// Classification field a rule decides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Family,
    Init,
    PackageManager,
}

/// What a matching row contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    /// Fixed family name
    Family(String),
    /// Family taken from the pattern's first capture group, lowercased
    FamilyFromCapture,
    /// Init system
    Init(InitSystem),
    /// Package manager
    PackageManager(PackageManagerKind),
}

impl Fact {
    /// Field this fact decides
    #[must_use]
    pub fn field(&self) -> Field {
        match self {
            Fact::Family(_) | Fact::FamilyFromCapture => Field::Family,
            Fact::Init(_) => Field::Init,
            Fact::PackageManager(_) => Field::PackageManager,
        }
    }
}

/// One row of the probe table
#[derive(Debug, Clone)]
pub struct ProbeRule {
    command: String,
    pattern: Regex,
    fact: Fact,
}

impl ProbeRule {
    /// Create a rule
    ///
    /// # Errors
    /// Returns `DetectError::InvalidPattern` if `pattern` is not a valid regex
    pub fn new(command: impl Into<String>, pattern: &str, fact: Fact) -> Result<Self, DetectError> {
        let pattern = Regex::new(pattern).map_err(|e| DetectError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            command: command.into(),
            pattern,
            fact,
        })
    }

    /// Shell command whose stdout is matched
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// What this row contributes when it matches
    #[must_use]
    pub fn fact(&self) -> &Fact {
        &self.fact
    }

    /// Match `stdout`, resolving a captured family
    #[must_use]
    pub fn evaluate(&self, stdout: &str) -> Option<Fact> {
        let caps = self.pattern.captures(stdout)?;
        match &self.fact {
            Fact::FamilyFromCapture => caps
                .get(1)
                .map(|m| Fact::Family(m.as_str().to_ascii_lowercase())),
            fact => Some(fact.clone()),
        }
    }
}

/// Ordered probe rows
#[derive(Debug, Clone, Default)]
pub struct ProbeTable {
    rules: Vec<ProbeRule>,
}

impl ProbeTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rows with the default package precedence
    ///
    /// # Errors
    /// Never fails for the built-in patterns; the `Result` comes from
    /// [`ProbeRule::new`]
    pub fn builtin() -> Result<Self, DetectError> {
        Self::with_precedence(&DEFAULT_PACKAGE_PRECEDENCE)
    }

    /// Built-in rows, checking package-manager binaries in `precedence` order
    ///
    /// # Errors
    /// Same as [`builtin`](Self::builtin)
    pub fn with_precedence(precedence: &[PackageManagerKind]) -> Result<Self, DetectError> {
        let mut table = Self::new()
            // family
            .rule(OS_RELEASE, OS_ID, Fact::FamilyFromCapture)?
            .rule("cat /etc/redhat-release", "(?i)red hat enterprise", family("rhel"))?
            .rule("cat /etc/redhat-release", "(?i)centos", family("centos"))?
            .rule("cat /etc/redhat-release", "(?i)fedora", family("fedora"))?
            .rule("cat /etc/debian_version", r"\S", family("debian"))?
            // init system: PID 1 first, then tooling on PATH
            .rule("cat /proc/1/comm", r"^systemd\s*$", Fact::Init(InitSystem::Systemd))?
            .rule("initctl version", "upstart", Fact::Init(InitSystem::Upstart))?
            .rule("command -v systemctl", r"\S", Fact::Init(InitSystem::Systemd))?
            .rule("command -v service", r"\S", Fact::Init(InitSystem::SysVinit))?;

        for kind in precedence {
            table = table.rule(
                format!("command -v {}", kind.binary()),
                r"\S",
                Fact::PackageManager(*kind),
            )?;
        }

        // Family-implied package managers, for hosts where no binary answered
        table
            .rule(
                OS_RELEASE,
                r#"(?m)^ID="?(rhel|centos|ol|scientific)"?\s*$"#,
                Fact::PackageManager(PackageManagerKind::Yum),
            )?
            .rule(
                OS_RELEASE,
                r#"(?m)^ID="?(fedora|rocky|almalinux)"?\s*$"#,
                Fact::PackageManager(PackageManagerKind::Dnf),
            )?
            .rule(
                OS_RELEASE,
                r#"(?m)^ID="?(debian|ubuntu|raspbian|linuxmint)"?\s*$"#,
                Fact::PackageManager(PackageManagerKind::Apt),
            )?
            .rule(
                OS_RELEASE,
                r#"(?m)^ID="?(sles|opensuse[a-z-]*)"?\s*$"#,
                Fact::PackageManager(PackageManagerKind::Rpm),
            )
    }

    /// Append a row
    ///
    /// # Errors
    /// Returns `DetectError::InvalidPattern` if `pattern` is not a valid regex
    pub fn rule(
        mut self,
        command: impl Into<String>,
        pattern: &str,
        fact: Fact,
    ) -> Result<Self, DetectError> {
        self.rules.push(ProbeRule::new(command, pattern, fact)?);
        Ok(self)
    }

    /// Append an already built row
    pub fn push(&mut self, rule: ProbeRule) {
        self.rules.push(rule);
    }

    /// Rows in evaluation order
    #[must_use]
    pub fn rules(&self) -> &[ProbeRule] {
        &self.rules
    }
}

fn family(name: &str) -> Fact {
    Fact::Family(name.to_string())
}

/// One probe command as it ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeStep {
    /// Command line
    pub command: String,
    /// Exit status
    pub status: i32,
    /// First line of stdout
    pub excerpt: String,
}

/// Every probe that ran during one detection, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeTrace {
    pub steps: Vec<ProbeStep>,
}

impl ProbeTrace {
    /// Number of probe commands issued
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no probe ran
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for ProbeTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str("no probes ran");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "`{}` exited {}", step.command, step.status)?;
            if !step.excerpt.is_empty() {
                write!(f, " ({})", step.excerpt)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_compiles() {
        let table = ProbeTable::builtin().unwrap();
        assert!(table.rules().len() > 10);
        assert_eq!(table.rules()[0].command(), "cat /etc/os-release");
    }

    #[test]
    fn test_precedence_is_row_order() {
        let table = ProbeTable::with_precedence(&[PackageManagerKind::Apt, PackageManagerKind::Dnf])
            .unwrap();
        let pkg_rows: Vec<_> = table
            .rules()
            .iter()
            .filter(|r| r.command().starts_with("command -v"))
            .filter(|r| r.fact().field() == Field::PackageManager)
            .map(ProbeRule::command)
            .collect();
        assert_eq!(pkg_rows, ["command -v apt-get", "command -v dnf"]);
    }

    #[test]
    fn test_family_from_capture() {
        let rule = ProbeRule::new(OS_RELEASE, OS_ID, Fact::FamilyFromCapture).unwrap();
        assert_eq!(
            rule.evaluate("NAME=\"Ubuntu\"\nID=Ubuntu\n"),
            Some(family("ubuntu"))
        );
        assert_eq!(rule.evaluate("ID=\"rhel\"\n"), Some(family("rhel")));
        assert_eq!(rule.evaluate("ID_LIKE=debian\n"), None);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = ProbeRule::new("true", "(unclosed", Fact::Family("x".into())).unwrap_err();
        assert!(matches!(err, DetectError::InvalidPattern { .. }));
    }

    #[test]
    fn test_trace_display() {
        let trace = ProbeTrace {
            steps: vec![
                ProbeStep {
                    command: "cat /etc/os-release".into(),
                    status: 1,
                    excerpt: String::new(),
                },
                ProbeStep {
                    command: "command -v dnf".into(),
                    status: 0,
                    excerpt: "/usr/bin/dnf".into(),
                },
            ],
        };
        assert_eq!(
            trace.to_string(),
            "`cat /etc/os-release` exited 1; `command -v dnf` exited 0 (/usr/bin/dnf)"
        );
        assert_eq!(ProbeTrace::default().to_string(), "no probes ran");
    }
}
