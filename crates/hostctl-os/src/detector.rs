//! Table-driven OS detection

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use hostctl_exec::{CommandRequest, CommandResult, RemoteExecutor};
use tracing::{debug, info, instrument};

use crate::error::DetectError;
use crate::probe::{Fact, Field, ProbeStep, ProbeTable, ProbeTrace};
use crate::types::{Classification, InitSystem, PackageManagerKind, ReleaseInfo};

const OS_RELEASE: &str = "cat /etc/os-release";

/// Probes a host and classifies it
///
/// Each distinct probe command runs at most once per detection; a command is
/// skipped when every row using it decides a field that is already known.
pub struct Detector {
    executor: Arc<dyn RemoteExecutor>,
    table: ProbeTable,
}

impl Detector {
    /// Create a detector with the built-in probe table
    ///
    /// # Errors
    /// Returns `DetectError::InvalidPattern` if the built-in table fails to
    /// compile
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Result<Self, DetectError> {
        Ok(Self::with_table(executor, ProbeTable::builtin()?))
    }

    /// Create a detector with a custom probe table
    pub fn with_table(executor: Arc<dyn RemoteExecutor>, table: ProbeTable) -> Self {
        Self { executor, table }
    }

    /// Probe table in use
    #[must_use]
    pub fn table(&self) -> &ProbeTable {
        &self.table
    }

    /// Classify the host
    ///
    /// # Errors
    /// Returns `DetectError::NoMatch` with the probe trace when no row decides
    /// the family, or `DetectError::Exec` if a probe could not be delivered
    #[instrument(skip(self), fields(executor = self.executor.executor_type()))]
    pub async fn detect(&self) -> Result<Classification, DetectError> {
        let mut outputs: HashMap<String, CommandResult> = HashMap::new();
        let mut trace = ProbeTrace::default();

        let mut family: Option<String> = None;
        let mut init: Option<InitSystem> = None;
        let mut package_manager: Option<PackageManagerKind> = None;

        for rule in self.table.rules() {
            let decided = match rule.fact().field() {
                Field::Family => family.is_some(),
                Field::Init => init.is_some(),
                Field::PackageManager => package_manager.is_some(),
            };
            if decided {
                continue;
            }

            if !outputs.contains_key(rule.command()) {
                let result = self.probe(rule.command()).await?;
                trace.steps.push(ProbeStep {
                    command: rule.command().to_string(),
                    status: result.status,
                    excerpt: result.stdout.lines().next().unwrap_or("").trim().to_string(),
                });
                outputs.insert(rule.command().to_string(), result);
            }
            let Some(result) = outputs.get(rule.command()) else {
                continue;
            };
            if !result.success() {
                continue;
            }

            match rule.evaluate(&result.stdout) {
                Some(Fact::Family(name)) => family = Some(name),
                Some(Fact::Init(kind)) => init = Some(kind),
                Some(Fact::PackageManager(kind)) => package_manager = Some(kind),
                Some(Fact::FamilyFromCapture) | None => continue,
            }
            debug!(command = rule.command(), fact = ?rule.fact(), "probe matched");
        }

        let Some(family) = family else {
            return Err(DetectError::NoMatch { trace });
        };

        let release = outputs
            .get(OS_RELEASE)
            .filter(|r| r.success())
            .and_then(|r| ReleaseInfo::parse(&r.stdout));

        let classification = Classification {
            family,
            init,
            package_manager,
            release,
            detected_at: Utc::now(),
        };
        info!(
            classification = %classification,
            probes = trace.len(),
            "host classified"
        );
        Ok(classification)
    }

    async fn probe(&self, command: &str) -> Result<CommandResult, DetectError> {
        let request = CommandRequest::shell(command).with_retry(true);
        let result = self.executor.run(&request).await?;
        debug!(command, status = result.status, "probe ran");
        Ok(result)
    }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("executor", &self.executor.executor_type())
            .field("rules", &self.table.rules().len())
            .finish()
    }
}
