//! Package manager strategies

mod apt;
mod dnf;
mod rpm;

pub use apt::AptManager;
pub use dnf::DnfManager;
pub use rpm::RpmManager;

use hostctl_exec::{CommandResult, shell};

use crate::error::ResourceError;
use crate::runner::Runner;

/// Map a failed package command to the most specific error
fn failure(package: &str, action: &str, result: CommandResult) -> ResourceError {
    let stderr = result.stderr.trim().to_string();
    if stderr.contains("Could not get lock") || (stderr.contains("lock") && stderr.contains("held")) {
        return ResourceError::LockConflict(stderr);
    }
    if stderr.contains("Permission denied")
        || stderr.contains("are you root")
        || stderr.contains("need to be root")
    {
        return ResourceError::PermissionDenied(stderr);
    }
    ResourceError::PackageOperation {
        package: package.to_string(),
        action: action.to_string(),
        status: result.status,
        stderr,
    }
}

/// Run a package command, mapping failure through [`failure`]
async fn transact(
    runner: &Runner,
    package: &str,
    action: &str,
    argv: Vec<String>,
) -> Result<CommandResult, ResourceError> {
    let result = runner.run(runner.argv(argv)).await?;
    if result.success() {
        Ok(result)
    } else {
        Err(failure(package, action, result))
    }
}

/// `<list> | grep -E '<pattern>' | xargs -r <remove>`
fn remove_matching_script(list: &[&str], pattern: &str, remove: &[&str]) -> String {
    format!(
        "{} | grep -E {} | xargs -r {}",
        shell::join(list),
        shell::quote(pattern),
        shell::join(remove)
    )
}

/// One package name per non-empty line
fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

fn with_args(base: &[&str], args: &[String]) -> Vec<String> {
    base.iter()
        .map(|s| (*s).to_string())
        .chain(args.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_matching_script() {
        assert_eq!(
            remove_matching_script(&["rpm", "-qa"], "p-installed-(1|2)", &["yum", "remove", "-y"]),
            "rpm -qa | grep -E 'p-installed-(1|2)' | xargs -r yum remove -y"
        );
    }

    #[test]
    fn test_failure_classification() {
        let locked = CommandResult::new(
            "apt-get install -y vim",
            100,
            "",
            "E: Could not get lock /var/lib/dpkg/lock-frontend",
            std::time::Duration::ZERO,
        );
        assert!(failure("vim", "install", locked).is_retryable());

        let missing = CommandResult::new(
            "dnf install -y nope",
            1,
            "",
            "Error: Unable to find a match: nope\n",
            std::time::Duration::ZERO,
        );
        assert_eq!(
            failure("nope", "install", missing),
            ResourceError::PackageOperation {
                package: "nope".into(),
                action: "install".into(),
                status: 1,
                stderr: "Error: Unable to find a match: nope".into(),
            }
        );
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(parse_names("a\n\n b \nc\n"), ["a", "b", "c"]);
    }
}
