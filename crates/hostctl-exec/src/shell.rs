//! POSIX shell quoting for argument vectors

use std::borrow::Cow;

/// Quote a single argument so `sh` reads it back verbatim
///
/// Arguments made only of characters the shell treats literally are returned
/// unchanged, so `["systemctl", "is-active", "sshd"]` renders as
/// `systemctl is-active sshd`.
#[must_use]
pub fn quote(arg: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(arg)).into_owned()
}

/// Join an argument vector into one command line
#[must_use]
pub fn join<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|a| quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_args_unquoted() {
        assert_eq!(
            join(&["systemctl", "is-active", "sshd"]),
            "systemctl is-active sshd"
        );
        assert_eq!(join(&["rm", "-f", "/tmp/a.txt"]), "rm -f /tmp/a.txt");
        assert_eq!(join(&["mkdir", "-m", "0750", "/srv/app_data"]), "mkdir -m 0750 /srv/app_data");
    }

    #[test]
    fn test_special_args_quoted() {
        assert_eq!(quote(""), "''");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$(reboot)"), "'$(reboot)'");
        assert_eq!(quote("a;b"), "'a;b'");
        assert_eq!(join(&["[", "-e", "/tmp/x", "]"]), "'[' -e /tmp/x ']'");
    }
}
