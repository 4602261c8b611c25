use std::io::Write;
use std::process::{Command, Output, Stdio};

use crate::error::{DeployError, DeployResult};

/// Exit code and combined stdout/stderr of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    #[must_use]
    pub fn new(exit_code: i32, output: &str) -> Self {
        Self {
            exit_code,
            output: output.to_string(),
        }
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a local program and capture its output, whatever the exit
/// code. Only spawn failures are errors.
pub fn capture(program: &str, args: &[&str]) -> DeployResult<CommandOutput> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| spawn_error(program, e))?;

    Ok(combine(&output))
}

/// Run a local program feeding `stdin_data` on its stdin.
pub fn capture_with_stdin(
    program: &str,
    args: &[&str],
    stdin_data: &[u8],
) -> DeployResult<CommandOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    if let Some(stdin) = &mut child.stdin {
        stdin.write_all(stdin_data)?;
    }
    drop(child.stdin.take());

    let output = child.wait_with_output()?;
    Ok(combine(&output))
}

/// Check if a command exists on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Quote a string for a POSIX shell.
#[must_use]
pub fn shell_quote(raw: &str) -> String {
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%=,".contains(c))
    {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\'', r"'\''"))
}

fn spawn_error(program: &str, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::CommandNotFound(program.to_string())
    } else {
        DeployError::Io(e)
    }
}

fn combine(output: &Output) -> CommandOutput {
    let mut text = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }

    CommandOutput {
        // Killed by a signal: no exit code.
        exit_code: output.status.code().unwrap_or(-1),
        output: text.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_plain_path_untouched() {
        assert_eq!(shell_quote("/home/demo/etc/run-demo"), "/home/demo/etc/run-demo");
    }

    #[test]
    fn quote_spaces_and_quotes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn missing_program_is_command_not_found() {
        let err = capture("definitely-not-a-real-program-xyz", &[]).unwrap_err();
        assert!(matches!(err, DeployError::CommandNotFound(_)));
    }

    #[test]
    fn capture_reports_exit_code() {
        let out = capture("sh", &["-c", "echo hi; echo oops >&2; exit 3"]).unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(out.output.contains("hi"));
        assert!(out.output.contains("oops"));
        assert!(!out.success());
    }

    #[test]
    fn stdin_is_forwarded() {
        let out = capture_with_stdin("cat", &[], b"payload").unwrap();
        assert!(out.success());
        assert_eq!(out.output, "payload");
    }
}
