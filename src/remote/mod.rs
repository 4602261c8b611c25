pub mod dry_run;
pub mod ssh;

use tracing::warn;

pub use crate::cmd::CommandOutput;
use crate::error::{DeployError, DeployResult};

/// A shell command bound for the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub command: String,
    /// Report a non-zero exit as a warning instead of an error.
    pub tolerate_failure: bool,
}

impl RemoteCommand {
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            tolerate_failure: false,
        }
    }

    #[must_use]
    pub const fn tolerate_failure(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }
}

/// File content to write on the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: String,
    pub content: Vec<u8>,
    pub mode: u32,
}

impl UploadedFile {
    #[must_use]
    pub fn new(path: &str, content: impl Into<Vec<u8>>, mode: u32) -> Self {
        Self {
            path: path.to_string(),
            content: content.into(),
            mode,
        }
    }

    /// Parent directory of the target path, if it has one.
    #[must_use]
    pub fn parent_dir(&self) -> Option<&str> {
        match self.path.rsplit_once('/') {
            Some(("", _)) => Some("/"),
            Some((dir, _)) => Some(dir),
            None => None,
        }
    }
}

/// Login details for a remote host.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub identity_file: Option<String>,
    pub port: Option<u16>,
    pub forward_agent: bool,
    pub pty: bool,
}

impl Credentials {
    #[must_use]
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            identity_file: None,
            port: None,
            forward_agent: true,
            pty: false,
        }
    }

    #[must_use]
    pub fn identity_file(mut self, path: &str) -> Self {
        self.identity_file = Some(path.to_string());
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub const fn forward_agent(mut self, enabled: bool) -> Self {
        self.forward_agent = enabled;
        self
    }

    #[must_use]
    pub const fn pty(mut self, enabled: bool) -> Self {
        self.pty = enabled;
        self
    }
}

/// A connected session on one remote host. Commands run one at a
/// time, in the order they are issued.
pub trait RemoteSession {
    /// The host this session is connected to.
    fn host(&self) -> &str;

    /// Execute a shell command and return its exit code and output,
    /// whatever the exit code. Transport failures are
    /// [`DeployError::Connection`]; over SSH that includes a remote
    /// command that itself exits 255.
    fn execute(&mut self, command: &str) -> DeployResult<CommandOutput>;

    /// Write a file on the remote host, creating parent directories.
    fn upload(&mut self, file: &UploadedFile) -> DeployResult<()>;

    /// Tear down the connection.
    fn close(&mut self) -> DeployResult<()> {
        Ok(())
    }

    /// Run a command, turning a non-zero exit into
    /// [`DeployError::RemoteCommand`] unless the command tolerates
    /// failure.
    ///
    /// [`SshSession`](ssh::SshSession) cannot tell a remote exit
    /// status of 255 from an ssh failure, so such a command comes back
    /// as [`DeployError::Connection`] carrying the command's output,
    /// even when it tolerates failure.
    fn run(&mut self, command: &RemoteCommand) -> DeployResult<CommandOutput> {
        let result = self.execute(&command.command)?;
        if result.success() {
            return Ok(result);
        }
        if command.tolerate_failure {
            warn!(
                host = self.host(),
                command = %command.command,
                exit_code = result.exit_code,
                "command failed, continuing"
            );
            return Ok(result);
        }
        Err(DeployError::RemoteCommand {
            command: command.command.clone(),
            exit_code: result.exit_code,
            output: result.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl RemoteSession for Failing {
        fn host(&self) -> &str {
            "example.org"
        }

        fn execute(&mut self, _command: &str) -> DeployResult<CommandOutput> {
            Ok(CommandOutput::new(1, "boom"))
        }

        fn upload(&mut self, _file: &UploadedFile) -> DeployResult<()> {
            Ok(())
        }
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = Failing.run(&RemoteCommand::new("false")).unwrap_err();
        match err {
            DeployError::RemoteCommand {
                command,
                exit_code,
                output,
            } => {
                assert_eq!(command, "false");
                assert_eq!(exit_code, 1);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tolerated_failure_returns_output() {
        let out = Failing
            .run(&RemoteCommand::new("uberspace-setup-svscan").tolerate_failure())
            .unwrap();
        assert_eq!(out.exit_code, 1);
    }

    #[test]
    fn parent_dir() {
        assert_eq!(
            UploadedFile::new("/home/u/etc/run-app/run", "", 0o755).parent_dir(),
            Some("/home/u/etc/run-app")
        );
        assert_eq!(UploadedFile::new("/run", "", 0o755).parent_dir(), Some("/"));
        assert_eq!(UploadedFile::new("run", "", 0o755).parent_dir(), None);
    }

    #[test]
    fn credentials_defaults() {
        let creds = Credentials::new("demo");
        assert_eq!(creds.user, "demo");
        assert!(creds.forward_agent);
        assert!(!creds.pty);
        assert!(creds.identity_file.is_none());
        assert!(creds.port.is_none());
    }
}
