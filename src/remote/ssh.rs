use tracing::{debug, info, warn};

use crate::cmd::{self, CommandOutput, shell_quote};
use crate::error::{DeployError, DeployResult};
use crate::remote::{Credentials, RemoteSession, UploadedFile};

/// Exit code OpenSSH reserves for its own failures.
const SSH_FAILURE: i32 = 255;

/// SSH session over the system OpenSSH client.
///
/// `connect` opens one multiplexed master connection; every later
/// command and upload rides on it, so authentication happens once
/// per run.
pub struct SshSession {
    host: String,
    credentials: Credentials,
    control_path: String,
    open: bool,
}

impl SshSession {
    /// Open the control connection.
    pub fn connect(host: &str, credentials: Credentials) -> DeployResult<Self> {
        if !cmd::command_exists("ssh") {
            return Err(DeployError::CommandNotFound("ssh".into()));
        }

        let control_path = std::env::temp_dir()
            .join("hookdeploy-%C")
            .to_string_lossy()
            .to_string();

        let mut session = Self {
            host: host.to_string(),
            credentials,
            control_path,
            open: false,
        };

        info!(host, user = %session.credentials.user, "connecting");
        let args = session.build_ssh_args("true", false);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = cmd::capture("ssh", &refs)?;
        if !result.success() {
            return Err(DeployError::Connection {
                host: host.to_string(),
                reason: result.output,
            });
        }

        session.open = true;
        Ok(session)
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.credentials.user, self.host)
    }

    fn build_ssh_args(&self, command: &str, pty: bool) -> Vec<String> {
        let mut args = self.ssh_base_args();
        if pty {
            args.push("-tt".to_string());
        }
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    fn ssh_base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path),
            "-o".to_string(),
            "ControlPersist=600".to_string(),
        ];
        if self.credentials.forward_agent {
            args.push("-A".to_string());
        }
        if let Some(port) = self.credentials.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(key) = &self.credentials.identity_file {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }
}

/// Pass `result` through unless ssh itself failed. OpenSSH exits 255
/// on its own errors, so a remote command exiting 255 is reported as
/// a lost connection too, with its output as the reason.
fn check_transport(host: &str, result: CommandOutput) -> DeployResult<CommandOutput> {
    if result.exit_code == SSH_FAILURE {
        return Err(DeployError::Connection {
            host: host.to_string(),
            reason: result.output,
        });
    }
    Ok(result)
}

impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute(&mut self, command: &str) -> DeployResult<CommandOutput> {
        if !self.open {
            return Err(DeployError::Connection {
                host: self.host.clone(),
                reason: "session is closed".into(),
            });
        }

        debug!(host = %self.host, command, "exec");
        let args = self.build_ssh_args(command, self.credentials.pty);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        check_transport(&self.host, cmd::capture("ssh", &refs)?)
    }

    fn upload(&mut self, file: &UploadedFile) -> DeployResult<()> {
        let target = shell_quote(&file.path);
        let mut script = String::new();
        if let Some(dir) = file.parent_dir() {
            script.push_str(&format!("mkdir -p {} && ", shell_quote(dir)));
        }
        script.push_str(&format!(
            "cat > {target} && chmod {:o} {target}",
            file.mode
        ));

        debug!(host = %self.host, path = %file.path, bytes = file.content.len(), "upload");
        // No pty here: it would mangle the streamed bytes.
        let args = self.build_ssh_args(&script, false);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = cmd::capture_with_stdin("ssh", &refs, &file.content).map_err(|e| {
            DeployError::Upload {
                path: file.path.clone(),
                reason: e.to_string(),
            }
        })?;

        let result = check_transport(&self.host, result)?;
        if !result.success() {
            return Err(DeployError::Upload {
                path: file.path.clone(),
                reason: result.output,
            });
        }
        Ok(())
    }

    fn close(&mut self) -> DeployResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let mut args = vec![
            "-o".to_string(),
            format!("ControlPath={}", self.control_path),
            "-O".to_string(),
            "exit".to_string(),
        ];
        args.push(self.destination());
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = cmd::capture("ssh", &refs)?;
        if !result.success() {
            warn!(host = %self.host, output = %result.output, "control connection did not exit cleanly");
        }
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(host = %self.host, error = %e, "failed to close session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_255_is_a_connection_error() {
        let err = check_transport("example.org", CommandOutput::new(255, "Connection reset"))
            .unwrap_err();

        match err {
            DeployError::Connection { host, reason } => {
                assert_eq!(host, "example.org");
                assert_eq!(reason, "Connection reset");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn other_exit_codes_pass_through() {
        let out = check_transport("example.org", CommandOutput::new(1, "no such file")).unwrap();
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.output, "no such file");
    }
}
