use tracing::info;

use crate::cmd::CommandOutput;
use crate::error::DeployResult;
use crate::remote::{RemoteSession, UploadedFile};

/// One action a [`DryRunSession`] was asked to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(String),
    Upload { path: String, mode: u32, content: String },
}

/// Session that logs what it would do and touches nothing. Every
/// command "succeeds" with empty output.
#[derive(Debug, Default)]
pub struct DryRunSession {
    host: String,
    actions: Vec<Action>,
}

impl DryRunSession {
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Just the shell commands, in issue order.
    #[must_use]
    pub fn commands(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Run(c) => Some(c.as_str()),
                Action::Upload { .. } => None,
            })
            .collect()
    }

    /// Content uploaded to `path`, if any.
    #[must_use]
    pub fn uploaded(&self, path: &str) -> Option<&str> {
        self.actions.iter().find_map(|a| match a {
            Action::Upload {
                path: p, content, ..
            } if p == path => Some(content.as_str()),
            _ => None,
        })
    }
}

impl RemoteSession for DryRunSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute(&mut self, command: &str) -> DeployResult<CommandOutput> {
        info!(host = %self.host, "[dry-run] {command}");
        self.actions.push(Action::Run(command.to_string()));
        Ok(CommandOutput::default())
    }

    fn upload(&mut self, file: &UploadedFile) -> DeployResult<()> {
        info!(
            host = %self.host,
            "[dry-run] write {} ({} bytes, mode {:o})",
            file.path,
            file.content.len(),
            file.mode
        );
        self.actions.push(Action::Upload {
            path: file.path.clone(),
            mode: file.mode,
            content: String::from_utf8_lossy(&file.content).to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteCommand;

    #[test]
    fn records_in_order() {
        let mut session = DryRunSession::new("example.org");
        session.run(&RemoteCommand::new("mkdir -p /a")).unwrap();
        session
            .upload(&UploadedFile::new("/a/run", "#!/bin/sh\n", 0o755))
            .unwrap();
        session.run(&RemoteCommand::new("ln -nfs /a /b")).unwrap();

        assert_eq!(session.commands(), vec!["mkdir -p /a", "ln -nfs /a /b"]);
        assert_eq!(session.actions().len(), 3);
        assert_eq!(session.uploaded("/a/run"), Some("#!/bin/sh\n"));
        assert_eq!(session.uploaded("/nope"), None);
    }
}
