use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigStore, Value};
use crate::error::{DeployError, DeployResult};
use crate::recipe;
use crate::remote::dry_run::DryRunSession;
use crate::remote::ssh::SshSession;
use crate::remote::{Credentials, RemoteSession};
use crate::task::{TaskContext, TaskGraph};

/// Settings, tasks and hooks for one deployment, plus the command
/// line that drives them.
pub struct Pipeline {
    config: ConfigStore,
    graph: TaskGraph,
}

impl Pipeline {
    /// Build a pipeline with the shared-hosting recipe. Settings
    /// already in `config` take precedence over recipe defaults.
    #[must_use]
    pub fn new(mut config: ConfigStore) -> Self {
        recipe::defaults(&mut config);
        let mut graph = TaskGraph::new();
        recipe::register(&mut graph);
        Self { config, graph }
    }

    #[must_use]
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.set(key, value);
        self
    }

    #[must_use]
    pub fn task<F>(mut self, name: &str, description: &str, body: F) -> Self
    where
        F: Fn(&mut TaskContext<'_>) -> DeployResult<()> + Send + Sync + 'static,
    {
        self.graph.task(name, description, body);
        self
    }

    #[must_use]
    pub fn before(mut self, anchor: &str, task: &str) -> Self {
        self.graph.before(anchor, task);
        self
    }

    #[must_use]
    pub fn after(mut self, anchor: &str, task: &str) -> Self {
        self.graph.after(anchor, task);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub const fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    #[must_use]
    pub const fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub const fn graph_mut(&mut self) -> &mut TaskGraph {
        &mut self.graph
    }

    /// Parse CLI arguments and dispatch the appropriate
    /// command.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatched command fails.
    pub fn run(mut self) -> DeployResult<()> {
        let cli = Cli::parse();
        init_tracing(cli.verbose);

        if let Some(path) = &cli.config {
            self.config.load_yaml(path)?;
        }
        for raw in &cli.overrides {
            self.config.apply_override(raw)?;
        }

        match &cli.command {
            Command::Setup { host } => self.cmd_run("deploy:setup", host, cli.dry_run),
            Command::Deploy { host } => self.cmd_run("deploy", host, cli.dry_run),
            Command::Start { host } => self.cmd_run("deploy:start", host, cli.dry_run),
            Command::Stop { host } => self.cmd_run("deploy:stop", host, cli.dry_run),
            Command::Restart { host } => self.cmd_run("deploy:restart", host, cli.dry_run),
            Command::Invoke { task, host } => self.cmd_run(task, host, cli.dry_run),
            Command::Plan { task, json } => self.cmd_plan(task, *json),
            Command::Tasks => {
                self.cmd_tasks();
                Ok(())
            }
            Command::Config { json } => self.cmd_config(*json),
        }
    }

    /// Check the settings, then run `target` and everything hooked
    /// to it on `session`.
    pub fn execute(
        &self,
        target: &str,
        session: &mut dyn RemoteSession,
    ) -> DeployResult<Vec<String>> {
        self.config.validate()?;
        let mut ctx = TaskContext::new(&self.config, session);
        self.graph.run(target, &mut ctx)
    }

    /// [`execute`](Self::execute), then close the session. A task
    /// failure is reported ahead of a failure to close.
    pub fn execute_and_close(
        &self,
        target: &str,
        session: &mut dyn RemoteSession,
    ) -> DeployResult<Vec<String>> {
        let result = self.execute(target, session);
        let closed = session.close();

        match (result, closed) {
            (Err(e), Err(close)) => {
                warn!(host = session.host(), error = %close, "failed to close session");
                Err(e)
            }
            (result, closed) => {
                let ran = result?;
                closed?;
                Ok(ran)
            }
        }
    }

    /// SSH login details from the `ssh_*` settings.
    pub fn credentials(&self) -> DeployResult<Credentials> {
        let mut creds = Credentials::new(&self.config.string("ssh_user")?)
            .forward_agent(self.config.boolean("forward_agent")?)
            .pty(self.config.boolean("pty")?);

        if let Some(key) = self.config.optional_string("ssh_key")? {
            creds = creds.identity_file(&key);
        }
        if self.config.optional_string("ssh_port")?.is_some() {
            let port = self.config.integer("ssh_port")?;
            let port = u16::try_from(port).map_err(|_| DeployError::InvalidSetting {
                key: "ssh_port".into(),
                reason: format!("{port} is not a valid port"),
            })?;
            creds = creds.port(port);
        }
        Ok(creds)
    }

    fn cmd_run(&self, target: &str, host: &str, dry_run: bool) -> DeployResult<()> {
        // Fail on bad settings or task names before connecting.
        self.config.validate()?;
        self.graph.plan(target)?;

        let ran = if dry_run {
            info!(host, "=== Dry run: no changes will be made ===");
            let mut session = DryRunSession::new(host);
            self.execute(target, &mut session)?
        } else {
            let mut session = SshSession::connect(host, self.credentials()?)?;
            self.execute_and_close(target, &mut session)?
        };

        info!(host, target, tasks = ran.len(), "finished");
        Ok(())
    }

    fn cmd_plan(&self, target: &str, json: bool) -> DeployResult<()> {
        let plan = self.graph.plan(target)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            for (i, name) in plan.iter().enumerate() {
                let kind = if self.graph.get(name).is_some_and(|t| !t.steps().is_empty()) {
                    " (group)"
                } else {
                    ""
                };
                println!("{:>3}. {name}{kind}", i + 1);
            }
        }
        Ok(())
    }

    fn cmd_tasks(&self) {
        let width = self
            .graph
            .tasks()
            .map(|t| t.name.len())
            .max()
            .unwrap_or(0);

        for task in self.graph.tasks() {
            println!("{:<width$}  # {}", task.name, task.description);
        }
    }

    fn cmd_config(&self, json: bool) -> DeployResult<()> {
        let snapshot = self.config.snapshot()?;

        if json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        } else {
            for (key, value) in &snapshot {
                println!("{key}: {value}");
            }
        }
        Ok(())
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_err()
    {
        debug!("tracing subscriber already installed");
    }
}

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Deployment automation")]
struct Cli {
    /// YAML file with settings
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override a setting, e.g. `--set branch=main`
    #[arg(long = "set", short = 's', value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Log remote commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install the runtime, supervisor scripts and proxy rules
    Setup {
        /// Hostname or IP address
        host: String,
    },

    /// Deploy a new release
    Deploy {
        /// Hostname or IP address
        host: String,
    },

    /// Start the supervised daemon
    Start {
        /// Hostname or IP address
        host: String,
    },

    /// Stop the supervised daemon
    Stop {
        /// Hostname or IP address
        host: String,
    },

    /// Restart the supervised daemon
    Restart {
        /// Hostname or IP address
        host: String,
    },

    /// Run any registered task with its hooks
    Invoke {
        /// Task name, e.g. `deploy:assets:precompile`
        task: String,

        /// Hostname or IP address
        host: String,
    },

    /// Print the order tasks would run in
    Plan {
        /// Task name
        task: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered tasks
    Tasks,

    /// Print resolved settings
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xtask", "deploy", "example.org", "--set", "branch=main", "-s", "keep_releases=5",
            "--dry-run",
        ])
        .unwrap();

        assert!(cli.dry_run);
        assert_eq!(cli.overrides, vec!["branch=main", "keep_releases=5"]);
        assert!(matches!(cli.command, Command::Deploy { ref host } if host == "example.org"));
    }

    #[test]
    fn credentials_from_settings() {
        let pipeline = Pipeline::new(ConfigStore::new())
            .set("user", "alice")
            .set("ssh_key", "~/.ssh/deploy")
            .set("ssh_port", 2222)
            .set("forward_agent", false);

        let creds = pipeline.credentials().unwrap();

        assert_eq!(creds.user, "alice");
        assert_eq!(creds.identity_file.as_deref(), Some("~/.ssh/deploy"));
        assert_eq!(creds.port, Some(2222));
        assert!(!creds.forward_agent);
    }

    /// Fails every command and every close.
    struct Broken;

    impl RemoteSession for Broken {
        fn host(&self) -> &str {
            "example.org"
        }

        fn execute(&mut self, _command: &str) -> DeployResult<crate::cmd::CommandOutput> {
            Ok(crate::cmd::CommandOutput::new(111, "unable to control"))
        }

        fn upload(&mut self, _file: &crate::remote::UploadedFile) -> DeployResult<()> {
            Ok(())
        }

        fn close(&mut self) -> DeployResult<()> {
            Err(DeployError::Connection {
                host: "example.org".into(),
                reason: "control socket gone".into(),
            })
        }
    }

    fn configured() -> Pipeline {
        Pipeline::new(ConfigStore::new())
            .set("user", "alice")
            .set("application", "demo")
            .set("repository", "git@example.com:alice/demo.git")
    }

    #[test]
    fn task_failure_wins_over_close_failure() {
        let err = configured()
            .execute_and_close("deploy:restart", &mut Broken)
            .unwrap_err();

        assert_eq!(err.failed_task(), Some("deploy:restart"));
        assert!(matches!(
            err.root(),
            DeployError::RemoteCommand { exit_code: 111, .. }
        ));
    }

    #[test]
    fn close_failure_reported_after_success() {
        let mut session = DryRunSession::new("example.org");
        let ran = configured()
            .execute_and_close("deploy:restart", &mut session)
            .unwrap();
        assert_eq!(ran, vec!["deploy:restart"]);

        let err = configured()
            .task("noop", "", |_| Ok(()))
            .execute_and_close("noop", &mut Broken)
            .unwrap_err();
        assert!(matches!(err, DeployError::Connection { .. }));
    }

    #[test]
    fn invalid_ssh_port() {
        let pipeline = Pipeline::new(ConfigStore::new())
            .set("user", "alice")
            .set("ssh_port", 70000);

        assert!(matches!(
            pipeline.credentials(),
            Err(DeployError::InvalidSetting { .. })
        ));
    }
}
