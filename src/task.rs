use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, info};

use crate::cmd::CommandOutput;
use crate::config::ConfigStore;
use crate::error::{DeployError, DeployResult};
use crate::remote::{RemoteCommand, RemoteSession, UploadedFile};

/// Separator between namespace segments in a task name.
pub const NAMESPACE_SEPARATOR: char = ':';

type TaskFn = Arc<dyn Fn(&mut TaskContext<'_>) -> DeployResult<()> + Send + Sync>;

/// What a task sees while it runs: the settings and the session.
pub struct TaskContext<'a> {
    pub config: &'a ConfigStore,
    session: &'a mut dyn RemoteSession,
}

impl<'a> TaskContext<'a> {
    pub fn new(config: &'a ConfigStore, session: &'a mut dyn RemoteSession) -> Self {
        Self { config, session }
    }

    /// Run a command; a non-zero exit fails the task.
    pub fn run(&mut self, command: &str) -> DeployResult<CommandOutput> {
        self.session.run(&RemoteCommand::new(command))
    }

    /// Run a command whose failure is only worth a warning.
    pub fn run_tolerant(&mut self, command: &str) -> DeployResult<CommandOutput> {
        self.session
            .run(&RemoteCommand::new(command).tolerate_failure())
    }

    /// Run a command and return its trimmed output.
    pub fn capture(&mut self, command: &str) -> DeployResult<String> {
        Ok(self.run(command)?.output.trim().to_string())
    }

    /// Write `content` to `path` on the remote host with `mode`.
    pub fn put(&mut self, content: &str, path: &str, mode: u32) -> DeployResult<()> {
        self.session
            .upload(&UploadedFile::new(path, content.as_bytes(), mode))
    }

    /// Shorthand for [`ConfigStore::string`].
    pub fn fetch(&self, key: &str) -> DeployResult<String> {
        self.config.string(key)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.session.host()
    }
}

#[derive(Clone)]
enum Body {
    Run(TaskFn),
    Steps(Vec<String>),
}

/// A named unit of work.
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub description: String,
    body: Body,
}

impl Task {
    /// Child tasks of a group task, empty for plain tasks.
    #[must_use]
    pub fn steps(&self) -> &[String] {
        match &self.body {
            Body::Steps(steps) => steps,
            Body::Run(_) => &[],
        }
    }

    /// Namespace segments, without the task's own short name.
    #[must_use]
    pub fn namespace(&self) -> Vec<&str> {
        let mut parts: Vec<&str> = self.name.split(NAMESPACE_SEPARATOR).collect();
        parts.pop();
        parts
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("steps", &self.steps())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

/// `task` runs immediately before or after `anchor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookBinding {
    pub anchor: String,
    pub position: Position,
    pub task: String,
}

/// Registry of tasks and the hooks between them.
#[derive(Clone, Default)]
pub struct TaskGraph {
    tasks: IndexMap<String, Task>,
    hooks: Vec<HookBinding>,
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl TaskGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Registering a name again replaces the
    /// earlier definition but keeps its hooks.
    pub fn task<F>(&mut self, name: &str, description: &str, body: F) -> &mut Self
    where
        F: Fn(&mut TaskContext<'_>) -> DeployResult<()> + Send + Sync + 'static,
    {
        self.insert(name, description, Body::Run(Arc::new(body)));
        self
    }

    /// Register a task that runs other tasks in order, each with
    /// its own hooks.
    pub fn group(&mut self, name: &str, description: &str, steps: &[&str]) -> &mut Self {
        let steps = steps.iter().map(|s| (*s).to_string()).collect();
        self.insert(name, description, Body::Steps(steps));
        self
    }

    /// Register tasks under `prefix`.
    pub fn namespace(&mut self, prefix: &str, define: impl FnOnce(&mut Namespace<'_>)) -> &mut Self {
        let mut ns = Namespace {
            graph: &mut *self,
            prefix: prefix.to_string(),
        };
        define(&mut ns);
        self
    }

    pub fn before(&mut self, anchor: &str, task: &str) -> &mut Self {
        self.hook(anchor, Position::Before, task)
    }

    pub fn after(&mut self, anchor: &str, task: &str) -> &mut Self {
        self.hook(anchor, Position::After, task)
    }

    fn hook(&mut self, anchor: &str, position: Position, task: &str) -> &mut Self {
        self.hooks.push(HookBinding {
            anchor: anchor.to_string(),
            position,
            task: task.to_string(),
        });
        self
    }

    fn insert(&mut self, name: &str, description: &str, body: Body) {
        if self.tasks.contains_key(name) {
            debug!(task = name, "redefining task");
        }
        self.tasks.insert(
            name.to_string(),
            Task {
                name: name.to_string(),
                description: description.to_string(),
                body,
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    #[must_use]
    pub fn hooks(&self) -> &[HookBinding] {
        &self.hooks
    }

    /// The tasks `target` expands to, in execution order.
    ///
    /// Expansion is depth-first: `before` hooks (in registration
    /// order, each expanded the same way), the task itself, its group
    /// steps, then `after` hooks. A task appears at most once.
    pub fn plan(&self, target: &str) -> DeployResult<Vec<&str>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.expand(target, &mut visited, &mut order)?;
        Ok(order)
    }

    fn expand<'g>(
        &'g self,
        name: &str,
        visited: &mut HashSet<&'g str>,
        order: &mut Vec<&'g str>,
    ) -> DeployResult<()> {
        let (key, task) = self
            .tasks
            .get_key_value(name)
            .ok_or_else(|| DeployError::UnknownTask(name.to_string()))?;

        if !visited.insert(key.as_str()) {
            return Ok(());
        }

        for hook in self.bound(key, Position::Before) {
            self.expand(&hook.task, visited, order)?;
        }

        order.push(key.as_str());

        for step in task.steps() {
            self.expand(step, visited, order)?;
        }

        for hook in self.bound(key, Position::After) {
            self.expand(&hook.task, visited, order)?;
        }

        Ok(())
    }

    fn bound<'g>(
        &'g self,
        anchor: &'g str,
        position: Position,
    ) -> impl Iterator<Item = &'g HookBinding> + 'g {
        self.hooks
            .iter()
            .filter(move |h| h.position == position && h.anchor == anchor)
    }

    /// Plan `target` and run every task in order, stopping at the
    /// first failure. Returns the names of the tasks that ran.
    pub fn run(&self, target: &str, ctx: &mut TaskContext<'_>) -> DeployResult<Vec<String>> {
        let plan = self.plan(target)?;
        info!(target, tasks = plan.len(), "running");

        let mut done = Vec::with_capacity(plan.len());
        for name in plan {
            let Some(task) = self.tasks.get(name) else {
                return Err(DeployError::UnknownTask(name.to_string()));
            };

            if let Body::Run(body) = &task.body {
                info!(task = name, "* executing");
                if let Err(e) = body(&mut *ctx) {
                    if let DeployError::RemoteCommand {
                        command, output, ..
                    } = e.root()
                    {
                        error!(task = name, command = %command, "{output}");
                    }
                    return Err(DeployError::TaskFailed {
                        task: name.to_string(),
                        source: Box::new(e),
                    });
                }
            }
            done.push(name.to_string());
        }

        Ok(done)
    }
}

/// Registration scope for tasks sharing a name prefix.
pub struct Namespace<'g> {
    graph: &'g mut TaskGraph,
    prefix: String,
}

impl Namespace<'_> {
    fn qualify(&self, name: &str) -> String {
        format!("{}{NAMESPACE_SEPARATOR}{name}", self.prefix)
    }

    pub fn task<F>(&mut self, name: &str, description: &str, body: F) -> &mut Self
    where
        F: Fn(&mut TaskContext<'_>) -> DeployResult<()> + Send + Sync + 'static,
    {
        let name = self.qualify(name);
        self.graph.task(&name, description, body);
        self
    }

    /// Group steps are full task names.
    pub fn group(&mut self, name: &str, description: &str, steps: &[&str]) -> &mut Self {
        let name = self.qualify(name);
        self.graph.group(&name, description, steps);
        self
    }

    pub fn namespace(&mut self, prefix: &str, define: impl FnOnce(&mut Namespace<'_>)) -> &mut Self {
        let prefix = self.qualify(prefix);
        let mut ns = Namespace {
            graph: &mut *self.graph,
            prefix,
        };
        define(&mut ns);
        self
    }
}
