pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Please configure {0}")]
    Configuration(String),

    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("remote command failed (exit {exit_code}): {command}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("upload to {path} failed: {reason}")]
    Upload { path: String, reason: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: Box<DeployError>,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// The innermost error, skipping `TaskFailed` wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the task that failed, if the error came out of a
    /// task run.
    #[must_use]
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            Self::TaskFailed { task, .. } => Some(task),
            _ => None,
        }
    }
}
