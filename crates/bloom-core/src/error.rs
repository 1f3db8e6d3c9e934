use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TaskStoreError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("tasks.yaml has duplicate task id `{0}`")]
    DuplicateId(String),
    #[error("task `{0}` has a cyclic dependency")]
    CyclicDependency(String),
    #[error("task `{0}` depends on unknown task `{1}`")]
    UnknownDependency(String, String),
    #[error("task `{task_id}` cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: String,
        from: crate::types::TaskStatus,
        to: crate::types::TaskStatus,
    },
    #[error("task `{0}` not found")]
    NotFound(String),
    #[error("step `{0}` not found")]
    StepNotFound(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("workspace config not found at {0} (pass --auto-detect or create it)")]
    WorkspaceConfigMissing(PathBuf),
    #[error("opencode.defaultModel is required when an opencode agent section is present")]
    MissingOpenCodeDefaultModel,
}
