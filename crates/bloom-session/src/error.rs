#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("agent `{0}` already has a live session")]
    AgentBusy(String),
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session for agent `{0}` was interjected before it produced a result")]
    Interjected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("no tracked instance for agent `{0}`")]
    NoInstance(String),
}
