#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("agent `{0}` already has a live session")]
    AgentBusy(String),
    #[error(transparent)]
    TaskStore(#[from] bloom_core::TaskStoreError),
    #[error(transparent)]
    GitPipeline(#[from] bloom_git::GitPipelineError),
    #[error(transparent)]
    Session(#[from] bloom_session::SessionError),
    #[error(transparent)]
    Queue(#[from] bloom_queue::QueueError),
    #[error("task `{0}` not found")]
    TaskNotFound(String),
}
