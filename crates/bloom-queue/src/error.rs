use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no record found for id `{0}`")]
    NotFound(String),
    #[error("failed to start filesystem watch: {0}")]
    Watch(String),
    #[error(transparent)]
    TaskStore(#[from] bloom_core::TaskStoreError),
}

impl From<std::io::Error> for QueueError {
    fn from(source: std::io::Error) -> Self {
        QueueError::Io { path: PathBuf::new(), source }
    }
}
