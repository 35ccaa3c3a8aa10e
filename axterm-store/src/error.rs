#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to open store: {0}")]
    OpenFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),
    #[error("persistence worker is gone")]
    WorkerGone,
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
