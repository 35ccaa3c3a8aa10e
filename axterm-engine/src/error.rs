use axterm_link::LinkError;
use axterm_store::error::PersistenceError;
use thiserror::Error;

/// Top-level engine error. Per the error-propagation policy, persistence
/// failures never reach callers synchronously (they're logged and the
/// pipeline continues) — this type exists for the control-surface calls
/// that genuinely can fail outright: link setup and session/transfer
/// lookups.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("no active link")]
    NoActiveLink,
    #[error("unknown session for {0}")]
    UnknownSession(String),
    #[error("unknown transfer {0}")]
    UnknownTransfer(u64),
    #[error("decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
