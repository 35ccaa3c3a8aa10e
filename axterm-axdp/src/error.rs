use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("integrity check failed")]
    IntegrityCheckFailed,
    #[error("transfer {0} already completed or cancelled")]
    DuplicateTransferId(u64),
    #[error("unknown transfer id {0}")]
    UnknownTransferId(u64),
    #[error("chunk index {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },
}
