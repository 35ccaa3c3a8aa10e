pub mod receiver;
pub mod sender;

pub use receiver::{ReceiverState, ReceiverTransfer};
pub use sender::{SenderState, SenderTransfer};

use std::collections::HashSet;

/// Chunks in flight at once. The wire format's `FILE_ACCEPT` carries no
/// window field, so this is a local constant rather than a negotiated one.
pub const DEFAULT_CHUNK_WINDOW: u32 = 8;

/// Chunk gap, in indices, that triggers a receiver-side NACK.
pub const DEFAULT_GAP_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PeerFilePolicy {
    Ask,
    AlwaysAccept,
    AlwaysDeny,
}

/// Enforces at-most-once semantics: refuses to start a transfer whose id
/// already reached a terminal state.
#[derive(Debug, Default)]
pub struct TransferLedger {
    finished: HashSet<u64>,
}

impl TransferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_start(&self, transfer_id: u64) -> bool {
        !self.finished.contains(&transfer_id)
    }

    pub fn mark_finished(&mut self, transfer_id: u64) {
        self.finished.insert(transfer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_duplicate_restart() {
        let mut ledger = TransferLedger::new();
        assert!(ledger.can_start(7));
        ledger.mark_finished(7);
        assert!(!ledger.can_start(7));
    }
}
