use super::DEFAULT_CHUNK_WINDOW;
use crate::error::TransferError;
use axterm_proto::axdp::{CompressionAlgo, FileOffer, RemoteTransferMetrics};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub enum SenderState {
    Offering,
    Sending,
    Paused,
    Completed(RemoteTransferMetrics),
    Cancelled,
    Failed(String),
}

/// Sender-side state for one bulk transfer. Owns the already-compressed
/// chunk payloads; `offer` is what was actually announced on the wire
/// (post-compression sizes).
pub struct SenderTransfer {
    pub transfer_id: u64,
    pub offer: FileOffer,
    chunks: Vec<Vec<u8>>,
    pub state: SenderState,
    next_to_send: u32,
    next_unacked: u32,
    window: u32,
    data_phase_start: Option<Instant>,
}

impl SenderTransfer {
    pub fn new(transfer_id: u64, offer: FileOffer, chunks: Vec<Vec<u8>>) -> Self {
        debug_assert_eq!(chunks.len() as u32, offer.total_chunks);
        Self {
            transfer_id,
            offer,
            chunks,
            state: SenderState::Offering,
            next_to_send: 0,
            next_unacked: 0,
            window: DEFAULT_CHUNK_WINDOW,
            data_phase_start: None,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.offer.total_chunks
    }

    /// `FILE_ACCEPT` arrived: begin the data phase and return the first
    /// batch of chunks to transmit.
    pub fn on_accept(&mut self) -> Vec<(u32, Vec<u8>)> {
        self.state = SenderState::Sending;
        self.data_phase_start = Some(Instant::now());
        self.pump()
    }

    /// Returns chunks newly eligible to send given the current window.
    pub fn pump(&mut self) -> Vec<(u32, Vec<u8>)> {
        if self.state != SenderState::Sending {
            return Vec::new();
        }
        let mut out = Vec::new();
        while self.next_to_send < self.total_chunks()
            && self.next_to_send - self.next_unacked < self.window
        {
            let idx = self.next_to_send;
            out.push((idx, self.chunks[idx as usize].clone()));
            self.next_to_send += 1;
        }
        out
    }

    /// `FILE_CHUNK_ACK { next_expected_index }`: frees acked chunks and
    /// returns any newly-opened-window chunks to send.
    pub fn on_ack(&mut self, next_expected_index: u32) -> Vec<(u32, Vec<u8>)> {
        if next_expected_index > self.next_unacked {
            self.next_unacked = next_expected_index.min(self.total_chunks());
        }
        if self.next_unacked >= self.total_chunks() {
            return Vec::new();
        }
        self.pump()
    }

    /// `FILE_CHUNK_NACK { missing_index }`: resend just that one chunk.
    pub fn on_nack(&mut self, missing_index: u32) -> Result<(u32, Vec<u8>), TransferError> {
        if missing_index >= self.total_chunks() {
            return Err(TransferError::ChunkOutOfRange {
                index: missing_index,
                total: self.total_chunks(),
            });
        }
        warn!(transfer_id = self.transfer_id, missing_index, "resending nacked chunk");
        Ok((missing_index, self.chunks[missing_index as usize].clone()))
    }

    pub fn on_complete(&mut self, remote_metrics: RemoteTransferMetrics) {
        self.state = SenderState::Completed(remote_metrics);
    }

    pub fn pause(&mut self) {
        if self.state == SenderState::Sending {
            self.state = SenderState::Paused;
        }
    }

    pub fn resume(&mut self) -> Vec<(u32, Vec<u8>)> {
        if self.state == SenderState::Paused {
            self.state = SenderState::Sending;
            self.pump()
        } else {
            Vec::new()
        }
    }

    pub fn cancel(&mut self) {
        self.state = SenderState::Cancelled;
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SenderState::Completed(_) | SenderState::Cancelled | SenderState::Failed(_)
        )
    }

    pub fn compression(&self) -> Option<CompressionAlgo> {
        self.offer.compression_algo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(total_chunks: u32) -> FileOffer {
        FileOffer {
            transfer_id: 1,
            file_name: "a.bin".into(),
            file_size: 100,
            transmission_size: 100,
            chunk_size: 10,
            total_chunks,
            hash: [0u8; 32],
            compression_algo: None,
        }
    }

    fn chunks(n: u32) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8; 10]).collect()
    }

    #[test]
    fn accept_pumps_up_to_window() {
        let mut t = SenderTransfer::new(1, offer(20), chunks(20));
        let batch = t.on_accept();
        assert_eq!(batch.len(), DEFAULT_CHUNK_WINDOW as usize);
        assert_eq!(batch[0].0, 0);
    }

    #[test]
    fn ack_opens_window_for_more() {
        let mut t = SenderTransfer::new(1, offer(20), chunks(20));
        t.on_accept();
        let more = t.on_ack(4);
        assert_eq!(more.len(), 4);
        assert_eq!(more[0].0, DEFAULT_CHUNK_WINDOW);
    }

    #[test]
    fn nack_resends_single_chunk() {
        let mut t = SenderTransfer::new(1, offer(20), chunks(20));
        t.on_accept();
        let (idx, payload) = t.on_nack(2).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(payload, chunks(20)[2]);
    }

    #[test]
    fn pause_blocks_pumping_until_resumed() {
        let mut t = SenderTransfer::new(1, offer(20), chunks(20));
        t.on_accept();
        t.on_ack(4); // frees room, auto-pumps the newly opened slots
        t.pause();
        assert_eq!(t.state, SenderState::Paused);
        assert!(t.pump().is_empty(), "a paused transfer must not pump");

        assert_eq!(t.resume(), Vec::<(u32, Vec<u8>)>::new());
        assert_eq!(t.state, SenderState::Sending);
    }
}
