use super::DEFAULT_GAP_THRESHOLD;
use crate::compression;
use crate::error::TransferError;
use axterm_proto::axdp::FileOffer;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverState {
    AwaitingAccept,
    Receiving,
    Completed,
    Cancelled,
    Failed(String),
}

pub struct ReceiverTransfer {
    pub transfer_id: u64,
    pub offer: FileOffer,
    pub state: ReceiverState,
    chunks: BTreeMap<u32, Vec<u8>>,
    next_expected: u32,
    receive_started_at: Option<Instant>,
}

impl ReceiverTransfer {
    pub fn new(offer: FileOffer) -> Self {
        Self {
            transfer_id: offer.transfer_id,
            state: ReceiverState::AwaitingAccept,
            offer,
            chunks: BTreeMap::new(),
            next_expected: 0,
            receive_started_at: None,
        }
    }

    pub fn accept(&mut self) {
        self.state = ReceiverState::Receiving;
        self.receive_started_at = Some(Instant::now());
    }

    /// Stores an incoming chunk. Returns `Some(missing_index)` if the gap
    /// since the last contiguous chunk now exceeds the NACK threshold.
    pub fn on_chunk(&mut self, index: u32, payload: Vec<u8>) -> Option<u32> {
        if self.state != ReceiverState::Receiving {
            return None;
        }
        self.chunks.insert(index, payload);
        while self.chunks.contains_key(&self.next_expected) {
            self.next_expected += 1;
        }
        let highest = self.chunks.keys().next_back().copied().unwrap_or(0);
        if highest.saturating_sub(self.next_expected) >= DEFAULT_GAP_THRESHOLD {
            Some(self.next_expected)
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.offer.total_chunks
    }

    /// Reassembles, decompresses, and verifies the hash. Does not write to
    /// disk itself; the caller (engine) does that once this succeeds, so
    /// a failing integrity check never touches the filesystem.
    pub fn finalize(&mut self) -> Result<Vec<u8>, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::ChunkOutOfRange {
                index: self.chunks.len() as u32,
                total: self.offer.total_chunks,
            });
        }
        let mut transmitted = Vec::with_capacity(self.offer.transmission_size as usize);
        for (_, chunk) in self.chunks.iter() {
            transmitted.extend_from_slice(chunk);
        }

        let plain = match self.offer.compression_algo {
            Some(algo) => compression::decompress(algo, &transmitted)
                .map_err(|_| TransferError::IntegrityCheckFailed)?,
            None => transmitted,
        };

        let mut hasher = Sha256::new();
        hasher.update(&plain);
        let digest: [u8; 32] = hasher.finalize().into();
        if digest != self.offer.hash {
            self.state = ReceiverState::Failed("integrity check failed".into());
            return Err(TransferError::IntegrityCheckFailed);
        }

        self.state = ReceiverState::Completed;
        Ok(plain)
    }

    pub fn cancel(&mut self) {
        self.state = ReceiverState::Cancelled;
    }

    pub fn received_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn offer_for(data: &[u8], chunk_size: usize) -> (FileOffer, Vec<Vec<u8>>) {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash: [u8; 32] = hasher.finalize().into();
        let chunks: Vec<Vec<u8>> = data.chunks(chunk_size).map(|c| c.to_vec()).collect();
        let offer = FileOffer {
            transfer_id: 1,
            file_name: "doc.txt".into(),
            file_size: data.len() as u64,
            transmission_size: data.len() as u64,
            chunk_size: chunk_size as u32,
            total_chunks: chunks.len() as u32,
            hash,
            compression_algo: None,
        };
        (offer, chunks)
    }

    #[test]
    fn reassembles_in_order_and_verifies_hash() {
        let data = b"some file contents spanning several chunks".to_vec();
        let (offer, chunks) = offer_for(&data, 8);
        let mut r = ReceiverTransfer::new(offer);
        r.accept();
        for (i, chunk) in chunks.into_iter().enumerate() {
            r.on_chunk(i as u32, chunk);
        }
        assert!(r.is_complete());
        let result = r.finalize().unwrap();
        assert_eq!(result, data);
        assert_eq!(r.state, ReceiverState::Completed);
    }

    #[test]
    fn out_of_order_chunks_still_reassemble() {
        let data = b"0123456789abcdefghijklmnop".to_vec();
        let (offer, chunks) = offer_for(&data, 4);
        let mut r = ReceiverTransfer::new(offer);
        r.accept();
        for i in (0..chunks.len()).rev() {
            r.on_chunk(i as u32, chunks[i].clone());
        }
        let result = r.finalize().unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn hash_mismatch_fails_without_partial_result() {
        let data = b"original data".to_vec();
        let (mut offer, chunks) = offer_for(&data, 5);
        offer.hash[0] ^= 0xFF;
        let mut r = ReceiverTransfer::new(offer);
        r.accept();
        for (i, chunk) in chunks.into_iter().enumerate() {
            r.on_chunk(i as u32, chunk);
        }
        let err = r.finalize().unwrap_err();
        assert_eq!(err, TransferError::IntegrityCheckFailed);
        assert_eq!(r.state, ReceiverState::Failed("integrity check failed".into()));
    }

    #[test]
    fn large_gap_triggers_nack() {
        let data = vec![0u8; 100];
        let (offer, _chunks) = offer_for(&data, 10);
        let mut r = ReceiverTransfer::new(offer);
        r.accept();
        // Chunk 5 arrives while 0..5 are still missing: gap of 5 >= threshold 4.
        let nack = r.on_chunk(5, vec![0u8; 10]);
        assert_eq!(nack, Some(0));
    }
}
