//! The AXDP session layer: everything that rides on top of a connected-mode
//! AX.25 session once bytes are framed into [`AxdpMessage`]s elsewhere.
//! This crate has no I/O of its own — it turns inbound messages into
//! events and state changes, and hands back outbound messages for the
//! caller to wrap in I-frames.

pub mod capability;
pub mod chat;
pub mod compression;
pub mod error;
pub mod transfer;

pub use capability::{CapabilityStore, StationKey};
pub use error::TransferError;
pub use transfer::{PeerFilePolicy, ReceiverTransfer, SenderTransfer, TransferLedger};

use axterm_proto::axdp::{
    AxdpMessage, CapabilityBlock, CompressionAlgo, FileOffer, MessageBody, RemoteTransferMetrics,
};
use chat::ChatReassembler;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AxdpEvent {
    CapabilityConfirmed(CapabilityBlock),
    ChatDelivered(String),
    FileOffered(FileOffer),
    FileAccepted { transfer_id: u64 },
    FileDeclined { transfer_id: u64, reason: String },
    FileProgress { transfer_id: u64, received: usize, total: u32 },
    FileCompleted { transfer_id: u64, data: Vec<u8> },
    FileFailed { transfer_id: u64, reason: String },
    FileCancelled { transfer_id: u64 },
}

#[derive(Default)]
pub struct AxdpOutcome {
    pub events: Vec<AxdpEvent>,
    pub outbound: Vec<AxdpMessage>,
}

impl AxdpOutcome {
    fn event(mut self, e: AxdpEvent) -> Self {
        self.events.push(e);
        self
    }

    fn send(mut self, m: AxdpMessage) -> Self {
        self.outbound.push(m);
        self
    }
}

/// Per-peer AXDP state: one instance per connected AX.25 session.
pub struct AxdpSession {
    pub peer: StationKey,
    chat: ChatReassembler,
    senders: HashMap<u64, SenderTransfer>,
    receivers: HashMap<u64, ReceiverTransfer>,
    receive_started_at: HashMap<u64, Instant>,
    ledger: TransferLedger,
    seq: u16,
}

impl AxdpSession {
    pub fn new(peer: StationKey) -> Self {
        Self {
            peer,
            chat: ChatReassembler::new(),
            senders: HashMap::new(),
            receivers: HashMap::new(),
            receive_started_at: HashMap::new(),
            ledger: TransferLedger::new(),
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u16 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    /// Called once the underlying AX.25 session reaches `Connected`.
    pub fn on_connected(&mut self, local_caps: CapabilityBlock) -> AxdpMessage {
        AxdpMessage::ping(local_caps, self.next_seq())
    }

    pub fn send_chat(&mut self, text: &str) -> Vec<AxdpMessage> {
        const FRAGMENT_LEN: usize = 200;
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return vec![AxdpMessage::chat(&[], true, self.next_seq())];
        }
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + FRAGMENT_LEN).min(bytes.len());
            let is_last = end == bytes.len();
            messages.push(AxdpMessage::chat(&bytes[offset..end], is_last, self.next_seq()));
            offset = end;
        }
        messages
    }

    /// Starts a sender-side transfer. `compression_override` wins over
    /// `global_default_compression`; `sample` is the compressibility-probe
    /// window (first few KiB of the file).
    #[allow(clippy::too_many_arguments)]
    pub fn start_transfer(
        &mut self,
        transfer_id: u64,
        file_name: String,
        data: &[u8],
        sample: &[u8],
        compression_override: Option<CompressionAlgo>,
        global_default_compression: CompressionAlgo,
    ) -> Result<AxdpMessage, TransferError> {
        if !self.ledger.can_start(transfer_id) {
            return Err(TransferError::DuplicateTransferId(transfer_id));
        }

        let report = compression::probe(&file_name, sample);
        let algo = compression_override.unwrap_or(global_default_compression);
        let algo = if report.is_compressible {
            algo
        } else {
            CompressionAlgo::None
        };

        let mut hasher = Sha256::new();
        hasher.update(data);
        let hash: [u8; 32] = hasher.finalize().into();

        let (transmitted, was_effective) = compression::compress(algo, data);
        let effective_algo = if was_effective { Some(algo) } else { None };
        if !was_effective {
            info!(transfer_id, "compression not effective, sending uncompressed");
        }

        const CHUNK_SIZE: usize = 200;
        let chunks: Vec<Vec<u8>> = transmitted.chunks(CHUNK_SIZE).map(|c| c.to_vec()).collect();
        let total_chunks = chunks.len().max(1) as u32;

        let offer = FileOffer {
            transfer_id,
            file_name,
            file_size: data.len() as u64,
            transmission_size: transmitted.len() as u64,
            chunk_size: CHUNK_SIZE as u32,
            total_chunks,
            hash,
            compression_algo: effective_algo,
        };

        let sender = SenderTransfer::new(transfer_id, offer.clone(), chunks);
        self.senders.insert(transfer_id, sender);

        Ok(AxdpMessage {
            msg_type: axterm_proto::axdp::MessageType::FileOffer,
            proto_version: axterm_proto::axdp::PROTO_VERSION,
            flags: 0,
            seq: self.next_seq(),
            body: MessageBody::FileOffer(offer),
        })
    }

    pub fn pause_transfer(&mut self, transfer_id: u64) -> Option<AxdpMessage> {
        let sender = self.senders.get_mut(&transfer_id)?;
        sender.pause();
        Some(AxdpMessage {
            msg_type: axterm_proto::axdp::MessageType::FilePause,
            proto_version: axterm_proto::axdp::PROTO_VERSION,
            flags: 0,
            seq: self.next_seq(),
            body: MessageBody::FilePause { transfer_id },
        })
    }

    pub fn resume_transfer(&mut self, transfer_id: u64) -> Vec<AxdpMessage> {
        let Some(sender) = self.senders.get_mut(&transfer_id) else {
            return Vec::new();
        };
        let resumed = sender.resume();
        let mut out = vec![AxdpMessage {
            msg_type: axterm_proto::axdp::MessageType::FileResume,
            proto_version: axterm_proto::axdp::PROTO_VERSION,
            flags: 0,
            seq: self.next_seq(),
            body: MessageBody::FileResume { transfer_id },
        }];
        out.extend(self.chunk_messages(transfer_id, resumed));
        out
    }

    pub fn cancel_transfer(&mut self, transfer_id: u64) -> Option<AxdpMessage> {
        if let Some(sender) = self.senders.get_mut(&transfer_id) {
            sender.cancel();
            self.ledger.mark_finished(transfer_id);
        }
        if let Some(receiver) = self.receivers.get_mut(&transfer_id) {
            receiver.cancel();
            self.ledger.mark_finished(transfer_id);
        }
        Some(AxdpMessage {
            msg_type: axterm_proto::axdp::MessageType::FileCancel,
            proto_version: axterm_proto::axdp::PROTO_VERSION,
            flags: 0,
            seq: self.next_seq(),
            body: MessageBody::FileCancel { transfer_id },
        })
    }

    fn chunk_messages(&mut self, transfer_id: u64, chunks: Vec<(u32, Vec<u8>)>) -> Vec<AxdpMessage> {
        chunks
            .into_iter()
            .map(|(index, payload)| AxdpMessage {
                msg_type: axterm_proto::axdp::MessageType::FileChunk,
                proto_version: axterm_proto::axdp::PROTO_VERSION,
                flags: 0,
                seq: self.seq,
                body: MessageBody::FileChunk(axterm_proto::axdp::FileChunk {
                    transfer_id,
                    index,
                    payload,
                }),
            })
            .collect()
    }

    /// Decides whether to accept an incoming offer per the peer's file
    /// permission policy, starting the receiver-side state machine if so.
    fn decide_offer(&mut self, offer: FileOffer, policy: PeerFilePolicy) -> AxdpOutcome {
        let outcome = AxdpOutcome::default().event(AxdpEvent::FileOffered(offer.clone()));
        let transfer_id = offer.transfer_id;

        if !self.ledger.can_start(transfer_id) {
            return outcome.send(AxdpMessage {
                msg_type: axterm_proto::axdp::MessageType::FileDecline,
                proto_version: axterm_proto::axdp::PROTO_VERSION,
                flags: 0,
                seq: self.seq,
                body: MessageBody::FileDecline {
                    transfer_id,
                    reason: "duplicate transfer id".into(),
                },
            });
        }

        match policy {
            PeerFilePolicy::AlwaysDeny => outcome.send(AxdpMessage {
                msg_type: axterm_proto::axdp::MessageType::FileDecline,
                proto_version: axterm_proto::axdp::PROTO_VERSION,
                flags: 0,
                seq: self.next_seq(),
                body: MessageBody::FileDecline {
                    transfer_id,
                    reason: "peer policy denies incoming files".into(),
                },
            }),
            PeerFilePolicy::AlwaysAccept => {
                let mut receiver = ReceiverTransfer::new(offer);
                receiver.accept();
                self.receivers.insert(transfer_id, receiver);
                self.receive_started_at.insert(transfer_id, Instant::now());
                outcome.send(AxdpMessage {
                    msg_type: axterm_proto::axdp::MessageType::FileAccept,
                    proto_version: axterm_proto::axdp::PROTO_VERSION,
                    flags: 0,
                    seq: self.next_seq(),
                    body: MessageBody::FileAccept { transfer_id },
                })
            }
            // The engine surfaces the offer event to the operator and
            // calls `accept_offer`/`decline_offer` explicitly; no reply
            // is sent here.
            PeerFilePolicy::Ask => outcome,
        }
    }

    pub fn accept_offer(&mut self, offer: FileOffer) -> AxdpMessage {
        let transfer_id = offer.transfer_id;
        let mut receiver = ReceiverTransfer::new(offer);
        receiver.accept();
        self.receivers.insert(transfer_id, receiver);
        self.receive_started_at.insert(transfer_id, Instant::now());
        AxdpMessage {
            msg_type: axterm_proto::axdp::MessageType::FileAccept,
            proto_version: axterm_proto::axdp::PROTO_VERSION,
            flags: 0,
            seq: self.next_seq(),
            body: MessageBody::FileAccept { transfer_id },
        }
    }

    pub fn decline_offer(&mut self, transfer_id: u64, reason: String) -> AxdpMessage {
        AxdpMessage {
            msg_type: axterm_proto::axdp::MessageType::FileDecline,
            proto_version: axterm_proto::axdp::PROTO_VERSION,
            flags: 0,
            seq: self.next_seq(),
            body: MessageBody::FileDecline { transfer_id, reason },
        }
    }

    /// Handles one inbound AXDP PDU, returning events to surface to the
    /// engine plus outbound PDUs to transmit in reply.
    pub fn on_message(
        &mut self,
        msg: AxdpMessage,
        local_caps: CapabilityBlock,
        file_policy: PeerFilePolicy,
    ) -> AxdpOutcome {
        let msg_type = msg.msg_type;
        let is_end_of_message = msg.is_end_of_message();
        match msg.body {
            MessageBody::Capability(caps) => {
                let mut outcome = AxdpOutcome::default().event(AxdpEvent::CapabilityConfirmed(caps));
                if matches!(msg_type, axterm_proto::axdp::MessageType::Ping) {
                    outcome = outcome.send(AxdpMessage::pong(local_caps, self.next_seq()));
                }
                outcome
            }
            MessageBody::Chat(fragment) => {
                match self.chat.push(&fragment, is_end_of_message) {
                    Some(line) => AxdpOutcome::default().event(AxdpEvent::ChatDelivered(line)),
                    None => AxdpOutcome::default(),
                }
            }
            MessageBody::FileOffer(offer) => self.decide_offer(offer, file_policy),
            MessageBody::FileAccept { transfer_id } => {
                let Some(sender) = self.senders.get_mut(&transfer_id) else {
                    return AxdpOutcome::default();
                };
                let chunks = sender.on_accept();
                let mut outcome =
                    AxdpOutcome::default().event(AxdpEvent::FileAccepted { transfer_id });
                outcome.outbound = self.chunk_messages(transfer_id, chunks);
                outcome
            }
            MessageBody::FileDecline { transfer_id, reason } => {
                self.senders.remove(&transfer_id);
                self.ledger.mark_finished(transfer_id);
                AxdpOutcome::default().event(AxdpEvent::FileDeclined { transfer_id, reason })
            }
            MessageBody::FileChunk(chunk) => {
                let transfer_id = chunk.transfer_id;
                let Some(receiver) = self.receivers.get_mut(&transfer_id) else {
                    return AxdpOutcome::default();
                };
                let nack = receiver.on_chunk(chunk.index, chunk.payload);
                let mut outcome = AxdpOutcome::default().event(AxdpEvent::FileProgress {
                    transfer_id,
                    received: receiver.received_chunks(),
                    total: receiver.offer.total_chunks,
                });
                if let Some(missing_index) = nack {
                    outcome = outcome.send(AxdpMessage {
                        msg_type: axterm_proto::axdp::MessageType::FileChunkNack,
                        proto_version: axterm_proto::axdp::PROTO_VERSION,
                        flags: 0,
                        seq: self.next_seq(),
                        body: MessageBody::FileChunkNack { transfer_id, missing_index },
                    });
                }
                if receiver.is_complete() {
                    outcome = self.finalize_receiver(transfer_id, outcome);
                }
                outcome
            }
            MessageBody::FileChunkAck { transfer_id, next_expected_index } => {
                let Some(sender) = self.senders.get_mut(&transfer_id) else {
                    return AxdpOutcome::default();
                };
                let chunks = sender.on_ack(next_expected_index);
                let mut outcome = AxdpOutcome::default();
                outcome.outbound = self.chunk_messages(transfer_id, chunks);
                outcome
            }
            MessageBody::FileChunkNack { transfer_id, missing_index } => {
                let Some(sender) = self.senders.get_mut(&transfer_id) else {
                    return AxdpOutcome::default();
                };
                match sender.on_nack(missing_index) {
                    Ok((index, payload)) => {
                        AxdpOutcome::default().send(AxdpMessage {
                            msg_type: axterm_proto::axdp::MessageType::FileChunk,
                            proto_version: axterm_proto::axdp::PROTO_VERSION,
                            flags: 0,
                            seq: self.next_seq(),
                            body: MessageBody::FileChunk(axterm_proto::axdp::FileChunk {
                                transfer_id,
                                index,
                                payload,
                            }),
                        })
                    }
                    Err(e) => {
                        warn!(transfer_id, error = %e, "nack for out-of-range chunk");
                        AxdpOutcome::default()
                    }
                }
            }
            MessageBody::FileComplete { transfer_id, remote_metrics } => {
                if let Some(sender) = self.senders.get_mut(&transfer_id) {
                    sender.on_complete(remote_metrics);
                }
                self.ledger.mark_finished(transfer_id);
                AxdpOutcome::default().event(AxdpEvent::FileCompleted {
                    transfer_id,
                    data: Vec::new(),
                })
            }
            MessageBody::FileCancel { transfer_id } => {
                self.senders.remove(&transfer_id);
                self.receivers.remove(&transfer_id);
                self.ledger.mark_finished(transfer_id);
                AxdpOutcome::default().event(AxdpEvent::FileCancelled { transfer_id })
            }
            // Pause/resume only gate the sender's pump; the receiver keeps
            // whatever chunks continue to arrive.
            MessageBody::FilePause { .. } => AxdpOutcome::default(),
            MessageBody::FileResume { .. } => AxdpOutcome::default(),
        }
    }

    fn finalize_receiver(&mut self, transfer_id: u64, outcome: AxdpOutcome) -> AxdpOutcome {
        let Some(receiver) = self.receivers.get_mut(&transfer_id) else {
            return outcome;
        };
        let started = self
            .receive_started_at
            .remove(&transfer_id)
            .map(|t| t.elapsed())
            .unwrap_or_default();
        match receiver.finalize() {
            Ok(data) => {
                self.ledger.mark_finished(transfer_id);
                let metrics = RemoteTransferMetrics {
                    receive_duration_ms: started.as_millis().min(u32::MAX as u128) as u32,
                    processing_duration_ms: 0,
                };
                outcome
                    .event(AxdpEvent::FileCompleted { transfer_id, data })
                    .send(AxdpMessage {
                        msg_type: axterm_proto::axdp::MessageType::FileComplete,
                        proto_version: axterm_proto::axdp::PROTO_VERSION,
                        flags: 0,
                        seq: self.seq,
                        body: MessageBody::FileComplete {
                            transfer_id,
                            remote_metrics: metrics,
                        },
                    })
            }
            Err(e) => {
                self.ledger.mark_finished(transfer_id);
                outcome.event(AxdpEvent::FileFailed {
                    transfer_id,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axterm_proto::axdp::Features;

    fn caps() -> CapabilityBlock {
        CapabilityBlock {
            proto_min: 1,
            proto_max: 1,
            features: Features::RESUME | Features::AT_MOST_ONCE,
        }
    }

    #[test]
    fn ping_yields_pong_and_capability_event() {
        let mut session = AxdpSession::new(StationKey::new("N0CALL", 1));
        let ping = AxdpMessage::ping(caps(), 1);
        let outcome = session.on_message(ping, caps(), PeerFilePolicy::Ask);
        assert_eq!(outcome.events.len(), 1);
        assert!(matches!(outcome.events[0], AxdpEvent::CapabilityConfirmed(_)));
        assert_eq!(outcome.outbound.len(), 1);
        assert!(matches!(
            outcome.outbound[0].msg_type,
            axterm_proto::axdp::MessageType::Pong
        ));
    }

    #[test]
    fn chat_reassembles_across_messages() {
        let mut session = AxdpSession::new(StationKey::new("N0CALL", 1));
        let first = AxdpMessage::chat(b"hello ", false, 1);
        let second = AxdpMessage::chat(b"world", true, 2);
        assert!(session.on_message(first, caps(), PeerFilePolicy::Ask).events.is_empty());
        let outcome = session.on_message(second, caps(), PeerFilePolicy::Ask);
        assert_eq!(outcome.events, vec![AxdpEvent::ChatDelivered("hello world".into())]);
    }

    #[test]
    fn full_transfer_round_trip() {
        let mut sender_session = AxdpSession::new(StationKey::new("N0CALL", 1));
        let data = b"the complete contents of a small test file".to_vec();
        let offer_msg = sender_session
            .start_transfer(
                1,
                "test.txt".into(),
                &data,
                &data,
                None,
                CompressionAlgo::None,
            )
            .unwrap();

        let mut receiver_session = AxdpSession::new(StationKey::new("K0EPI", 7));
        let outcome = receiver_session.on_message(offer_msg, caps(), PeerFilePolicy::AlwaysAccept);
        let accept_msg = outcome
            .outbound
            .into_iter()
            .find(|m| matches!(m.msg_type, axterm_proto::axdp::MessageType::FileAccept))
            .unwrap();

        let outcome = sender_session.on_message(accept_msg, caps(), PeerFilePolicy::Ask);
        assert!(!outcome.outbound.is_empty());

        let mut final_outcome = AxdpOutcome::default();
        for chunk_msg in outcome.outbound {
            let o = receiver_session.on_message(chunk_msg, caps(), PeerFilePolicy::AlwaysAccept);
            final_outcome.events.extend(o.events);
            final_outcome.outbound.extend(o.outbound);
        }

        let completed = final_outcome.events.iter().find_map(|e| match e {
            AxdpEvent::FileCompleted { data, .. } => Some(data.clone()),
            _ => None,
        });
        assert_eq!(completed, Some(data));
    }
}
