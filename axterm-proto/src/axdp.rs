//! AXDP: the application-layer protocol AXTerm runs over AX.25 I-frames.
//!
//! PDUs ride in I-frame `info` with PID [`crate::ax25::PID_NO_LAYER3`] and a
//! 4-byte magic prefix. The decoder is frame-spanning: [`decode`] returns
//! `Ok(None)` when the buffer holds fewer bytes than the declared body
//! length, so the caller can defer the remainder to the next I-frame.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

pub const MAGIC: [u8; 4] = *b"AXDP";
pub const PROTO_VERSION: u8 = 1;

/// Bit 0 of the PDU flags byte: set on the final fragment of a CHAT message.
pub const FLAG_END_OF_MESSAGE: u8 = 0x01;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AxdpError {
    #[error("AXDP magic prefix mismatch")]
    BadMagic,
    #[error("unknown AXDP message type byte 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("AXDP body malformed: {0}")]
    Malformed(String),
}

impl From<io::Error> for AxdpError {
    fn from(e: io::Error) -> Self {
        AxdpError::Malformed(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Ping = 1,
    Pong = 2,
    Chat = 3,
    FileOffer = 4,
    FileAccept = 5,
    FileDecline = 6,
    FileChunk = 7,
    FileChunkAck = 8,
    FileChunkNack = 9,
    FileComplete = 10,
    FileCancel = 11,
    FilePause = 12,
    FileResume = 13,
}

impl MessageType {
    fn from_byte(b: u8) -> Result<Self, AxdpError> {
        Ok(match b {
            1 => MessageType::Ping,
            2 => MessageType::Pong,
            3 => MessageType::Chat,
            4 => MessageType::FileOffer,
            5 => MessageType::FileAccept,
            6 => MessageType::FileDecline,
            7 => MessageType::FileChunk,
            8 => MessageType::FileChunkAck,
            9 => MessageType::FileChunkNack,
            10 => MessageType::FileComplete,
            11 => MessageType::FileCancel,
            12 => MessageType::FilePause,
            13 => MessageType::FileResume,
            other => return Err(AxdpError::UnknownMessageType(other)),
        })
    }
}

bitflags::bitflags! {
    /// Capability feature bitmap, carried in PING/PONG capability blocks.
    pub struct Features: u32 {
        const COMPRESSION_LZ4 = 1 << 0;
        const COMPRESSION_DEFLATE = 1 << 1;
        const RESUME = 1 << 2;
        const PAUSE = 1 << 3;
        const LARGE_FILES = 1 << 4;
        const AT_MOST_ONCE = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityBlock {
    pub proto_min: u8,
    pub proto_max: u8,
    pub features: Features,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompressionAlgo {
    None,
    Lz4,
    Deflate,
}

impl CompressionAlgo {
    fn to_byte(self) -> u8 {
        match self {
            CompressionAlgo::None => 0,
            CompressionAlgo::Lz4 => 1,
            CompressionAlgo::Deflate => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, AxdpError> {
        Ok(match b {
            0 => CompressionAlgo::None,
            1 => CompressionAlgo::Lz4,
            2 => CompressionAlgo::Deflate,
            other => return Err(AxdpError::Malformed(format!("bad compression algo {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub transfer_id: u64,
    pub file_name: String,
    pub file_size: u64,
    pub transmission_size: u64,
    pub chunk_size: u32,
    pub total_chunks: u32,
    pub hash: [u8; 32],
    pub compression_algo: Option<CompressionAlgo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub transfer_id: u64,
    pub index: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTransferMetrics {
    pub receive_duration_ms: u32,
    pub processing_duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Capability(CapabilityBlock),
    Chat(Vec<u8>),
    FileOffer(FileOffer),
    FileAccept { transfer_id: u64 },
    FileDecline { transfer_id: u64, reason: String },
    FileChunk(FileChunk),
    FileChunkAck { transfer_id: u64, next_expected_index: u32 },
    FileChunkNack { transfer_id: u64, missing_index: u32 },
    FileComplete { transfer_id: u64, remote_metrics: RemoteTransferMetrics },
    FileCancel { transfer_id: u64 },
    FilePause { transfer_id: u64 },
    FileResume { transfer_id: u64 },
}

impl MessageBody {
    fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Capability(_) => MessageType::Ping, // overridden by caller for Pong
            MessageBody::Chat(_) => MessageType::Chat,
            MessageBody::FileOffer(_) => MessageType::FileOffer,
            MessageBody::FileAccept { .. } => MessageType::FileAccept,
            MessageBody::FileDecline { .. } => MessageType::FileDecline,
            MessageBody::FileChunk(_) => MessageType::FileChunk,
            MessageBody::FileChunkAck { .. } => MessageType::FileChunkAck,
            MessageBody::FileChunkNack { .. } => MessageType::FileChunkNack,
            MessageBody::FileComplete { .. } => MessageType::FileComplete,
            MessageBody::FileCancel { .. } => MessageType::FileCancel,
            MessageBody::FilePause { .. } => MessageType::FilePause,
            MessageBody::FileResume { .. } => MessageType::FileResume,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxdpMessage {
    pub msg_type: MessageType,
    pub proto_version: u8,
    pub flags: u8,
    pub seq: u16,
    pub body: MessageBody,
}

impl AxdpMessage {
    pub fn ping(caps: CapabilityBlock, seq: u16) -> Self {
        Self {
            msg_type: MessageType::Ping,
            proto_version: PROTO_VERSION,
            flags: 0,
            seq,
            body: MessageBody::Capability(caps),
        }
    }

    pub fn pong(caps: CapabilityBlock, seq: u16) -> Self {
        Self {
            msg_type: MessageType::Pong,
            proto_version: PROTO_VERSION,
            flags: 0,
            seq,
            body: MessageBody::Capability(caps),
        }
    }

    pub fn chat(fragment: &[u8], end_of_message: bool, seq: u16) -> Self {
        Self {
            msg_type: MessageType::Chat,
            proto_version: PROTO_VERSION,
            flags: if end_of_message { FLAG_END_OF_MESSAGE } else { 0 },
            seq,
            body: MessageBody::Chat(fragment.to_vec()),
        }
    }

    pub fn is_end_of_message(&self) -> bool {
        self.flags & FLAG_END_OF_MESSAGE != 0
    }

    fn write_body(&self, w: &mut impl Write) -> Result<(), AxdpError> {
        match &self.body {
            MessageBody::Capability(cap) => {
                w.write_u8(cap.proto_min)?;
                w.write_u8(cap.proto_max)?;
                w.write_u32::<LittleEndian>(cap.features.bits())?;
            }
            MessageBody::Chat(text) => w.write_all(text)?,
            MessageBody::FileOffer(offer) => {
                w.write_u64::<LittleEndian>(offer.transfer_id)?;
                write_lp_string(w, &offer.file_name)?;
                w.write_u64::<LittleEndian>(offer.file_size)?;
                w.write_u64::<LittleEndian>(offer.transmission_size)?;
                w.write_u32::<LittleEndian>(offer.chunk_size)?;
                w.write_u32::<LittleEndian>(offer.total_chunks)?;
                w.write_all(&offer.hash)?;
                w.write_u8(
                    offer
                        .compression_algo
                        .map(CompressionAlgo::to_byte)
                        .unwrap_or(0xFF),
                )?;
            }
            MessageBody::FileAccept { transfer_id }
            | MessageBody::FileCancel { transfer_id }
            | MessageBody::FilePause { transfer_id }
            | MessageBody::FileResume { transfer_id } => {
                w.write_u64::<LittleEndian>(*transfer_id)?;
            }
            MessageBody::FileDecline { transfer_id, reason } => {
                w.write_u64::<LittleEndian>(*transfer_id)?;
                write_lp_string(w, reason)?;
            }
            MessageBody::FileChunk(chunk) => {
                w.write_u64::<LittleEndian>(chunk.transfer_id)?;
                w.write_u32::<LittleEndian>(chunk.index)?;
                write_lp_bytes(w, &chunk.payload)?;
            }
            MessageBody::FileChunkAck {
                transfer_id,
                next_expected_index,
            } => {
                w.write_u64::<LittleEndian>(*transfer_id)?;
                w.write_u32::<LittleEndian>(*next_expected_index)?;
            }
            MessageBody::FileChunkNack {
                transfer_id,
                missing_index,
            } => {
                w.write_u64::<LittleEndian>(*transfer_id)?;
                w.write_u32::<LittleEndian>(*missing_index)?;
            }
            MessageBody::FileComplete {
                transfer_id,
                remote_metrics,
            } => {
                w.write_u64::<LittleEndian>(*transfer_id)?;
                w.write_u32::<LittleEndian>(remote_metrics.receive_duration_ms)?;
                w.write_u32::<LittleEndian>(remote_metrics.processing_duration_ms)?;
            }
        }
        Ok(())
    }

    /// Encodes the full PDU: magic, header, body.
    pub fn encode(&self) -> Result<Vec<u8>, AxdpError> {
        let mut body_buf = Vec::new();
        self.write_body(&mut body_buf)?;

        let mut out = Vec::with_capacity(10 + body_buf.len());
        out.extend_from_slice(&MAGIC);
        let msg_type = if matches!(self.body, MessageBody::Capability(_)) {
            self.msg_type // Ping or Pong, disambiguated by caller
        } else {
            self.body.message_type()
        };
        out.write_u8(msg_type as u8)?;
        out.write_u8(self.proto_version)?;
        out.write_u8(self.flags)?;
        out.write_u16::<BigEndian>(self.seq)?;
        out.write_u16::<BigEndian>(body_buf.len() as u16)?;
        out.extend_from_slice(&body_buf);
        Ok(out)
    }

    /// Attempts to decode one PDU from the front of `bytes`. Returns
    /// `Ok(None)` if the buffer doesn't yet hold a full PDU (more bytes are
    /// expected in a subsequent frame); the caller must not advance its
    /// cursor in that case.
    pub fn decode(bytes: &[u8]) -> Result<Option<(Self, usize)>, AxdpError> {
        const HEADER_LEN: usize = 4 + 1 + 1 + 1 + 2 + 2;
        if bytes.len() < HEADER_LEN {
            return Ok(None);
        }
        if bytes[0..4] != MAGIC {
            return Err(AxdpError::BadMagic);
        }
        let mut cursor = Cursor::new(&bytes[4..]);
        let msg_type_byte = cursor.read_u8()?;
        let msg_type = MessageType::from_byte(msg_type_byte)?;
        let proto_version = cursor.read_u8()?;
        let flags = cursor.read_u8()?;
        let seq = cursor.read_u16::<BigEndian>()?;
        let body_len = cursor.read_u16::<BigEndian>()? as usize;
        let total_len = HEADER_LEN + body_len;
        if bytes.len() < total_len {
            return Ok(None);
        }
        let body_bytes = &bytes[HEADER_LEN..total_len];
        let body = Self::read_body(msg_type, body_bytes)?;
        Ok(Some((
            AxdpMessage {
                msg_type,
                proto_version,
                flags,
                seq,
                body,
            },
            total_len,
        )))
    }

    fn read_body(msg_type: MessageType, bytes: &[u8]) -> Result<MessageBody, AxdpError> {
        let mut r = Cursor::new(bytes);
        Ok(match msg_type {
            MessageType::Ping | MessageType::Pong => {
                let proto_min = r.read_u8()?;
                let proto_max = r.read_u8()?;
                let features = Features::from_bits_truncate(r.read_u32::<LittleEndian>()?);
                MessageBody::Capability(CapabilityBlock {
                    proto_min,
                    proto_max,
                    features,
                })
            }
            MessageType::Chat => MessageBody::Chat(bytes.to_vec()),
            MessageType::FileOffer => {
                let transfer_id = r.read_u64::<LittleEndian>()?;
                let file_name = read_lp_string(&mut r)?;
                let file_size = r.read_u64::<LittleEndian>()?;
                let transmission_size = r.read_u64::<LittleEndian>()?;
                let chunk_size = r.read_u32::<LittleEndian>()?;
                let total_chunks = r.read_u32::<LittleEndian>()?;
                let mut hash = [0u8; 32];
                r.read_exact(&mut hash)?;
                let algo_byte = r.read_u8()?;
                let compression_algo = if algo_byte == 0xFF {
                    None
                } else {
                    Some(CompressionAlgo::from_byte(algo_byte)?)
                };
                MessageBody::FileOffer(FileOffer {
                    transfer_id,
                    file_name,
                    file_size,
                    transmission_size,
                    chunk_size,
                    total_chunks,
                    hash,
                    compression_algo,
                })
            }
            MessageType::FileAccept => MessageBody::FileAccept {
                transfer_id: r.read_u64::<LittleEndian>()?,
            },
            MessageType::FileDecline => {
                let transfer_id = r.read_u64::<LittleEndian>()?;
                let reason = read_lp_string(&mut r)?;
                MessageBody::FileDecline { transfer_id, reason }
            }
            MessageType::FileChunk => {
                let transfer_id = r.read_u64::<LittleEndian>()?;
                let index = r.read_u32::<LittleEndian>()?;
                let payload = read_lp_bytes(&mut r)?;
                MessageBody::FileChunk(FileChunk {
                    transfer_id,
                    index,
                    payload,
                })
            }
            MessageType::FileChunkAck => MessageBody::FileChunkAck {
                transfer_id: r.read_u64::<LittleEndian>()?,
                next_expected_index: r.read_u32::<LittleEndian>()?,
            },
            MessageType::FileChunkNack => MessageBody::FileChunkNack {
                transfer_id: r.read_u64::<LittleEndian>()?,
                missing_index: r.read_u32::<LittleEndian>()?,
            },
            MessageType::FileComplete => {
                let transfer_id = r.read_u64::<LittleEndian>()?;
                let receive_duration_ms = r.read_u32::<LittleEndian>()?;
                let processing_duration_ms = r.read_u32::<LittleEndian>()?;
                MessageBody::FileComplete {
                    transfer_id,
                    remote_metrics: RemoteTransferMetrics {
                        receive_duration_ms,
                        processing_duration_ms,
                    },
                }
            }
            MessageType::FileCancel => MessageBody::FileCancel {
                transfer_id: r.read_u64::<LittleEndian>()?,
            },
            MessageType::FilePause => MessageBody::FilePause {
                transfer_id: r.read_u64::<LittleEndian>()?,
            },
            MessageType::FileResume => MessageBody::FileResume {
                transfer_id: r.read_u64::<LittleEndian>()?,
            },
        })
    }
}

fn write_lp_string(w: &mut impl Write, s: &str) -> Result<(), AxdpError> {
    write_lp_bytes(w, s.as_bytes())
}

fn write_lp_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<(), AxdpError> {
    w.write_u16::<LittleEndian>(bytes.len() as u16)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_lp_string(r: &mut Cursor<&[u8]>) -> Result<String, AxdpError> {
    let bytes = read_lp_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| AxdpError::Malformed(e.to_string()))
}

fn read_lp_bytes(r: &mut Cursor<&[u8]>) -> Result<Vec<u8>, AxdpError> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> CapabilityBlock {
        CapabilityBlock {
            proto_min: 1,
            proto_max: 1,
            features: Features::COMPRESSION_LZ4 | Features::RESUME | Features::AT_MOST_ONCE,
        }
    }

    #[test]
    fn ping_round_trip() {
        let msg = AxdpMessage::ping(caps(), 42);
        let encoded = msg.encode().unwrap();
        let (decoded, consumed) = AxdpMessage::decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn partial_buffer_yields_none_not_error() {
        let msg = AxdpMessage::chat(b"hello world", true, 1);
        let encoded = msg.encode().unwrap();
        let partial = &encoded[..encoded.len() - 3];
        assert_eq!(AxdpMessage::decode(partial).unwrap(), None);
    }

    #[test]
    fn trailing_bytes_are_not_consumed() {
        let msg = AxdpMessage::chat(b"abc", false, 1);
        let mut encoded = msg.encode().unwrap();
        encoded.extend_from_slice(b"next pdu starts here");
        let (decoded, consumed) = AxdpMessage::decode(&encoded).unwrap().unwrap();
        assert!(!decoded.is_end_of_message());
        assert!(consumed < encoded.len());
    }

    #[test]
    fn file_offer_round_trip() {
        let offer = FileOffer {
            transfer_id: 7,
            file_name: "photo.jpg".into(),
            file_size: 65536,
            transmission_size: 40000,
            chunk_size: 200,
            total_chunks: 200,
            hash: [9u8; 32],
            compression_algo: Some(CompressionAlgo::Lz4),
        };
        let msg = AxdpMessage {
            msg_type: MessageType::FileOffer,
            proto_version: PROTO_VERSION,
            flags: 0,
            seq: 5,
            body: MessageBody::FileOffer(offer.clone()),
        };
        let encoded = msg.encode().unwrap();
        let (decoded, _) = AxdpMessage::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.body, MessageBody::FileOffer(offer));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = vec![0u8; 20];
        bytes[0..4].copy_from_slice(b"NOPE");
        assert_eq!(AxdpMessage::decode(&bytes), Err(AxdpError::BadMagic));
    }
}
