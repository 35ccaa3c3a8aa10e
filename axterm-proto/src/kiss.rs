//! KISS host-to-TNC framing: byte-stuffed encode/decode, transport-agnostic.

use crate::error::DecodeError;

pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

/// KISS command opcodes (low nibble of the command byte).
pub const OPCODE_DATA: u8 = 0x00;
pub const OPCODE_TX_DELAY: u8 = 0x01;
pub const OPCODE_PERSISTENCE: u8 = 0x02;
pub const OPCODE_SLOT_TIME: u8 = 0x03;
pub const OPCODE_TX_TAIL: u8 = 0x04;
pub const OPCODE_FULL_DUPLEX: u8 = 0x05;
pub const OPCODE_SET_HARDWARE: u8 = 0x06;
pub const OPCODE_RETURN: u8 = 0x0F;

/// A single KISS command/payload pair as emitted by the wire parser,
/// before it is classified into [`KissFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKissFrame {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl RawKissFrame {
    pub fn port(&self) -> u8 {
        (self.command >> 4) & 0x0F
    }

    pub fn opcode(&self) -> u8 {
        self.command & 0x0F
    }
}

/// Classification of a decoded KISS frame, per spec: the port-0 data command
/// yields AX.25, set-hardware yields Mobilinkd vendor telemetry, anything
/// else is passed through unclassified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KissFrame {
    Ax25(Vec<u8>),
    MobilinkdTelemetry(Vec<u8>),
    Unknown { command: u8, payload: Vec<u8> },
}

impl From<RawKissFrame> for KissFrame {
    fn from(raw: RawKissFrame) -> Self {
        if raw.command == OPCODE_DATA {
            KissFrame::Ax25(raw.payload)
        } else if raw.opcode() == OPCODE_SET_HARDWARE {
            KissFrame::MobilinkdTelemetry(raw.payload)
        } else {
            KissFrame::Unknown {
                command: raw.command,
                payload: raw.payload,
            }
        }
    }
}

/// Encodes a KISS data frame for `port` carrying `payload` (typically a raw
/// AX.25 frame). Escapes inner `FEND`/`FESC` bytes and delimits with `FEND`.
pub fn encode_data(port: u8, payload: &[u8]) -> Vec<u8> {
    encode_command((port << 4) | OPCODE_DATA, payload)
}

/// Encodes an arbitrary KISS command frame (control or vendor opcode).
pub fn encode_command(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(FEND);
    out.push(command);
    for &byte in payload {
        match byte {
            FEND => {
                out.push(FESC);
                out.push(TFEND);
            }
            FESC => {
                out.push(FESC);
                out.push(TFESC);
            }
            other => out.push(other),
        }
    }
    out.push(FEND);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Idle,
    InFrame,
    InFrameEscaped,
}

/// Streaming byte-stuffing parser. Feed it chunks as they arrive from a
/// transport; it never blocks and never discards previously completed
/// frames on a malformed escape in a later one.
#[derive(Debug, Default)]
pub struct KissParser {
    state_: ParserStateHolder,
    accumulator: Vec<u8>,
}

#[derive(Debug)]
struct ParserStateHolder(ParserState);

impl Default for ParserStateHolder {
    fn default() -> Self {
        ParserStateHolder(ParserState::Idle)
    }
}

impl KissParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, returning every frame completed by it plus
    /// any decode errors encountered along the way (errors reset the
    /// in-progress accumulator but never drop frames already emitted).
    pub fn feed(&mut self, bytes: &[u8]) -> (Vec<RawKissFrame>, Vec<DecodeError>) {
        let mut frames = Vec::new();
        let mut errors = Vec::new();
        for &byte in bytes {
            match self.state_.0 {
                ParserState::Idle => {
                    if byte == FEND {
                        self.state_.0 = ParserState::InFrame;
                    }
                    // Any other byte outside a frame is noise; ignore.
                }
                ParserState::InFrame => match byte {
                    FEND => {
                        if !self.accumulator.is_empty() {
                            if let Some(frame) = self.take_frame() {
                                frames.push(frame);
                            }
                        }
                        // Consecutive FENDs: empty frame, silently dropped.
                        // state remains InFrame to accept the next frame's bytes.
                    }
                    FESC => self.state_.0 = ParserState::InFrameEscaped,
                    other => self.accumulator.push(other),
                },
                ParserState::InFrameEscaped => {
                    match byte {
                        TFEND => self.accumulator.push(FEND),
                        TFESC => self.accumulator.push(FESC),
                        other => {
                            errors.push(DecodeError::KissBadEscape(other));
                            self.accumulator.clear();
                            self.state_.0 = ParserState::Idle;
                            continue;
                        }
                    }
                    self.state_.0 = ParserState::InFrame;
                }
            }
        }
        (frames, errors)
    }

    fn take_frame(&mut self) -> Option<RawKissFrame> {
        if self.accumulator.is_empty() {
            return None;
        }
        let mut bytes = std::mem::take(&mut self.accumulator);
        let command = bytes.remove(0);
        Some(RawKissFrame {
            command,
            payload: bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_frame() {
        let payload = b"hello\xc0world\xdb!";
        let encoded = encode_data(0, payload);
        let mut parser = KissParser::new();
        let (frames, errors) = parser.feed(&encoded);
        assert!(errors.is_empty());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x00);
        assert_eq!(frames[0].payload, payload);
    }

    #[test]
    fn consecutive_fends_yield_no_frames() {
        let mut parser = KissParser::new();
        let (frames, errors) = parser.feed(&[FEND, FEND, FEND, FEND]);
        assert!(frames.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn bad_escape_resets_without_losing_prior_frames() {
        let mut parser = KissParser::new();
        let good = encode_data(0, b"abc");
        let mut stream = good.clone();
        stream.push(FEND);
        stream.push(0x00);
        stream.push(FESC);
        stream.push(0x55); // invalid escape target
        stream.push(FEND);

        let (frames, errors) = parser.feed(&stream);
        assert_eq!(frames.len(), 1, "the first well-formed frame must survive");
        assert_eq!(frames[0].payload, b"abc");
        assert_eq!(errors, vec![DecodeError::KissBadEscape(0x55)]);
    }

    #[test]
    fn classifies_set_hardware_as_telemetry() {
        let raw = RawKissFrame {
            command: 0x06,
            payload: vec![1, 2, 3],
        };
        assert_eq!(
            KissFrame::from(raw),
            KissFrame::MobilinkdTelemetry(vec![1, 2, 3])
        );
    }

    #[test]
    fn byte_by_byte_feed_matches_bulk_feed() {
        let encoded = encode_data(1, b"byte at a time");
        let mut parser = KissParser::new();
        let mut frames = Vec::new();
        for b in &encoded {
            let (f, errors) = parser.feed(std::slice::from_ref(b));
            assert!(errors.is_empty());
            frames.extend(f);
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x10);
        assert_eq!(frames[0].payload, b"byte at a time");
    }
}
