use thiserror::Error;

/// Errors raised while decoding bytes at any layer of the wire stack.
///
/// Decode errors never propagate out of a streaming parser (KISS or AX.25);
/// callers record them and keep consuming the stream. See `axterm-proto`'s
/// module docs for where each variant is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("KISS escape sequence malformed: byte 0x{0:02x} followed FESC")]
    KissBadEscape(u8),
    #[error("AX.25 frame too short ({0} bytes)")]
    Ax25TooShort(usize),
    #[error("AX.25 address block malformed ({0} bytes consumed)")]
    Ax25BadAddress(usize),
    #[error("AX.25 control byte ambiguous outside session context ({0} bytes)")]
    Ax25ControlAmbiguous(usize),
}

impl DecodeError {
    /// Number of raw bytes that were being decoded when the error occurred,
    /// per spec: "fail with `DecodeError` carrying original byte count".
    pub fn byte_count(&self) -> usize {
        match self {
            DecodeError::KissBadEscape(_) => 0,
            DecodeError::Ax25TooShort(n)
            | DecodeError::Ax25BadAddress(n)
            | DecodeError::Ax25ControlAmbiguous(n) => *n,
        }
    }
}
