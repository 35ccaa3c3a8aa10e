//! Wire-level codecs for AXTerm: KISS host-to-TNC framing, the AX.25
//! link-layer address/frame codec, and the AXDP application PDU format.
//!
//! This crate performs no I/O; it only encodes and decodes bytes. See
//! `axterm-link` for transports, `axterm-session` for the connected-mode
//! state machine, and `axterm-axdp` for the session layer built on top of
//! these PDUs.

pub mod ax25;
pub mod axdp;
pub mod error;
pub mod kiss;

pub use error::DecodeError;
