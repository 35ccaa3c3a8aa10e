use axterm_link::LinkSettings;
use axterm_proto::axdp::CompressionAlgo;
use axterm_session::TimerKind;

/// The engine's external control surface. Every public operation an
/// observer (GUI, CLI harness) can ask the engine to perform arrives as one
/// of these, queued on the engine's mailbox.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    ConnectUsingSettings(LinkSettings),
    ConnectTcp { host: String, port: u16 },
    ConnectSerial { path: String, baud: u32 },
    ConnectBle { id: String, name: String },
    Disconnect,

    /// While suspended, transport-setting changes are captured but not
    /// acted on; clearing it reconnects only if the captured settings
    /// differ from what's currently connected.
    SetConnectionLogicSuspended(bool),
    UpdateTransportSettings(LinkSettings),

    /// Sends unconnected (UI) text to `to` via the given digipeater path.
    SendOutbound { to: String, via: Vec<String>, text: String },

    MobilinkdPollInputLevel,
    MobilinkdAdjustInputLevels,
    MobilinkdSetInputGain(u8),
    MobilinkdReset,

    /// Opens a connected-mode AX.25 session to `peer` (a display-form
    /// callsign like `N0CALL-1`); wires it to the peer's AXDP layer once
    /// the handshake completes.
    ConnectSession { peer: String },
    DisconnectSession { peer: String },
    /// Sends raw bytes over an already-connected session's I-frame stream.
    SendSessionInfo { peer: String, data: Vec<u8> },
    /// Fragments `text` into CHAT PDUs and sends them over the peer's
    /// connected session.
    SendChat { peer: String, text: String },

    /// Internal: posted back to the engine's own mailbox when a scheduled
    /// session timer (T1/T2/T3) elapses. `generation` must match the
    /// peer's current generation for that timer kind or the fire is stale
    /// and ignored.
    SessionTimerFired { peer: String, kind: TimerKind, generation: u64 },

    SendFile {
        peer: String,
        file_name: String,
        data: Vec<u8>,
        compression_override: Option<CompressionAlgo>,
    },
    AcceptIncoming { peer: String, transfer_id: u64 },
    DeclineIncoming { peer: String, transfer_id: u64, reason: String },
    PauseTransfer { peer: String, transfer_id: u64 },
    ResumeTransfer { peer: String, transfer_id: u64 },
    CancelTransfer { peer: String, transfer_id: u64 },

    Shutdown,
}
