use crate::packet::Packet;
use crate::station::StationInfo;
use crate::watch::WatchHit;
use axterm_link::LinkState;
use axterm_netrom::NetromSnapshot;
use axterm_session::SessionState;

/// Everything the engine broadcasts to observers. One `Packet` arrives per
/// intake; everything else is emitted on the transition that produced it.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PacketReceived(Packet),
    StationsUpdated(Vec<StationInfo>),
    NetromSnapshotReady(NetromSnapshot),
    LinkStateChanged(LinkState),
    WatchHit(WatchHit),

    /// A per-peer connected-mode AX.25 session changed state.
    SessionStateChanged { peer: String, state: SessionState },

    ChatReceived { peer: String, text: String },
    FileOffered { peer: String, transfer_id: u64, file_name: String, file_size: u64 },
    FileAccepted { peer: String, transfer_id: u64 },
    FileDeclined { peer: String, transfer_id: u64, reason: String },
    FileProgress { peer: String, transfer_id: u64, received: usize, total: u32 },
    FileCompleted { peer: String, transfer_id: u64, data: Vec<u8> },
    FileFailed { peer: String, transfer_id: u64, reason: String },
    FileCancelled { peer: String, transfer_id: u64 },

    /// A control-surface call failed outright (bad link setup, unknown
    /// session). Persistence failures are logged, not surfaced here.
    Error(String),
}
