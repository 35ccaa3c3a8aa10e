use crate::error::PersistenceError;
use crate::types::{
    AnalyticsOptions, AnalyticsReport, ConsoleEntry, LoadedPackets, RawChunk, StoredPacket,
    Timeframe,
};
use axterm_netrom::NetromSnapshot;
use tokio::sync::oneshot;

type Reply<T> = oneshot::Sender<Result<T, PersistenceError>>;

/// One request to the persistence worker. Every variant carries its own
/// reply channel so the worker can stay a flat loop with no request/response
/// correlation bookkeeping.
pub enum Command {
    SavePacket {
        packet: StoredPacket,
        retention: Option<u32>,
        reply: Reply<i64>,
    },
    AppendConsole {
        entry: ConsoleEntry,
        retention: Option<u32>,
        reply: Reply<i64>,
    },
    AppendRaw {
        chunk: RawChunk,
        retention: Option<u32>,
        reply: Reply<i64>,
    },
    SetPinned {
        id: i64,
        pinned: bool,
        reply: Reply<()>,
    },
    LoadPackets {
        limit: u32,
        reply: Reply<LoadedPackets>,
    },
    LoadConsole {
        limit: u32,
        reply: Reply<Vec<ConsoleEntry>>,
    },
    LoadRaw {
        limit: u32,
        reply: Reply<Vec<RawChunk>>,
    },
    PrunePackets {
        retention: u32,
        reply: Reply<()>,
    },
    PruneConsole {
        retention: u32,
        reply: Reply<()>,
    },
    PruneRaw {
        retention: u32,
        reply: Reply<()>,
    },
    DeleteAllConsole {
        reply: Reply<()>,
    },
    DeleteAllRaw {
        reply: Reply<()>,
    },
    SaveNetromSnapshot {
        snapshot: NetromSnapshot,
        reply: Reply<()>,
    },
    LoadNetromSnapshot {
        reply: Reply<Option<NetromSnapshot>>,
    },
    PruneNetrom {
        retention_days: u32,
        now: i64,
        reply: Reply<()>,
    },
    AggregateAnalytics {
        timeframe: Timeframe,
        bucket_secs: i64,
        options: AnalyticsOptions,
        reply: Reply<AnalyticsReport>,
    },
    Shutdown,
}
