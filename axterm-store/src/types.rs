/// Row shape for the `packets` table. Deliberately decoupled from whatever
/// runtime packet type the engine uses internally — this crate only knows
/// about the fields it persists.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPacket {
    pub id: Option<i64>,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub via: Vec<String>,
    pub frame_type: String,
    pub control: i64,
    pub pid: Option<i64>,
    pub info: Vec<u8>,
    pub raw: Vec<u8>,
    pub endpoint: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedPackets {
    pub packets: Vec<StoredPacket>,
    pub pinned_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEntry {
    pub id: Option<i64>,
    pub created_at: i64,
    pub level: String,
    pub category: String,
    pub message: String,
    pub packet_id: Option<i64>,
    pub metadata_json: Option<String>,
    pub byte_count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub id: Option<i64>,
    pub created_at: i64,
    pub source: String,
    pub direction: String,
    pub kind: String,
    pub raw_hex: String,
    pub byte_count: i64,
    pub packet_id: Option<i64>,
    pub metadata_json: Option<String>,
}

/// Half-open `[start, end)` window over packet timestamps, in the same
/// unit as `StoredPacket::timestamp` (unix-epoch milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticsOptions {
    pub count_unique_stations: bool,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            count_unique_stations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalyticsBucket {
    pub bucket_start: i64,
    pub packet_count: i64,
    pub unique_stations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalyticsReport {
    pub buckets: Vec<AnalyticsBucket>,
}
