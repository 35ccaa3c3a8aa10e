//! Retention-bounded SQLite persistence. All reads and writes are
//! serialized onto a single worker thread owning the one `Connection`;
//! callers get back futures that resolve on the engine's own executor.

mod command;
pub mod error;
mod schema;
pub mod types;
mod worker;

use command::Command;
use error::{PersistenceError, Result};
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use tokio::sync::oneshot;
use types::{
    AnalyticsOptions, AnalyticsReport, ConsoleEntry, LoadedPackets, RawChunk, StoredPacket,
    Timeframe,
};

pub use axterm_netrom::NetromSnapshot;

pub struct Store {
    cmd_tx: std_mpsc::Sender<Command>,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = worker::open(path.as_ref())?;
        Ok(Self::spawn(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = worker::open_in_memory()?;
        Ok(Self::spawn(conn))
    }

    fn spawn(conn: rusqlite::Connection) -> Self {
        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        tokio::task::spawn_blocking(move || worker::run(conn, cmd_rx));
        Self { cmd_tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<std::result::Result<T, PersistenceError>>) -> Command,
    ) -> Result<T> {
        let (reply, receiver) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .map_err(|_| PersistenceError::WorkerGone)?;
        receiver.await.map_err(|_| PersistenceError::WorkerGone)?
    }

    pub async fn save_packet(&self, packet: StoredPacket, retention: Option<u32>) -> Result<i64> {
        self.call(|reply| Command::SavePacket {
            packet,
            retention,
            reply,
        })
        .await
    }

    pub async fn append_console(
        &self,
        entry: ConsoleEntry,
        retention: Option<u32>,
    ) -> Result<i64> {
        self.call(|reply| Command::AppendConsole {
            entry,
            retention,
            reply,
        })
        .await
    }

    pub async fn append_raw(&self, chunk: RawChunk, retention: Option<u32>) -> Result<i64> {
        self.call(|reply| Command::AppendRaw {
            chunk,
            retention,
            reply,
        })
        .await
    }

    pub async fn set_pinned(&self, id: i64, pinned: bool) -> Result<()> {
        self.call(|reply| Command::SetPinned { id, pinned, reply })
            .await
    }

    pub async fn load_packets(&self, limit: u32) -> Result<LoadedPackets> {
        self.call(|reply| Command::LoadPackets { limit, reply }).await
    }

    pub async fn load_console(&self, limit: u32) -> Result<Vec<ConsoleEntry>> {
        self.call(|reply| Command::LoadConsole { limit, reply }).await
    }

    pub async fn load_raw(&self, limit: u32) -> Result<Vec<RawChunk>> {
        self.call(|reply| Command::LoadRaw { limit, reply }).await
    }

    pub async fn prune_packets(&self, retention: u32) -> Result<()> {
        self.call(|reply| Command::PrunePackets { retention, reply })
            .await
    }

    pub async fn prune_console(&self, retention: u32) -> Result<()> {
        self.call(|reply| Command::PruneConsole { retention, reply })
            .await
    }

    pub async fn prune_raw(&self, retention: u32) -> Result<()> {
        self.call(|reply| Command::PruneRaw { retention, reply })
            .await
    }

    pub async fn delete_all_console(&self) -> Result<()> {
        self.call(|reply| Command::DeleteAllConsole { reply }).await
    }

    pub async fn delete_all_raw(&self) -> Result<()> {
        self.call(|reply| Command::DeleteAllRaw { reply }).await
    }

    pub async fn save_netrom_snapshot(&self, snapshot: NetromSnapshot) -> Result<()> {
        self.call(|reply| Command::SaveNetromSnapshot { snapshot, reply })
            .await
    }

    pub async fn load_netrom_snapshot(&self) -> Result<Option<NetromSnapshot>> {
        self.call(|reply| Command::LoadNetromSnapshot { reply }).await
    }

    pub async fn prune_netrom(&self, retention_days: u32, now: i64) -> Result<()> {
        self.call(|reply| Command::PruneNetrom {
            retention_days,
            now,
            reply,
        })
        .await
    }

    pub async fn aggregate_analytics(
        &self,
        timeframe: Timeframe,
        bucket_secs: i64,
        options: AnalyticsOptions,
    ) -> Result<AnalyticsReport> {
        self.call(|reply| Command::AggregateAnalytics {
            timeframe,
            bucket_secs,
            options,
            reply,
        })
        .await
    }

    /// Signals the worker to stop after draining any commands already
    /// queued ahead of this one. Dropping the `Store` has the same effect
    /// since the worker loop exits once every sender is gone.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(timestamp: i64, pinned: bool) -> StoredPacket {
        StoredPacket {
            id: None,
            timestamp,
            from: "N0CALL".into(),
            to: "APRS".into(),
            via: vec!["WIDE1-1".into()],
            frame_type: "UI".into(),
            control: 0x03,
            pid: Some(0xF0),
            info: b"hello".to_vec(),
            raw: b"\x00raw".to_vec(),
            endpoint: "tcp".into(),
            pinned,
        }
    }

    #[tokio::test]
    async fn save_and_load_packet_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.save_packet(packet(1000, false), None).await.unwrap();
        let loaded = store.load_packets(10).await.unwrap();
        assert_eq!(loaded.packets.len(), 1);
        assert_eq!(loaded.packets[0].from, "N0CALL");
        assert_eq!(loaded.packets[0].via, vec!["WIDE1-1".to_string()]);
        assert!(loaded.pinned_ids.is_empty());
    }

    #[tokio::test]
    async fn retention_prunes_oldest_unpinned_packets() {
        let store = Store::open_in_memory().unwrap();
        store.save_packet(packet(1, true), None).await.unwrap();
        for t in 2..=5 {
            store.save_packet(packet(t, false), Some(2)).await.unwrap();
        }
        let loaded = store.load_packets(10).await.unwrap();
        let timestamps: Vec<i64> = loaded.packets.iter().map(|p| p.timestamp).collect();
        assert_eq!(loaded.pinned_ids.len(), 1);
        assert!(timestamps.contains(&1));
        assert!(timestamps.contains(&5));
        assert!(timestamps.contains(&4));
        assert_eq!(timestamps.len(), 3);
    }

    #[tokio::test]
    async fn set_pinned_survives_prune() {
        let store = Store::open_in_memory().unwrap();
        let id = store.save_packet(packet(1, false), None).await.unwrap();
        store.set_pinned(id, true).await.unwrap();
        for t in 2..=10 {
            store.save_packet(packet(t, false), Some(3)).await.unwrap();
        }
        let loaded = store.load_packets(20).await.unwrap();
        assert!(loaded.packets.iter().any(|p| p.id == Some(id)));
    }

    #[tokio::test]
    async fn netrom_snapshot_round_trips() {
        use axterm_netrom::{LinkStat, Neighbor, NeighborSource, Route};

        let store = Store::open_in_memory().unwrap();
        let snapshot = NetromSnapshot {
            neighbors: vec![Neighbor {
                call: "K0EPI-7".into(),
                quality: 200,
                last_seen: 42,
                source: NeighborSource::DirectHeard,
            }],
            routes: vec![Route {
                destination: "N0CALL".into(),
                origin: "K0EPI-7".into(),
                quality: 180,
                hop_count: 1,
                last_updated: 42,
            }],
            link_stats: vec![LinkStat {
                from: "K0EPI-7".into(),
                to: "W0XYZ".into(),
                quality: 150,
                last_updated: 42,
                observed_count: 9,
                drop_count: 1,
            }],
            last_packet_id: 77,
            config_hash: 0xDEAD_BEEF,
            snapshot_timestamp: 100,
        };
        store
            .save_netrom_snapshot(snapshot.clone())
            .await
            .unwrap();
        let loaded = store.load_netrom_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn aggregate_analytics_buckets_packet_counts() {
        let store = Store::open_in_memory().unwrap();
        for (t, from) in [(0, "A"), (500, "A"), (1_500, "B"), (2_500, "A")] {
            let mut p = packet(t, false);
            p.from = from.into();
            store.save_packet(p, None).await.unwrap();
        }
        let report = store
            .aggregate_analytics(
                Timeframe {
                    start: 0,
                    end: 3_000,
                },
                1,
                AnalyticsOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.buckets.len(), 3);
        assert_eq!(report.buckets[0].packet_count, 2);
        assert_eq!(report.buckets[0].unique_stations, 1);
        assert_eq!(report.buckets[1].packet_count, 1);
    }
}
