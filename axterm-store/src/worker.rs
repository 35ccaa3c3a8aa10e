use crate::command::Command;
use crate::error::PersistenceError;
use crate::schema;
use crate::types::{
    AnalyticsBucket, AnalyticsOptions, AnalyticsReport, ConsoleEntry, LoadedPackets, RawChunk,
    StoredPacket, Timeframe,
};
use axterm_netrom::{LinkStat, Neighbor, NeighborSource, NetromSnapshot, Route};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::mpsc::Receiver;
use tracing::warn;

/// SQLite has no native unsigned integer column; this round-trips a `u64`
/// through `i64` while preserving ordering, the same trick the teacher's
/// sqlite layer uses for its sequence numbers.
fn u64_to_sql(v: u64) -> i64 {
    (v as i64) ^ i64::MIN
}

fn sql_to_u64(v: i64) -> u64 {
    (v ^ i64::MIN) as u64
}

fn source_to_str(source: NeighborSource) -> &'static str {
    match source {
        NeighborSource::DirectHeard => "direct_heard",
        NeighborSource::InferredVia => "inferred_via",
        NeighborSource::RoutingBroadcast => "routing_broadcast",
    }
}

fn source_from_str(s: &str) -> NeighborSource {
    match s {
        "inferred_via" => NeighborSource::InferredVia,
        "routing_broadcast" => NeighborSource::RoutingBroadcast,
        _ => NeighborSource::DirectHeard,
    }
}

pub fn open(path: &Path) -> Result<Connection, PersistenceError> {
    let conn =
        Connection::open(path).map_err(|e| PersistenceError::OpenFailed(e.to_string()))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| PersistenceError::OpenFailed(e.to_string()))?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, PersistenceError> {
    let conn = Connection::open_in_memory()
        .map_err(|e| PersistenceError::OpenFailed(e.to_string()))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| PersistenceError::OpenFailed(e.to_string()))?;
    Ok(conn)
}

/// Blocking loop owning the single `Connection`. All persistence calls are
/// serialized here; there is never more than one query in flight.
pub fn run(conn: Connection, commands: Receiver<Command>) {
    while let Ok(cmd) = commands.recv() {
        match cmd {
            Command::SavePacket {
                packet,
                retention,
                reply,
            } => {
                let result = save_packet(&conn, &packet, retention);
                let _ = reply.send(result);
            }
            Command::AppendConsole {
                entry,
                retention,
                reply,
            } => {
                let result = append_console(&conn, &entry, retention);
                let _ = reply.send(result);
            }
            Command::AppendRaw {
                chunk,
                retention,
                reply,
            } => {
                let result = append_raw(&conn, &chunk, retention);
                let _ = reply.send(result);
            }
            Command::SetPinned { id, pinned, reply } => {
                let result = set_pinned(&conn, id, pinned);
                let _ = reply.send(result);
            }
            Command::LoadPackets { limit, reply } => {
                let result = load_packets(&conn, limit);
                let _ = reply.send(result);
            }
            Command::LoadConsole { limit, reply } => {
                let result = load_console(&conn, limit);
                let _ = reply.send(result);
            }
            Command::LoadRaw { limit, reply } => {
                let result = load_raw(&conn, limit);
                let _ = reply.send(result);
            }
            Command::PrunePackets { retention, reply } => {
                let result = prune_table_by_count(&conn, "packets", "timestamp", retention, true);
                let _ = reply.send(result);
            }
            Command::PruneConsole { retention, reply } => {
                let result =
                    prune_table_by_count(&conn, "console", "created_at", retention, false);
                let _ = reply.send(result);
            }
            Command::PruneRaw { retention, reply } => {
                let result = prune_table_by_count(&conn, "raw", "created_at", retention, false);
                let _ = reply.send(result);
            }
            Command::DeleteAllConsole { reply } => {
                let result = conn
                    .execute("DELETE FROM console", [])
                    .map(|_| ())
                    .map_err(|e| PersistenceError::WriteFailed(e.to_string()));
                let _ = reply.send(result);
            }
            Command::DeleteAllRaw { reply } => {
                let result = conn
                    .execute("DELETE FROM raw", [])
                    .map(|_| ())
                    .map_err(|e| PersistenceError::WriteFailed(e.to_string()));
                let _ = reply.send(result);
            }
            Command::SaveNetromSnapshot { snapshot, reply } => {
                let result = save_netrom_snapshot(&conn, &snapshot);
                let _ = reply.send(result);
            }
            Command::LoadNetromSnapshot { reply } => {
                let result = load_netrom_snapshot(&conn);
                let _ = reply.send(result);
            }
            Command::PruneNetrom {
                retention_days,
                now,
                reply,
            } => {
                let result = prune_netrom(&conn, retention_days, now);
                let _ = reply.send(result);
            }
            Command::AggregateAnalytics {
                timeframe,
                bucket_secs,
                options,
                reply,
            } => {
                let result = aggregate_analytics(&conn, timeframe, bucket_secs, options);
                let _ = reply.send(result);
            }
            Command::Shutdown => {
                break;
            }
        }
    }
    warn!("persistence worker shutting down");
}

fn save_packet(
    conn: &Connection,
    packet: &StoredPacket,
    retention: Option<u32>,
) -> Result<i64, PersistenceError> {
    let via_json = serde_json::to_string(&packet.via)
        .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    conn.prepare_cached(
        "INSERT INTO packets
            (timestamp, \"from\", \"to\", via_json, frame_type, control, pid, info_blob, raw_blob, endpoint, pinned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            packet.timestamp,
            packet.from,
            packet.to,
            via_json,
            packet.frame_type,
            packet.control,
            packet.pid,
            packet.info,
            packet.raw,
            packet.endpoint,
            packet.pinned as i64,
        ])
    })
    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    let id = conn.last_insert_rowid();
    if let Some(retention) = retention {
        prune_table_by_count(conn, "packets", "timestamp", retention, true)?;
    }
    Ok(id)
}

fn append_console(
    conn: &Connection,
    entry: &ConsoleEntry,
    retention: Option<u32>,
) -> Result<i64, PersistenceError> {
    conn.prepare_cached(
        "INSERT INTO console
            (created_at, level, category, message, packet_id, metadata_json, byte_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            entry.created_at,
            entry.level,
            entry.category,
            entry.message,
            entry.packet_id,
            entry.metadata_json,
            entry.byte_count,
        ])
    })
    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    let id = conn.last_insert_rowid();
    if let Some(retention) = retention {
        prune_table_by_count(conn, "console", "created_at", retention, false)?;
    }
    Ok(id)
}

fn append_raw(
    conn: &Connection,
    chunk: &RawChunk,
    retention: Option<u32>,
) -> Result<i64, PersistenceError> {
    conn.prepare_cached(
        "INSERT INTO raw
            (created_at, source, direction, kind, raw_hex, byte_count, packet_id, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .and_then(|mut stmt| {
        stmt.execute(params![
            chunk.created_at,
            chunk.source,
            chunk.direction,
            chunk.kind,
            chunk.raw_hex,
            chunk.byte_count,
            chunk.packet_id,
            chunk.metadata_json,
        ])
    })
    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    let id = conn.last_insert_rowid();
    if let Some(retention) = retention {
        prune_table_by_count(conn, "raw", "created_at", retention, false)?;
    }
    Ok(id)
}

fn set_pinned(conn: &Connection, id: i64, pinned: bool) -> Result<(), PersistenceError> {
    conn.prepare_cached("UPDATE packets SET pinned = ?1 WHERE id = ?2")
        .and_then(|mut stmt| stmt.execute(params![pinned as i64, id]))
        .map(|_| ())
        .map_err(|e| PersistenceError::WriteFailed(e.to_string()))
}

fn load_packets(conn: &Connection, limit: u32) -> Result<LoadedPackets, PersistenceError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, timestamp, \"from\", \"to\", via_json, frame_type, control, pid,
                    info_blob, raw_blob, endpoint, pinned
             FROM packets ORDER BY timestamp DESC LIMIT ?1",
        )
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let rows = stmt
        .query_map(params![limit], |row| {
            let via_json: String = row.get(4)?;
            Ok((
                StoredPacket {
                    id: Some(row.get(0)?),
                    timestamp: row.get(1)?,
                    from: row.get(2)?,
                    to: row.get(3)?,
                    via: serde_json::from_str(&via_json).unwrap_or_default(),
                    frame_type: row.get(5)?,
                    control: row.get(6)?,
                    pid: row.get(7)?,
                    info: row.get(8)?,
                    raw: row.get(9)?,
                    endpoint: row.get(10)?,
                    pinned: row.get::<_, i64>(11)? != 0,
                },
            ))
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

    let mut packets = Vec::new();
    for row in rows {
        let (packet,) = row.map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
        packets.push(packet);
    }
    packets.reverse();
    let pinned_ids = packets
        .iter()
        .filter(|p| p.pinned)
        .filter_map(|p| p.id)
        .collect();
    Ok(LoadedPackets {
        packets,
        pinned_ids,
    })
}

fn load_console(conn: &Connection, limit: u32) -> Result<Vec<ConsoleEntry>, PersistenceError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, created_at, level, category, message, packet_id, metadata_json, byte_count
             FROM console ORDER BY created_at DESC LIMIT ?1",
        )
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(ConsoleEntry {
                id: Some(row.get(0)?),
                created_at: row.get(1)?,
                level: row.get(2)?,
                category: row.get(3)?,
                message: row.get(4)?,
                packet_id: row.get(5)?,
                metadata_json: row.get(6)?,
                byte_count: row.get(7)?,
            })
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(|e| PersistenceError::QueryFailed(e.to_string()))?);
    }
    entries.reverse();
    Ok(entries)
}

fn load_raw(conn: &Connection, limit: u32) -> Result<Vec<RawChunk>, PersistenceError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, created_at, source, direction, kind, raw_hex, byte_count, packet_id, metadata_json
             FROM raw ORDER BY created_at DESC LIMIT ?1",
        )
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(RawChunk {
                id: Some(row.get(0)?),
                created_at: row.get(1)?,
                source: row.get(2)?,
                direction: row.get(3)?,
                kind: row.get(4)?,
                raw_hex: row.get(5)?,
                byte_count: row.get(6)?,
                packet_id: row.get(7)?,
                metadata_json: row.get(8)?,
            })
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let mut chunks = Vec::new();
    for row in rows {
        chunks.push(row.map_err(|e| PersistenceError::QueryFailed(e.to_string()))?);
    }
    chunks.reverse();
    Ok(chunks)
}

/// Keeps the newest `retention` rows by `order_column`, deleting the rest.
/// When `exclude_pinned` is set, pinned rows never count against the cap and
/// are never deleted by this pass.
fn prune_table_by_count(
    conn: &Connection,
    table: &str,
    order_column: &str,
    retention: u32,
    exclude_pinned: bool,
) -> Result<(), PersistenceError> {
    let pinned_clause = if exclude_pinned { "WHERE pinned = 0" } else { "" };
    let count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table} {pinned_clause}"),
            [],
            |row| row.get(0),
        )
        .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    let overflow = count - retention as i64;
    if overflow <= 0 {
        return Ok(());
    }
    let sql = format!(
        "DELETE FROM {table} WHERE id IN (
            SELECT id FROM {table} {pinned_clause} ORDER BY {order_column} ASC LIMIT ?1
        )"
    );
    conn.execute(&sql, params![overflow])
        .map(|_| ())
        .map_err(|e| PersistenceError::WriteFailed(e.to_string()))
}

fn save_netrom_snapshot(
    conn: &Connection,
    snapshot: &NetromSnapshot,
) -> Result<(), PersistenceError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;
    tx.execute("DELETE FROM neighbors", [])
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;
    tx.execute("DELETE FROM routes", [])
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;
    tx.execute("DELETE FROM link_stats", [])
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;

    for neighbor in &snapshot.neighbors {
        tx.execute(
            "INSERT INTO neighbors (call, quality, last_seen, source) VALUES (?1, ?2, ?3, ?4)",
            params![
                neighbor.call,
                neighbor.quality as i64,
                neighbor.last_seen,
                source_to_str(neighbor.source),
            ],
        )
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;
    }
    for route in &snapshot.routes {
        tx.execute(
            "INSERT INTO routes (destination, origin, quality, hop_count, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                route.destination,
                route.origin,
                route.quality as i64,
                route.hop_count as i64,
                route.last_updated,
            ],
        )
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;
    }
    for link in &snapshot.link_stats {
        tx.execute(
            "INSERT INTO link_stats (\"from\", \"to\", quality, last_updated, observed, dropped)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.from,
                link.to,
                link.quality as i64,
                link.last_updated,
                u64_to_sql(link.observed_count),
                u64_to_sql(link.drop_count),
            ],
        )
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;
    }
    tx.execute(
        "INSERT INTO snapshot_meta (id, last_packet_id, config_hash, snapshot_timestamp)
         VALUES (0, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            last_packet_id = excluded.last_packet_id,
            config_hash = excluded.config_hash,
            snapshot_timestamp = excluded.snapshot_timestamp",
        params![
            u64_to_sql(snapshot.last_packet_id),
            u64_to_sql(snapshot.config_hash),
            snapshot.snapshot_timestamp,
        ],
    )
    .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))?;

    tx.commit()
        .map_err(|e| PersistenceError::SnapshotFailed(e.to_string()))
}

fn load_netrom_snapshot(
    conn: &Connection,
) -> Result<Option<NetromSnapshot>, PersistenceError> {
    let meta: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT last_packet_id, config_hash, snapshot_timestamp FROM snapshot_meta WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let Some((last_packet_id, config_hash, snapshot_timestamp)) = meta else {
        return Ok(None);
    };

    let mut neighbor_stmt = conn
        .prepare_cached("SELECT call, quality, last_seen, source FROM neighbors")
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let neighbors = neighbor_stmt
        .query_map([], |row| {
            let quality: i64 = row.get(1)?;
            let source: String = row.get(3)?;
            Ok(Neighbor {
                call: row.get(0)?,
                quality: quality as u8,
                last_seen: row.get(2)?,
                source: source_from_str(&source),
            })
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

    let mut route_stmt = conn
        .prepare_cached("SELECT destination, origin, quality, hop_count, last_updated FROM routes")
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let routes = route_stmt
        .query_map([], |row| {
            let quality: i64 = row.get(2)?;
            let hop_count: i64 = row.get(3)?;
            Ok(Route {
                destination: row.get(0)?,
                origin: row.get(1)?,
                quality: quality as u8,
                hop_count: hop_count as u8,
                last_updated: row.get(4)?,
            })
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

    let mut link_stmt = conn
        .prepare_cached(
            "SELECT \"from\", \"to\", quality, last_updated, observed, dropped FROM link_stats",
        )
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let link_stats = link_stmt
        .query_map([], |row| {
            let quality: i64 = row.get(2)?;
            let observed: i64 = row.get(4)?;
            let dropped: i64 = row.get(5)?;
            Ok(LinkStat {
                from: row.get(0)?,
                to: row.get(1)?,
                quality: quality as u8,
                last_updated: row.get(3)?,
                observed_count: sql_to_u64(observed),
                drop_count: sql_to_u64(dropped),
            })
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;

    Ok(Some(NetromSnapshot {
        neighbors,
        routes,
        link_stats,
        last_packet_id: sql_to_u64(last_packet_id),
        config_hash: sql_to_u64(config_hash),
        snapshot_timestamp,
    }))
}

/// Drops neighbor/link-stat/route rows whose `last_updated`/`last_seen` is
/// older than `retention_days`. This mirrors the decay-and-purge pass the
/// in-memory tracker runs, so a store that is never loaded back into a
/// tracker still bounds its own growth.
fn prune_netrom(conn: &Connection, retention_days: u32, now: i64) -> Result<(), PersistenceError> {
    let cutoff = now - (retention_days as i64) * 86_400 * 1000;
    conn.execute(
        "DELETE FROM neighbors WHERE last_seen < ?1",
        params![cutoff],
    )
    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    conn.execute(
        "DELETE FROM link_stats WHERE last_updated < ?1",
        params![cutoff],
    )
    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    conn.execute(
        "DELETE FROM routes WHERE last_updated < ?1",
        params![cutoff],
    )
    .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
    Ok(())
}

fn aggregate_analytics(
    conn: &Connection,
    timeframe: Timeframe,
    bucket_secs: i64,
    options: AnalyticsOptions,
) -> Result<AnalyticsReport, PersistenceError> {
    let bucket_ms = bucket_secs.max(1) * 1000;
    let sql = if options.count_unique_stations {
        "SELECT (timestamp - ?1) / ?2 AS bucket_idx, COUNT(*), COUNT(DISTINCT \"from\")
         FROM packets WHERE timestamp >= ?1 AND timestamp < ?3
         GROUP BY bucket_idx ORDER BY bucket_idx"
    } else {
        "SELECT (timestamp - ?1) / ?2 AS bucket_idx, COUNT(*), 0
         FROM packets WHERE timestamp >= ?1 AND timestamp < ?3
         GROUP BY bucket_idx ORDER BY bucket_idx"
    };
    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let rows = stmt
        .query_map(params![timeframe.start, bucket_ms, timeframe.end], |row| {
            let bucket_idx: i64 = row.get(0)?;
            Ok(AnalyticsBucket {
                bucket_start: timeframe.start + bucket_idx * bucket_ms,
                packet_count: row.get(1)?,
                unique_stations: row.get(2)?,
            })
        })
        .map_err(|e| PersistenceError::QueryFailed(e.to_string()))?;
    let mut buckets = Vec::new();
    for row in rows {
        buckets.push(row.map_err(|e| PersistenceError::QueryFailed(e.to_string()))?);
    }
    Ok(AnalyticsReport { buckets })
}
