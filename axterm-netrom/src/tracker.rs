use crate::link_stat::LinkStat;
use crate::neighbor::{Neighbor, NeighborSource};
use crate::quality::{ewma_update, hop_decay, time_decay, DEFAULT_DECAY_HALF_LIFE_SECS, DEFAULT_EWMA_ALPHA, DEFAULT_HOP_DECAY_BASE, FULL_QUALITY};
use crate::route::Route;
use crate::Timestamp;
use std::collections::HashMap;
use tracing::debug;

/// One entry of a frame's via-path, as the engine observes it off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHop {
    pub call: String,
    pub repeated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetromMode {
    /// Credit only the immediate source (or first-repeated digipeater).
    DirectOnly,
    /// Also credit digipeaters further down the via-path, with decay.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetromConfig {
    pub mode: NetromMode,
    pub ewma_alpha: f64,
    pub hop_decay_base: f64,
    pub decay_half_life_secs: i64,
    /// Entries older than this are purged on snapshot/periodic tick.
    pub retention_days: i64,
    /// Separate, longer TTL used only by UI-facing staleness filtering.
    pub stale_ui_ttl_secs: i64,
    pub snapshot_interval_secs: i64,
    pub snapshot_packet_interval: u32,
}

impl Default for NetromConfig {
    fn default() -> Self {
        Self {
            mode: NetromMode::Hybrid,
            ewma_alpha: DEFAULT_EWMA_ALPHA,
            hop_decay_base: DEFAULT_HOP_DECAY_BASE,
            decay_half_life_secs: DEFAULT_DECAY_HALF_LIFE_SECS,
            retention_days: 30,
            stale_ui_ttl_secs: 3600,
            snapshot_interval_secs: 60,
            snapshot_packet_interval: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetromSnapshot {
    pub neighbors: Vec<Neighbor>,
    pub routes: Vec<Route>,
    pub link_stats: Vec<LinkStat>,
    pub last_packet_id: u64,
    pub config_hash: u64,
    pub snapshot_timestamp: Timestamp,
}

pub struct NetromTracker {
    config: NetromConfig,
    neighbors: HashMap<String, Neighbor>,
    routes: HashMap<String, Route>,
    link_stats: HashMap<(String, String), LinkStat>,
    packets_since_snapshot: u32,
    last_snapshot_at: Timestamp,
}

impl NetromTracker {
    pub fn new(config: NetromConfig) -> Self {
        Self {
            config,
            neighbors: HashMap::new(),
            routes: HashMap::new(),
            link_stats: HashMap::new(),
            packets_since_snapshot: 0,
            last_snapshot_at: 0,
        }
    }

    pub fn config(&self) -> &NetromConfig {
        &self.config
    }

    fn credit_neighbor(
        &mut self,
        call: &str,
        t: Timestamp,
        sample: u8,
        source: NeighborSource,
    ) -> u8 {
        let alpha = self.config.ewma_alpha;
        let entry = self
            .neighbors
            .entry(call.to_string())
            .or_insert_with(|| Neighbor {
                call: call.to_string(),
                quality: 0,
                last_seen: t,
                source,
            });
        entry.quality = ewma_update(entry.quality, sample, alpha);
        entry.last_seen = t;
        entry.source = source;
        entry.quality
    }

    fn credit_link(&mut self, from: &str, to: &str, t: Timestamp, sample: u8) {
        let alpha = self.config.ewma_alpha;
        let key = (from.to_string(), to.to_string());
        let entry = self.link_stats.entry(key).or_insert_with(|| LinkStat {
            from: from.to_string(),
            to: to.to_string(),
            quality: 0,
            last_updated: t,
            observed_count: 0,
            drop_count: 0,
        });
        entry.quality = ewma_update(entry.quality, sample, alpha);
        entry.last_updated = t;
        entry.observed_count += 1;
    }

    pub fn record_link_drop(&mut self, from: &str, to: &str, t: Timestamp) {
        if let Some(entry) = self.link_stats.get_mut(&(from.to_string(), to.to_string())) {
            entry.drop_count += 1;
            entry.last_updated = t;
        }
    }

    fn update_route(
        &mut self,
        destination: &str,
        origin: &str,
        quality: u8,
        hop_count: u8,
        t: Timestamp,
    ) {
        self.routes.insert(
            destination.to_string(),
            Route {
                destination: destination.to_string(),
                origin: origin.to_string(),
                quality,
                hop_count,
                last_updated: t,
            },
        );
    }

    /// Feeds one decoded frame's `(source, destination, via)` into the
    /// inference model. `via` is in transmission order; `repeated` mirrors
    /// the AX.25 H-bit.
    pub fn observe(&mut self, t: Timestamp, source: &str, destination: &str, via: &[ViaHop]) {
        let (primary_call, primary_source_kind) = match via.first() {
            Some(d1) if d1.repeated => (d1.call.clone(), NeighborSource::InferredVia),
            _ => (source.to_string(), NeighborSource::DirectHeard),
        };
        let primary_quality =
            self.credit_neighbor(&primary_call, t, FULL_QUALITY, primary_source_kind);

        if self.config.mode == NetromMode::Hybrid {
            for i in 1..via.len() {
                if !via[i].repeated {
                    continue;
                }
                let prev_call = via[i - 1].call.clone();
                let this_call = via[i].call.clone();
                let decayed =
                    (FULL_QUALITY as f64 * hop_decay(i, self.config.hop_decay_base)).round() as u8;
                self.credit_link(&prev_call, &this_call, t, decayed);
                self.credit_neighbor(&this_call, t, decayed, NeighborSource::InferredVia);
            }
        }

        let hop_count = via.iter().filter(|h| h.repeated).count() as u8;
        let origin = via
            .iter()
            .find(|h| h.repeated)
            .map(|h| h.call.clone())
            .unwrap_or_else(|| source.to_string());
        let origin_quality = self
            .neighbors
            .get(&origin)
            .map(|n| n.quality)
            .unwrap_or(primary_quality);

        debug!(destination, %origin, hop_count, "netrom route updated");
        self.update_route(destination, &origin, origin_quality, hop_count, t);
    }

    /// Applies time-based decay and drops entries past `retention_days`.
    /// Called on a periodic tick and just before snapshot persistence.
    pub fn purge_stale(&mut self, now: Timestamp) {
        let retention_secs = self.config.retention_days * 86_400;
        let half_life = self.config.decay_half_life_secs;

        self.neighbors.retain(|_, n| {
            let elapsed = (now - n.last_seen).max(0) / 1000;
            n.quality = time_decay(n.quality, elapsed, half_life);
            elapsed <= retention_secs
        });
        self.link_stats.retain(|_, l| {
            let elapsed = (now - l.last_updated).max(0) / 1000;
            l.quality = time_decay(l.quality, elapsed, half_life);
            elapsed <= retention_secs
        });
        self.routes.retain(|_, r| {
            let elapsed = (now - r.last_updated).max(0) / 1000;
            elapsed <= retention_secs
        });
    }

    /// A longer, UI-only staleness predicate; never used to filter
    /// persistence or inference state.
    pub fn is_stale_for_ui(&self, last_seen: Timestamp, now: Timestamp) -> bool {
        (now - last_seen).max(0) / 1000 > self.config.stale_ui_ttl_secs
    }

    /// Tracks the 60s-or-500-packets snapshot trigger; returns true when a
    /// snapshot should be taken, resetting the internal counters.
    pub fn should_snapshot(&mut self, now: Timestamp) -> bool {
        self.packets_since_snapshot += 1;
        let elapsed_secs = (now - self.last_snapshot_at).max(0) / 1000;
        if self.packets_since_snapshot >= self.config.snapshot_packet_interval
            || elapsed_secs >= self.config.snapshot_interval_secs
        {
            self.packets_since_snapshot = 0;
            self.last_snapshot_at = now;
            true
        } else {
            false
        }
    }

    /// Builds a persistable snapshot. Vectors are sorted by key so two
    /// snapshots of the same state compare equal regardless of the
    /// underlying hash maps' iteration order.
    pub fn snapshot(&self, last_packet_id: u64, config_hash: u64, now: Timestamp) -> NetromSnapshot {
        let mut neighbors: Vec<Neighbor> = self.neighbors.values().cloned().collect();
        neighbors.sort_by(|a, b| a.call.cmp(&b.call));
        let mut routes: Vec<Route> = self.routes.values().cloned().collect();
        routes.sort_by(|a, b| a.destination.cmp(&b.destination));
        let mut link_stats: Vec<LinkStat> = self.link_stats.values().cloned().collect();
        link_stats.sort_by(|a, b| (a.from.as_str(), a.to.as_str()).cmp(&(b.from.as_str(), b.to.as_str())));
        NetromSnapshot {
            neighbors,
            routes,
            link_stats,
            last_packet_id,
            config_hash,
            snapshot_timestamp: now,
        }
    }

    /// Loads a previously saved snapshot verbatim; no decay is applied at
    /// load time, per spec — the UI decides what counts as stale to show.
    pub fn load_snapshot(&mut self, snapshot: NetromSnapshot) {
        self.neighbors = snapshot
            .neighbors
            .into_iter()
            .map(|n| (n.call.clone(), n))
            .collect();
        self.routes = snapshot
            .routes
            .into_iter()
            .map(|r| (r.destination.clone(), r))
            .collect();
        self.link_stats = snapshot
            .link_stats
            .into_iter()
            .map(|l| ((l.from.clone(), l.to.clone()), l))
            .collect();
        self.last_snapshot_at = snapshot.snapshot_timestamp;
    }

    pub fn neighbor(&self, call: &str) -> Option<&Neighbor> {
        self.neighbors.get(call)
    }

    pub fn route(&self, destination: &str) -> Option<&Route> {
        self.routes.get(destination)
    }

    pub fn link_stat(&self, from: &str, to: &str) -> Option<&LinkStat> {
        self.link_stats.get(&(from.to_string(), to.to_string()))
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(call: &str, repeated: bool) -> ViaHop {
        ViaHop { call: call.to_string(), repeated }
    }

    #[test]
    fn direct_heard_with_no_via_credits_source() {
        let mut tracker = NetromTracker::new(NetromConfig::default());
        tracker.observe(0, "N0CALL", "APRS", &[]);
        let neighbor = tracker.neighbor("N0CALL").unwrap();
        assert_eq!(neighbor.source, NeighborSource::DirectHeard);
        assert!(neighbor.quality > 0);
        let route = tracker.route("APRS").unwrap();
        assert_eq!(route.origin, "N0CALL");
        assert_eq!(route.hop_count, 0);
    }

    #[test]
    fn hybrid_credits_digipeater_chain_with_decay() {
        let mut tracker = NetromTracker::new(NetromConfig::default());
        let via = [hop("B", true), hop("C", true)];
        tracker.observe(0, "A", "Z", &via);

        assert_eq!(tracker.neighbor("B").unwrap().quality, FULL_QUALITY);
        let c_quality = tracker.neighbor("C").unwrap().quality;
        assert!(c_quality > 0 && c_quality < FULL_QUALITY);

        let link = tracker.link_stat("B", "C").unwrap();
        assert_eq!(link.observed_count, 1);
        assert!(link.quality > 0);

        let route = tracker.route("Z").unwrap();
        assert_eq!(route.origin, "B");
        assert_eq!(route.hop_count, 2);
    }

    #[test]
    fn direct_only_mode_skips_further_digis() {
        let mut config = NetromConfig::default();
        config.mode = NetromMode::DirectOnly;
        let mut tracker = NetromTracker::new(config);
        let via = [hop("B", true), hop("C", true)];
        tracker.observe(0, "A", "Z", &via);

        assert!(tracker.neighbor("B").is_some());
        assert!(tracker.neighbor("C").is_none());
        assert!(tracker.link_stat("B", "C").is_none());
    }

    #[test]
    fn repeated_observations_converge_within_one_percent() {
        let mut tracker = NetromTracker::new(NetromConfig::default());
        for t in 0..100 {
            tracker.observe(t * 1000, "A", "Z", &[hop("B", true)]);
        }
        let quality = tracker.neighbor("B").unwrap().quality as f64;
        let target = FULL_QUALITY as f64;
        assert!((target - quality) / target < 0.01);
    }

    #[test]
    fn snapshot_round_trips_all_fields() {
        let mut tracker = NetromTracker::new(NetromConfig::default());
        tracker.observe(1000, "A", "Z", &[hop("B", true), hop("C", true)]);
        let snap = tracker.snapshot(42, 7, 2000);

        let mut restored = NetromTracker::new(NetromConfig::default());
        restored.load_snapshot(snap.clone());
        let restored_again = restored.snapshot(42, 7, 2000);
        assert_eq!(restored_again, snap);
    }

    #[test]
    fn should_snapshot_triggers_on_packet_count() {
        let mut config = NetromConfig::default();
        config.snapshot_packet_interval = 3;
        config.snapshot_interval_secs = 10_000;
        let mut tracker = NetromTracker::new(config);
        assert!(!tracker.should_snapshot(0));
        assert!(!tracker.should_snapshot(0));
        assert!(tracker.should_snapshot(0));
    }

    #[test]
    fn should_snapshot_triggers_on_elapsed_time() {
        let mut config = NetromConfig::default();
        config.snapshot_packet_interval = 10_000;
        config.snapshot_interval_secs = 60;
        let mut tracker = NetromTracker::new(config);
        assert!(!tracker.should_snapshot(0));
        assert!(tracker.should_snapshot(61_000));
    }

    #[test]
    fn purge_stale_drops_entries_past_retention() {
        let mut config = NetromConfig::default();
        config.retention_days = 0;
        config.decay_half_life_secs = 0;
        let mut tracker = NetromTracker::new(config);
        tracker.observe(0, "A", "Z", &[]);
        tracker.purge_stale(2000);
        assert!(tracker.neighbor("A").is_none());
    }
}
