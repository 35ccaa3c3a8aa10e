//! Tracks which stations have confirmed AXDP support, keyed by
//! `(base_call, ssid)` the way the station tracker keys its own table.

use axterm_proto::axdp::CapabilityBlock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StationKey {
    pub base_call: String,
    pub ssid: u8,
}

impl StationKey {
    pub fn new(base_call: impl Into<String>, ssid: u8) -> Self {
        Self {
            base_call: base_call.into().to_ascii_uppercase(),
            ssid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityEntry {
    pub capabilities: CapabilityBlock,
    pub last_confirmed_at: Instant,
}

/// Default freshness window: a PING/PONG older than this no longer counts
/// as confirming the peer's AXDP support.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Default)]
pub struct CapabilityStore {
    entries: HashMap<StationKey, CapabilityEntry>,
    freshness_window: Duration,
}

impl CapabilityStore {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    pub fn confirm(&mut self, key: StationKey, capabilities: CapabilityBlock) {
        self.entries.insert(
            key,
            CapabilityEntry {
                capabilities,
                last_confirmed_at: Instant::now(),
            },
        );
    }

    pub fn is_capable(&self, key: &StationKey) -> bool {
        self.entries
            .get(key)
            .map(|e| e.last_confirmed_at.elapsed() <= self.freshness_window)
            .unwrap_or(false)
    }

    pub fn get(&self, key: &StationKey) -> Option<&CapabilityEntry> {
        self.entries.get(key)
    }

    pub fn evict(&mut self, key: &StationKey) -> Option<CapabilityEntry> {
        self.entries.remove(key)
    }

    /// Drops every entry stale with respect to the freshness window,
    /// returning how many were removed.
    pub fn evict_stale(&mut self) -> usize {
        let before = self.entries.len();
        let window = self.freshness_window;
        self.entries
            .retain(|_, entry| entry.last_confirmed_at.elapsed() <= window);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axterm_proto::axdp::Features;

    fn caps() -> CapabilityBlock {
        CapabilityBlock {
            proto_min: 1,
            proto_max: 1,
            features: Features::RESUME,
        }
    }

    #[test]
    fn confirmed_station_is_capable() {
        let mut store = CapabilityStore::new();
        let key = StationKey::new("n0call", 1);
        store.confirm(key.clone(), caps());
        assert!(store.is_capable(&key));
    }

    #[test]
    fn stale_entry_is_not_capable() {
        let mut store = CapabilityStore::new().with_freshness_window(Duration::from_millis(0));
        let key = StationKey::new("n0call", 1);
        store.confirm(key.clone(), caps());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.is_capable(&key));
    }

    #[test]
    fn evict_stale_removes_only_expired() {
        let mut store = CapabilityStore::new().with_freshness_window(Duration::from_millis(0));
        store.confirm(StationKey::new("N0CALL", 1), caps());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.evict_stale(), 1);
        assert!(store.is_empty());
    }
}
