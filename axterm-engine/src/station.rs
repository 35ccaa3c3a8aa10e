use std::collections::HashMap;

/// What the engine remembers about a station heard on the air, independent
/// of any connected-mode session it may or may not have with us.
#[derive(Debug, Clone, PartialEq)]
pub struct StationInfo {
    pub call: String,
    pub heard_count: u64,
    pub last_heard: i64,
    pub last_via: Vec<String>,
}

#[derive(Debug, Default)]
pub struct StationTracker {
    stations: HashMap<String, StationInfo>,
}

impl StationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, call: &str, t: i64, via: &[String]) {
        let entry = self.stations.entry(call.to_string()).or_insert(StationInfo {
            call: call.to_string(),
            heard_count: 0,
            last_heard: t,
            last_via: Vec::new(),
        });
        entry.heard_count += 1;
        entry.last_heard = t;
        entry.last_via = via.to_vec();
    }

    pub fn get(&self, call: &str) -> Option<&StationInfo> {
        self.stations.get(call)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// A sorted snapshot for observers; sorted so repeated calls produce
    /// stable ordering regardless of the underlying map's iteration order.
    pub fn snapshot(&self) -> Vec<StationInfo> {
        let mut stations: Vec<StationInfo> = self.stations.values().cloned().collect();
        stations.sort_by(|a, b| a.call.cmp(&b.call));
        stations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_increments_count_and_updates_via() {
        let mut tracker = StationTracker::new();
        tracker.observe("N0CALL", 100, &["WIDE1-1".into()]);
        tracker.observe("N0CALL", 200, &["WIDE2-1".into()]);
        let info = tracker.get("N0CALL").unwrap();
        assert_eq!(info.heard_count, 2);
        assert_eq!(info.last_heard, 200);
        assert_eq!(info.last_via, vec!["WIDE2-1".to_string()]);
    }
}
