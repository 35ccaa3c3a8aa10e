use std::collections::VecDeque;
use std::time::Duration;

/// One decoded AX.25 frame as the engine sees it, independent of whatever
/// connected-mode session (if any) is carrying it.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
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
    /// Set by the intake pipeline when an identical `(from, to, text)`
    /// triple was seen within the duplicate window on a different
    /// via-path; never suppressed, only flagged, so operators can see
    /// alternate paths.
    pub is_duplicate: bool,
    /// Set when `info` carries an AXDP PDU (PID 0xF0 and the `AXDP` magic
    /// prefix), so the engine can route it to the owning session instead
    /// of, or in addition to, treating it as a plain monitored line.
    pub is_axdp: bool,
}

impl Packet {
    /// Best-effort UTF-8 view of `info`, used for watch matching and
    /// duplicate-text comparison. Binary payloads (AXDP, unmapped PIDs)
    /// yield `None`.
    pub fn decoded_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.info).ok()
    }
}

/// Window within which an identical `(from, to, text)` seen on a different
/// via-path is flagged as a duplicate rather than silently merged.
pub const DUPLICATE_WINDOW: Duration = Duration::from_secs(5);

/// Capped, ascending-timestamp-ordered in-memory mirror of recent packets.
/// Oldest entries are dropped on overflow; the newest packet is always
/// retained regardless of buffer size.
#[derive(Debug)]
pub struct PacketBuffer {
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl PacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, packet: Packet) {
        self.packets.push_back(packet);
        while self.packets.len() > self.capacity {
            self.packets.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }

    pub fn newest(&self) -> Option<&Packet> {
        self.packets.back()
    }

    /// Returns whether a `(from, to, text)` triple was already seen within
    /// [`DUPLICATE_WINDOW`] of `timestamp` (in milliseconds) on a different
    /// via-path.
    pub fn is_recent_duplicate(&self, from: &str, to: &str, text: &str, via: &[String], timestamp: i64) -> bool {
        let window_ms = DUPLICATE_WINDOW.as_millis() as i64;
        self.packets.iter().rev().any(|p| {
            if timestamp - p.timestamp > window_ms {
                return false;
            }
            p.from == from
                && p.to == to
                && p.decoded_text() == Some(text)
                && p.via != via
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(t: i64) -> Packet {
        Packet {
            timestamp: t,
            from: "N0CALL".into(),
            to: "APRS".into(),
            via: vec!["WIDE1-1".into()],
            frame_type: "UI".into(),
            control: 0x03,
            pid: Some(0xF0),
            info: b"hi".to_vec(),
            raw: Vec::new(),
            endpoint: "tcp".into(),
            pinned: false,
            is_duplicate: false,
            is_axdp: false,
        }
    }

    #[test]
    fn cap_invariant_holds_and_keeps_newest() {
        let mut buffer = PacketBuffer::new(3);
        for t in 0..10 {
            buffer.push(packet(t));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.newest().unwrap().timestamp, 9);
    }

    #[test]
    fn duplicate_detection_requires_different_via_within_window() {
        let mut buffer = PacketBuffer::new(10);
        buffer.push(packet(1000));
        assert!(!buffer.is_recent_duplicate("N0CALL", "APRS", "hi", &["WIDE1-1".into()], 1100));
        assert!(buffer.is_recent_duplicate("N0CALL", "APRS", "hi", &["WIDE2-1".into()], 1100));
        assert!(!buffer.is_recent_duplicate("N0CALL", "APRS", "hi", &["WIDE2-1".into()], 10_000));
    }
}
