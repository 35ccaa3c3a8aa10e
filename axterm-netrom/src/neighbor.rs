use crate::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborSource {
    DirectHeard,
    InferredVia,
    RoutingBroadcast,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub call: String,
    pub quality: u8,
    pub last_seen: Timestamp,
    pub source: NeighborSource,
}
