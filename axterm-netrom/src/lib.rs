//! Passive NET/ROM topology inference: no routing broadcasts are emitted,
//! only the topology model inferred from overheard traffic's via-paths.

pub mod link_stat;
pub mod neighbor;
pub mod quality;
pub mod route;
pub mod tracker;

pub use link_stat::LinkStat;
pub use neighbor::{Neighbor, NeighborSource};
pub use route::Route;
pub use tracker::{NetromConfig, NetromMode, NetromSnapshot, NetromTracker, ViaHop};

/// Unix-epoch milliseconds. Callers (the engine) supply this from a
/// packet's own timestamp rather than this crate reading the clock, so
/// quality convergence stays deterministic and testable.
pub type Timestamp = i64;
