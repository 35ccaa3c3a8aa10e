use crate::watch::WatchRule;
use axterm_axdp::transfer::PeerFilePolicy;
use axterm_link::{LinkSettings, MobilinkdSettings};
use axterm_proto::axdp::CompressionAlgo;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::{fs, io};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub packet_retention: u32,
    pub console_retention: u32,
    pub raw_retention: u32,
    pub route_retention_days: u32,
    pub persist_history: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            packet_retention: 5_000,
            console_retention: 5_000,
            raw_retention: 5_000,
            route_retention_days: 30,
            persist_history: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultCompression {
    pub enabled: bool,
    pub algorithm: CompressionAlgo,
}

impl Default for DefaultCompression {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgo::Lz4,
        }
    }
}

/// The full externally-configurable surface of an engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub transport: LinkSettings,
    pub mobilinkd: MobilinkdSettings,
    pub my_callsign: String,
    pub retention: RetentionConfig,
    pub default_compression: DefaultCompression,
    /// Per-peer incoming-transfer policy, keyed by `display()`-form callsign
    /// (e.g. `N0CALL-1`). Peers with no entry default to `Ask`.
    pub permissions: HashMap<String, PeerFilePolicy>,
    pub max_packets: usize,
    pub watch_rules: Vec<WatchRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: LinkSettings::default(),
            mobilinkd: MobilinkdSettings::default(),
            my_callsign: String::new(),
            retention: RetentionConfig::default(),
            default_compression: DefaultCompression::default(),
            permissions: HashMap::new(),
            max_packets: 2_000,
            watch_rules: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn policy_for(&self, peer: &str) -> PeerFilePolicy {
        self.permissions
            .get(peer)
            .copied()
            .unwrap_or(PeerFilePolicy::Ask)
    }

    /// Whether applying `other` in place of `self` requires tearing down and
    /// re-establishing the transport link. Mobilinkd tuning and ambient
    /// fields like retention never need a reconnect.
    pub fn requires_reconnect(&self, other: &EngineConfig) -> bool {
        self.transport != other.transport || self.my_callsign != other.my_callsign
    }
}

pub fn load_config(config_dir: &Path) -> EngineConfig {
    let config_path = config_dir.join("config.json");
    fs::read_to_string(config_path)
        .ok()
        .and_then(|data| serde_json::from_str::<EngineConfig>(&data).ok())
        .unwrap_or_default()
}

pub fn save_config(config_dir: &Path, config: &EngineConfig) -> io::Result<()> {
    let config_path = config_dir.join("config.json");
    let data = serde_json::to_string_pretty(config)?;
    let mut file = fs::File::create(config_path)?;
    file.write_all(data.as_bytes())?;
    Ok(())
}
