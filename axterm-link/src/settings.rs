/// Which transport a link uses. Kept as a tag distinct from the link
/// implementation itself so the engine can compare settings snapshots
/// without depending on any transport-specific type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LinkKind {
    Network,
    Serial,
    Ble,
}

/// Mobilinkd TNC4 tuning fields. Deliberately excluded from
/// [`LinkSettings`]'s equality so changing them never forces a link
/// restart — they are applied as one-shot KISS commands instead.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MobilinkdSettings {
    pub enabled: bool,
    pub modem_type: u8,
    pub input_gain: u8,
    pub output_gain: u8,
}

impl Default for MobilinkdSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            modem_type: 0,
            input_gain: 0,
            output_gain: 0,
        }
    }
}

/// The tuple the engine snapshots when "connection logic suspended" is set,
/// and compares against on clear to decide whether to reconnect.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkSettings {
    pub kind: LinkKind,
    pub host: String,
    pub port: u16,
    pub serial_path: String,
    pub serial_baud: u32,
    pub serial_auto_reconnect: bool,
    pub ble_id: String,
    pub ble_name: String,
    pub ble_auto_reconnect: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            kind: LinkKind::Network,
            host: String::new(),
            port: 8001,
            serial_path: String::new(),
            serial_baud: 9600,
            serial_auto_reconnect: true,
            ble_id: String::new(),
            ble_name: String::new(),
            ble_auto_reconnect: true,
        }
    }
}

impl LinkSettings {
    /// Whether `auto_reconnect` applies for the configured transport kind.
    pub fn auto_reconnect(&self) -> bool {
        match self.kind {
            LinkKind::Network => false,
            LinkKind::Serial => self.serial_auto_reconnect,
            LinkKind::Ble => self.ble_auto_reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_mobilinkd_tuning() {
        let a = LinkSettings {
            kind: LinkKind::Serial,
            serial_path: "/dev/ttyACM0".into(),
            ..Default::default()
        };
        let b = a.clone();
        // MobilinkdSettings isn't part of LinkSettings at all, so tuning
        // changes never register as a settings diff.
        assert_eq!(a, b);
    }

    #[test]
    fn differing_path_is_unequal() {
        let a = LinkSettings {
            kind: LinkKind::Serial,
            serial_path: "/dev/ttyACM0".into(),
            ..Default::default()
        };
        let b = LinkSettings {
            serial_path: "/dev/ttyACM1".into(),
            ..a.clone()
        };
        assert_ne!(a, b);
    }
}
