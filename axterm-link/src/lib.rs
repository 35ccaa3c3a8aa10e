//! Transport links: a uniform state machine over TCP, USB-serial, and BLE,
//! each delivering raw KISS byte chunks to the engine and accepting
//! outbound KISS-framed bytes. Every link runs its own I/O loop on a
//! dedicated task or blocking thread and talks to its owner purely over
//! channels, mirroring the io-worker split the rest of this workspace uses
//! for blocking file and config operations.

pub mod backoff;
pub mod ble;
pub mod error;
pub mod mobilinkd;
pub mod serial;
pub mod settings;
pub mod tcp;

pub use error::LinkError;
pub use settings::{LinkKind, LinkSettings, MobilinkdSettings};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    /// A non-empty chunk as delivered by the transport; not yet KISS-parsed.
    Data(Vec<u8>),
    Telemetry(mobilinkd::Telemetry),
}

#[derive(Debug, Clone)]
pub enum LinkCommand {
    Send(Vec<u8>),
    Disconnect,
}

/// What the engine holds for a running link: a command channel in, and the
/// join handle of the task driving it.
pub struct LinkHandle {
    kind: LinkKind,
    command_tx: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

impl LinkHandle {
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    pub fn send(&self, data: Vec<u8>) -> Result<(), LinkError> {
        self.command_tx
            .send(LinkCommand::Send(data))
            .map_err(|_| LinkError::NotConnected)
    }

    pub fn disconnect(&self) {
        let _ = self.command_tx.send(LinkCommand::Disconnect);
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawns a link for `settings`, dispatching to the matching transport.
/// `events` is shared by every link kind so the engine can hold one
/// receiver regardless of which transport is active.
pub fn spawn(
    settings: LinkSettings,
    mobilinkd: MobilinkdSettings,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> LinkHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let kind = settings.kind;
    let task = match kind {
        LinkKind::Network => tokio::spawn(tcp::run(settings, events, command_rx)),
        LinkKind::Serial => {
            tokio::spawn(serial::run(settings, mobilinkd, events, command_rx))
        }
        LinkKind::Ble => tokio::spawn(ble::run(settings, events, command_rx)),
    };
    LinkHandle {
        kind,
        command_tx,
        task,
    }
}
