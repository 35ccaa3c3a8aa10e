//! Owns every piece of mutable AXTerm state and drives it from a single
//! actor task: one mailbox of [`EngineCommand`]s in, one broadcast of
//! [`EngineEvent`]s out. No `Arc<Mutex<_>>` anywhere — everything the
//! engine touches is owned directly by the task running [`Engine::run`],
//! the same single-writer shape `axterm-link`'s transport loops and
//! `axterm-session`'s command/event draining already use.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod packet;
pub mod pipeline;
pub mod station;
pub mod watch;

pub use command::EngineCommand;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use event::EngineEvent;
pub use watch::WatchRule;

use axterm_axdp::{AxdpEvent, CapabilityStore, PeerFilePolicy, StationKey};
use axterm_axdp::AxdpSession;
use axterm_proto::axdp::{AxdpMessage, CapabilityBlock};
use axterm_link::mobilinkd;
use axterm_link::{LinkEvent, LinkHandle, LinkSettings, LinkState};
use axterm_netrom::{NetromConfig, NetromTracker};
use axterm_proto::ax25::Modulo;
use axterm_session::{Session, SessionCommand, SessionEvent, SessionKey, SessionState, TimerKind};
use axterm_store::types::StoredPacket;
use axterm_store::Store;
use packet::PacketBuffer;
use pipeline::{Intake, SessionFrame};
use smallvec::SmallVec;
use station::StationTracker;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Splits `N0CALL-7` into `("N0CALL", 7)`, defaulting SSID to 0 when absent.
fn split_callsign(display: &str) -> (String, u8) {
    match display.split_once('-') {
        Some((call, ssid)) => (call.to_string(), ssid.parse().unwrap_or(0)),
        None => (display.to_string(), 0),
    }
}

/// Handle held by the external caller (GUI or the headless `axterm` bin):
/// a command sender paired with the event stream the engine drives.
pub struct EngineHandle {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    pub task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("engine command sent after shutdown");
        }
    }
}

/// Per-peer state: the connected-mode session carrying the bytes, the AXDP
/// layer riding on top of it, and bookkeeping that outlives any single
/// frame exchange. Alive for as long as we've ever connected to or heard
/// from the peer.
struct PeerState {
    session: Session,
    axdp: AxdpSession,
    /// Offers received but not yet accepted/declined, keyed by transfer id.
    /// Populated from inbound `AxdpEvent::FileOffered` when the peer's
    /// file policy is `Ask`; `AlwaysAccept`/`AlwaysDeny` peers are handled
    /// entirely inside `AxdpSession` and never appear here.
    pending_offers: HashMap<u64, axterm_proto::axdp::FileOffer>,
    /// One generation counter per `TimerKind` (indexed via `timer_index`),
    /// bumped on every `StartTimer`/`CancelTimer` so a scheduled timer fire
    /// that arrives after being superseded or cancelled is recognized as
    /// stale and ignored.
    timer_gens: [u64; 3],
}

pub struct Engine {
    config: EngineConfig,
    store: Store,
    stations: StationTracker,
    netrom: NetromTracker,
    buffer: PacketBuffer,
    watch_rules: Vec<WatchRule>,
    capabilities: CapabilityStore,
    peers: HashMap<StationKey, PeerState>,
    intake: Intake,
    link: Option<LinkHandle>,
    link_settings: Option<LinkSettings>,
    connection_logic_suspended: bool,
    suspended_settings: Option<LinkSettings>,
    last_packet_id: u64,
    config_hash: u64,

    commands: mpsc::UnboundedReceiver<EngineCommand>,
    self_tx: mpsc::UnboundedSender<EngineCommand>,
    link_events_tx: mpsc::UnboundedSender<LinkEvent>,
    link_events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl Engine {
    /// Opens (or creates) the SQLite store at `db_path`, applies
    /// `config`'s retention settings, and returns a handle plus the event
    /// stream. The engine itself starts running immediately on its own
    /// task.
    pub fn spawn<P: AsRef<Path>>(
        config: EngineConfig,
        db_path: P,
    ) -> Result<(EngineHandle, mpsc::UnboundedReceiver<EngineEvent>)> {
        let store = Store::open(db_path)?;
        Ok(Self::spawn_with_store(config, store))
    }

    pub fn spawn_in_memory(config: EngineConfig) -> Result<(EngineHandle, mpsc::UnboundedReceiver<EngineEvent>)> {
        let store = Store::open_in_memory()?;
        Ok(Self::spawn_with_store(config, store))
    }

    fn spawn_with_store(
        config: EngineConfig,
        store: Store,
    ) -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (link_events_tx, link_events_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let netrom_config = NetromConfig {
            retention_days: config.retention.route_retention_days as i64,
            ..NetromConfig::default()
        };
        let max_packets = config.max_packets;
        let watch_rules = config.watch_rules.clone();

        let engine = Engine {
            store,
            stations: StationTracker::new(),
            netrom: NetromTracker::new(netrom_config),
            buffer: PacketBuffer::new(max_packets),
            watch_rules,
            capabilities: CapabilityStore::new(),
            peers: HashMap::new(),
            intake: Intake::new(Modulo::Eight),
            link: None,
            link_settings: None,
            connection_logic_suspended: false,
            suspended_settings: None,
            last_packet_id: 0,
            config_hash: 0,
            commands: command_rx,
            self_tx: command_tx.clone(),
            link_events_tx,
            link_events_rx,
            events: event_tx,
            config,
        };

        let task = tokio::spawn(engine.run());
        (EngineHandle { command_tx, task }, event_rx)
    }

    async fn run(mut self) {
        let caps = self.local_caps();
        info!(proto_min = caps.proto_min, proto_max = caps.proto_max, "engine starting");
        self.restore_netrom().await;
        let mut snapshot_tick = tokio::time::interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                maybe_cmd = self.commands.recv() => {
                    match maybe_cmd {
                        Some(EngineCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                Some(event) = self.link_events_rx.recv() => {
                    self.handle_link_event(event).await;
                }
                _ = snapshot_tick.tick() => {
                    self.maybe_snapshot_netrom().await;
                }
            }
        }

        if let Some(link) = self.link.take() {
            link.abort();
        }
        self.store.shutdown();
        info!("engine shut down");
    }

    // ---- command handling --------------------------------------------------

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::ConnectUsingSettings(settings) => self.connect(settings),
            EngineCommand::ConnectTcp { host, port } => {
                self.connect(LinkSettings {
                    kind: axterm_link::LinkKind::Network,
                    host,
                    port,
                    ..self.config.transport.clone()
                });
            }
            EngineCommand::ConnectSerial { path, baud } => {
                self.connect(LinkSettings {
                    kind: axterm_link::LinkKind::Serial,
                    serial_path: path,
                    serial_baud: baud,
                    ..self.config.transport.clone()
                });
            }
            EngineCommand::ConnectBle { id, name } => {
                self.connect(LinkSettings {
                    kind: axterm_link::LinkKind::Ble,
                    ble_id: id,
                    ble_name: name,
                    ..self.config.transport.clone()
                });
            }
            EngineCommand::Disconnect => {
                if let Some(link) = self.link.take() {
                    link.disconnect();
                }
                self.link_settings = None;
            }
            EngineCommand::SetConnectionLogicSuspended(suspended) => {
                self.connection_logic_suspended = suspended;
                if suspended {
                    self.suspended_settings = Some(self.config.transport.clone());
                } else if let Some(settings) = self.suspended_settings.take() {
                    if Some(&settings) != self.link_settings.as_ref() {
                        self.config.transport = settings.clone();
                        self.connect(settings);
                    }
                }
            }
            EngineCommand::UpdateTransportSettings(settings) => {
                if self.connection_logic_suspended {
                    self.suspended_settings = Some(settings);
                } else {
                    self.config.transport = settings;
                }
            }
            EngineCommand::SendOutbound { to, via, text } => self.send_outbound(&to, &via, text),
            EngineCommand::MobilinkdPollInputLevel => {
                self.send_raw(mobilinkd::poll_input_level_frame());
                self.schedule_mobilinkd_reset();
            }
            EngineCommand::MobilinkdAdjustInputLevels => {
                self.send_raw(mobilinkd::adjust_input_levels_frame());
                self.schedule_mobilinkd_reset();
            }
            EngineCommand::MobilinkdSetInputGain(level) => {
                self.send_raw(mobilinkd::set_input_gain_frame(level));
            }
            EngineCommand::MobilinkdReset => self.send_raw(mobilinkd::reset_frame()),
            EngineCommand::SendFile { peer, file_name, data, compression_override } => {
                self.send_file(&peer, file_name, data, compression_override);
            }
            EngineCommand::AcceptIncoming { .. }
            | EngineCommand::DeclineIncoming { .. }
            | EngineCommand::PauseTransfer { .. }
            | EngineCommand::ResumeTransfer { .. }
            | EngineCommand::CancelTransfer { .. } => self.handle_transfer_command(cmd),
            EngineCommand::ConnectSession { peer } => {
                let Some(key) = self.ensure_peer(&peer) else {
                    let _ = self.events.send(EngineEvent::Error("my_callsign not configured".into()));
                    return;
                };
                if let Some(entry) = self.peers.get_mut(&key) {
                    entry.session.connect();
                }
                self.after_session_mutation(&key, &peer).await;
            }
            EngineCommand::DisconnectSession { peer } => {
                let key = Self::peer_key(&peer);
                if !self.peers.contains_key(&key) {
                    let _ = self.events.send(EngineEvent::Error(EngineError::UnknownSession(peer).to_string()));
                    return;
                }
                if let Some(entry) = self.peers.get_mut(&key) {
                    entry.session.disconnect();
                }
                self.after_session_mutation(&key, &peer).await;
            }
            EngineCommand::SendSessionInfo { peer, data } => {
                let key = Self::peer_key(&peer);
                match self.peers.get_mut(&key).map(|entry| entry.session.send_info(data)) {
                    Some(true) => self.after_session_mutation(&key, &peer).await,
                    Some(false) => {
                        let _ = self.events.send(EngineEvent::Error(format!("session with {peer} not ready to send")));
                    }
                    None => {
                        let _ = self.events.send(EngineEvent::Error(EngineError::UnknownSession(peer).to_string()));
                    }
                }
            }
            EngineCommand::SendChat { peer, text } => {
                let Some(key) = self.ensure_peer(&peer) else {
                    let _ = self.events.send(EngineEvent::Error("my_callsign not configured".into()));
                    return;
                };
                let messages = match self.peers.get_mut(&key) {
                    Some(entry) => entry.axdp.send_chat(&text),
                    None => return,
                };
                for msg in messages {
                    match msg.encode() {
                        Ok(encoded) => {
                            if let Some(entry) = self.peers.get_mut(&key) {
                                entry.session.send_info(encoded);
                            }
                        }
                        Err(e) => {
                            let _ = self.events.send(EngineEvent::Error(e.to_string()));
                        }
                    }
                }
                self.after_session_mutation(&key, &peer).await;
            }
            EngineCommand::SessionTimerFired { peer, kind, generation } => {
                let key = Self::peer_key(&peer);
                let idx = Self::timer_index(kind);
                if self.peers.get(&key).map(|e| e.timer_gens[idx]) != Some(generation) {
                    return;
                }
                if let Some(entry) = self.peers.get_mut(&key) {
                    match kind {
                        TimerKind::T1 => entry.session.on_t1_expiry(),
                        TimerKind::T2 => entry.session.on_t2_expiry(),
                        TimerKind::T3 => entry.session.on_t3_expiry(),
                    }
                }
                self.after_session_mutation(&key, &peer).await;
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn connect(&mut self, settings: LinkSettings) {
        if let Some(link) = self.link.take() {
            link.abort();
        }
        let handle = axterm_link::spawn(settings.clone(), self.config.mobilinkd.clone(), self.link_events_tx.clone());
        self.link = Some(handle);
        self.link_settings = Some(settings);
    }

    fn send_raw(&self, frame: Vec<u8>) {
        match &self.link {
            Some(link) => {
                if let Err(e) = link.send(frame) {
                    let _ = self.events.send(EngineEvent::Error(e.to_string()));
                }
            }
            None => {
                let _ = self.events.send(EngineEvent::Error(EngineError::NoActiveLink.to_string()));
            }
        }
    }

    /// Mobilinkd's poll/adjust commands both demand a follow-up reset to
    /// restart the demodulator; we schedule it by posting a command back
    /// to our own mailbox rather than holding the link handle across the
    /// delay.
    fn schedule_mobilinkd_reset(&self) {
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(mobilinkd::RESET_DELAY).await;
            let _ = self_tx.send(EngineCommand::MobilinkdReset);
        });
    }

    fn send_outbound(&mut self, to: &str, via: &[String], text: String) {
        let Some(my_call) = self.build_my_address() else {
            let _ = self.events.send(EngineEvent::Error("my_callsign not configured".into()));
            return;
        };
        let (dest_call, dest_ssid) = split_callsign(to);
        let Ok(dest) = axterm_proto::ax25::Ax25Address::new(&dest_call, dest_ssid) else {
            let _ = self.events.send(EngineEvent::Error(format!("bad destination callsign: {to}")));
            return;
        };
        let via_addrs: Vec<axterm_proto::ax25::Ax25Address> = via
            .iter()
            .filter_map(|v| {
                let (call, ssid) = split_callsign(v);
                axterm_proto::ax25::Ax25Address::new(&call, ssid).ok()
            })
            .collect();
        let class = axterm_proto::ax25::FrameClass::U {
            kind: axterm_proto::ax25::UFrameKind::UI,
            pf: false,
        };
        let frame = axterm_proto::ax25::OutboundFrame::new(dest, my_call, axterm_proto::ax25::Direction::Command, class)
            .via(via_addrs)
            .pid(axterm_proto::ax25::PID_NO_LAYER3)
            .info(text.into_bytes())
            .build();
        let encoded = frame.encode(Modulo::Eight);
        self.send_raw(axterm_proto::kiss::encode_data(0, &encoded));
    }

    fn build_my_address(&self) -> Option<axterm_proto::ax25::Ax25Address> {
        if self.config.my_callsign.is_empty() {
            return None;
        }
        let (call, ssid) = split_callsign(&self.config.my_callsign);
        axterm_proto::ax25::Ax25Address::new(&call, ssid).ok()
    }

    fn peer_key(display: &str) -> StationKey {
        let (call, ssid) = split_callsign(display);
        StationKey::new(call, ssid)
    }

    fn timer_index(kind: TimerKind) -> usize {
        match kind {
            TimerKind::T1 => 0,
            TimerKind::T2 => 1,
            TimerKind::T3 => 2,
        }
    }

    /// Looks up the peer's state, creating a fresh session and AXDP layer
    /// on first contact. Returns `None` only when `my_callsign` isn't
    /// configured, since a `SessionKey` needs a local address.
    fn ensure_peer(&mut self, peer: &str) -> Option<StationKey> {
        let key = Self::peer_key(peer);
        if self.peers.contains_key(&key) {
            return Some(key);
        }
        let local = self.build_my_address()?;
        let (call, ssid) = split_callsign(peer);
        let remote = axterm_proto::ax25::Ax25Address::new(&call, ssid).ok()?;
        let session_key = SessionKey { local, remote, path: SmallVec::new() };
        self.peers.insert(
            key.clone(),
            PeerState {
                session: Session::new(session_key).with_modulus(Modulo::Eight),
                axdp: AxdpSession::new(key.clone()),
                pending_offers: HashMap::new(),
                timer_gens: [0; 3],
            },
        );
        Some(key)
    }

    /// Schedules a `SessionCommand::StartTimer`/`CancelTimer` follow-up by
    /// posting back to our own mailbox, the same pattern `schedule_mobilinkd_reset`
    /// uses — the session never arms a real timer itself.
    fn schedule_session_timer(&self, peer: String, kind: TimerKind, duration: Duration, generation: u64) {
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = self_tx.send(EngineCommand::SessionTimerFired { peer, kind, generation });
        });
    }

    /// Drains and executes every `SessionCommand` the peer's session has
    /// queued: frames go out over the link, timers are (re)scheduled or
    /// invalidated by bumping their generation.
    fn dispatch_session_commands(&mut self, key: &StationKey, peer: &str) {
        let commands = match self.peers.get_mut(key) {
            Some(entry) => entry.session.drain_commands(),
            None => return,
        };
        for cmd in commands {
            match cmd {
                SessionCommand::SendFrame { class, info } => self.send_session_frame(peer, class, info),
                SessionCommand::StartTimer { kind, duration } => {
                    let idx = Self::timer_index(kind);
                    let generation = self.peers.get_mut(key).map(|entry| {
                        entry.timer_gens[idx] = entry.timer_gens[idx].wrapping_add(1);
                        entry.timer_gens[idx]
                    });
                    if let Some(generation) = generation {
                        self.schedule_session_timer(peer.to_string(), kind, duration, generation);
                    }
                }
                SessionCommand::CancelTimer { kind } => {
                    let idx = Self::timer_index(kind);
                    if let Some(entry) = self.peers.get_mut(key) {
                        entry.timer_gens[idx] = entry.timer_gens[idx].wrapping_add(1);
                    }
                }
            }
        }
    }

    fn send_session_frame(&self, peer: &str, class: axterm_proto::ax25::FrameClass, info: Vec<u8>) {
        let Some(my_call) = self.build_my_address() else { return };
        let (call, ssid) = split_callsign(peer);
        let Ok(dest) = axterm_proto::ax25::Ax25Address::new(&call, ssid) else { return };
        let mut builder =
            axterm_proto::ax25::OutboundFrame::new(dest, my_call, axterm_proto::ax25::Direction::Command, class)
                .info(info);
        if matches!(class, axterm_proto::ax25::FrameClass::I { .. }) {
            builder = builder.pid(axterm_proto::ax25::PID_NO_LAYER3);
        }
        let encoded = builder.build().encode(Modulo::Eight);
        self.send_raw(axterm_proto::kiss::encode_data(0, &encoded));
    }

    /// Dispatches one frame addressed to us into the owning session, then
    /// processes whatever commands and events that produced. Handles both
    /// link-layer supervisory frames and AXDP-carrying I-frames; the
    /// session itself doesn't know the difference.
    async fn route_session_frame(&mut self, sf: SessionFrame) {
        let Some(key) = self.ensure_peer(&sf.from) else { return };
        let peer = sf.from.clone();
        if let Some(entry) = self.peers.get_mut(&key) {
            entry.session.on_frame(sf.class, sf.info);
        }
        self.after_session_mutation(&key, &peer).await;
    }

    /// Shared tail of every call that mutates a `Session`: dispatch its
    /// queued commands, then react to whatever events it raised.
    async fn after_session_mutation(&mut self, key: &StationKey, peer: &str) {
        let events = match self.peers.get_mut(key) {
            Some(entry) => entry.session.drain_events(),
            None => return,
        };
        self.dispatch_session_commands(key, peer);
        for event in events {
            self.handle_session_event(key, peer, event).await;
        }
    }

    async fn handle_session_event(&mut self, key: &StationKey, peer: &str, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                let _ = self.events.send(EngineEvent::SessionStateChanged {
                    peer: peer.to_string(),
                    state: SessionState::Connected,
                });
                let caps = self.local_caps();
                let ping = self.peers.get_mut(key).map(|entry| entry.axdp.on_connected(caps));
                if let Some(ping) = ping {
                    match ping.encode() {
                        Ok(encoded) => {
                            if let Some(entry) = self.peers.get_mut(key) {
                                entry.session.send_info(encoded);
                            }
                        }
                        Err(e) => warn!(peer, error = %e, "failed to encode axdp ping"),
                    }
                }
                self.dispatch_session_commands(key, peer);
            }
            SessionEvent::ConnectFailed(reason) => {
                let _ = self.events.send(EngineEvent::Error(format!("connect to {peer} failed: {reason}")));
                let _ = self.events.send(EngineEvent::SessionStateChanged {
                    peer: peer.to_string(),
                    state: SessionState::Disconnected,
                });
            }
            SessionEvent::Closed(reason) => {
                debug!(peer, reason, "ax25 session closed");
                let _ = self.events.send(EngineEvent::SessionStateChanged {
                    peer: peer.to_string(),
                    state: SessionState::Disconnected,
                });
            }
            SessionEvent::LinkFailure(err) => {
                let _ = self.events.send(EngineEvent::Error(format!("session with {peer}: {err}")));
                let _ = self.events.send(EngineEvent::SessionStateChanged {
                    peer: peer.to_string(),
                    state: SessionState::Disconnected,
                });
            }
            SessionEvent::Delivered(bytes) => self.handle_session_delivery(key, peer, bytes).await,
        }
    }

    /// Decodes one reassembled connected-mode payload as an AXDP PDU and
    /// routes it into the peer's `AxdpSession`; this is the call `on_message`
    /// previously had no production caller for.
    async fn handle_session_delivery(&mut self, key: &StationKey, peer: &str, bytes: Vec<u8>) {
        let msg = match AxdpMessage::decode(&bytes) {
            Ok(Some((msg, _))) => msg,
            Ok(None) => {
                debug!(peer, "incomplete axdp pdu delivered by session");
                return;
            }
            Err(e) => {
                warn!(peer, error = %e, "failed to decode axdp pdu");
                return;
            }
        };
        let local_caps = self.local_caps();
        let policy = policy_for(&self.config, peer);
        let Some(outcome) = self
            .peers
            .get_mut(key)
            .map(|entry| entry.axdp.on_message(msg, local_caps, policy))
        else {
            return;
        };

        for event in outcome.events {
            self.handle_axdp_event(key, peer, event, policy);
        }
        for outbound in outcome.outbound {
            match outbound.encode() {
                Ok(encoded) => {
                    if let Some(entry) = self.peers.get_mut(key) {
                        entry.session.send_info(encoded);
                    }
                }
                Err(e) => warn!(peer, error = %e, "failed to encode outbound axdp pdu"),
            }
        }
        self.dispatch_session_commands(key, peer);
    }

    fn handle_axdp_event(&mut self, key: &StationKey, peer: &str, event: AxdpEvent, policy: PeerFilePolicy) {
        match event {
            AxdpEvent::CapabilityConfirmed(caps) => {
                self.capabilities.confirm(key.clone(), caps);
            }
            AxdpEvent::ChatDelivered(text) => {
                let _ = self.events.send(EngineEvent::ChatReceived { peer: peer.to_string(), text });
            }
            AxdpEvent::FileOffered(offer) => {
                if matches!(policy, PeerFilePolicy::Ask) {
                    if let Some(entry) = self.peers.get_mut(key) {
                        entry.pending_offers.insert(offer.transfer_id, offer.clone());
                    }
                }
                let _ = self.events.send(EngineEvent::FileOffered {
                    peer: peer.to_string(),
                    transfer_id: offer.transfer_id,
                    file_name: offer.file_name,
                    file_size: offer.file_size,
                });
            }
            AxdpEvent::FileAccepted { transfer_id } => {
                let _ = self.events.send(EngineEvent::FileAccepted { peer: peer.to_string(), transfer_id });
            }
            AxdpEvent::FileDeclined { transfer_id, reason } => {
                let _ = self.events.send(EngineEvent::FileDeclined { peer: peer.to_string(), transfer_id, reason });
            }
            AxdpEvent::FileProgress { transfer_id, received, total } => {
                let _ = self
                    .events
                    .send(EngineEvent::FileProgress { peer: peer.to_string(), transfer_id, received, total });
            }
            AxdpEvent::FileCompleted { transfer_id, data } => {
                let _ = self.events.send(EngineEvent::FileCompleted { peer: peer.to_string(), transfer_id, data });
            }
            AxdpEvent::FileFailed { transfer_id, reason } => {
                let _ = self.events.send(EngineEvent::FileFailed { peer: peer.to_string(), transfer_id, reason });
            }
            AxdpEvent::FileCancelled { transfer_id } => {
                let _ = self.events.send(EngineEvent::FileCancelled { peer: peer.to_string(), transfer_id });
            }
        }
    }

    fn local_caps(&self) -> CapabilityBlock {
        CapabilityBlock {
            proto_min: axterm_proto::axdp::PROTO_VERSION,
            proto_max: axterm_proto::axdp::PROTO_VERSION,
            features: axterm_proto::axdp::Features::empty(),
        }
    }

    fn send_file(&mut self, peer: &str, file_name: String, data: Vec<u8>, compression_override: Option<axterm_proto::axdp::CompressionAlgo>) {
        let Some(key) = self.ensure_peer(peer) else {
            let _ = self.events.send(EngineEvent::Error("my_callsign not configured".into()));
            return;
        };
        if !self.capabilities.is_capable(&key) {
            debug!(peer, "sending file to peer with no confirmed AXDP capability");
        }
        let transfer_id = now_ms() as u64;
        let sample: Vec<u8> = data.iter().take(4096).copied().collect();
        let Some(entry) = self.peers.get_mut(&key) else { return };
        match entry.axdp.start_transfer(
            transfer_id,
            file_name,
            &data,
            &sample,
            compression_override,
            self.config.default_compression.algorithm,
        ) {
            Ok(msg) => {
                info!(peer, transfer_id, "file transfer offered");
                match msg.encode() {
                    Ok(encoded) => {
                        entry.session.send_info(encoded);
                    }
                    Err(e) => {
                        let _ = self.events.send(EngineEvent::Error(e.to_string()));
                    }
                }
            }
            Err(e) => {
                let _ = self.events.send(EngineEvent::Error(e.to_string()));
            }
        }
        self.dispatch_session_commands(&key, peer);
    }

    fn handle_transfer_command(&mut self, cmd: EngineCommand) {
        let (peer, transfer_id) = match &cmd {
            EngineCommand::AcceptIncoming { peer, transfer_id } => (peer.clone(), *transfer_id),
            EngineCommand::DeclineIncoming { peer, transfer_id, .. } => (peer.clone(), *transfer_id),
            EngineCommand::PauseTransfer { peer, transfer_id } => (peer.clone(), *transfer_id),
            EngineCommand::ResumeTransfer { peer, transfer_id } => (peer.clone(), *transfer_id),
            EngineCommand::CancelTransfer { peer, transfer_id } => (peer.clone(), *transfer_id),
            _ => return,
        };
        let key = Self::peer_key(&peer);
        let Some(entry) = self.peers.get_mut(&key) else {
            let _ = self.events.send(EngineEvent::Error(EngineError::UnknownTransfer(transfer_id).to_string()));
            return;
        };
        let mut outbound = Vec::new();
        match cmd {
            EngineCommand::PauseTransfer { .. } => outbound.extend(entry.axdp.pause_transfer(transfer_id)),
            EngineCommand::ResumeTransfer { .. } => outbound.extend(entry.axdp.resume_transfer(transfer_id)),
            EngineCommand::CancelTransfer { .. } => outbound.extend(entry.axdp.cancel_transfer(transfer_id)),
            EngineCommand::DeclineIncoming { reason, .. } => {
                entry.pending_offers.remove(&transfer_id);
                outbound.push(entry.axdp.decline_offer(transfer_id, reason));
            }
            EngineCommand::AcceptIncoming { .. } => match entry.pending_offers.remove(&transfer_id) {
                Some(offer) => outbound.push(entry.axdp.accept_offer(offer)),
                None => {
                    let _ = self
                        .events
                        .send(EngineEvent::Error(EngineError::UnknownTransfer(transfer_id).to_string()));
                }
            },
            _ => {}
        }
        for msg in outbound {
            match msg.encode() {
                Ok(encoded) => {
                    entry.session.send_info(encoded);
                }
                Err(e) => {
                    let _ = self.events.send(EngineEvent::Error(e.to_string()));
                }
            }
        }
        self.dispatch_session_commands(&key, &peer);
    }

    // ---- link events --------------------------------------------------------

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => {
                let _ = self.events.send(EngineEvent::LinkStateChanged(state.clone()));
                if matches!(state, LinkState::Failed(_)) {
                    self.maybe_reconnect();
                }
            }
            LinkEvent::Data(bytes) => self.ingest_bytes(bytes).await,
            LinkEvent::Telemetry(_) => {}
        }
    }

    fn maybe_reconnect(&mut self) {
        if let Some(settings) = self.link_settings.clone() {
            if settings.auto_reconnect() {
                self.connect(settings);
            }
        }
    }

    async fn ingest_bytes(&mut self, bytes: Vec<u8>) {
        let now = now_ms();
        let endpoint = self
            .link_settings
            .as_ref()
            .map(|s| format!("{:?}", s.kind))
            .unwrap_or_else(|| "unknown".to_string());

        let my_callsign = self.build_my_address().map(|a| a.display());

        let outcome = self.intake.feed(
            &bytes,
            now,
            &endpoint,
            &mut self.stations,
            &mut self.netrom,
            &mut self.buffer,
            &self.watch_rules,
            my_callsign.as_deref(),
        );

        for packet in outcome.packets {
            let _ = self.events.send(EngineEvent::PacketReceived(packet.clone()));
            self.last_packet_id += 1;
            if self.config.retention.persist_history {
                let stored = StoredPacket {
                    id: None,
                    timestamp: packet.timestamp,
                    from: packet.from.clone(),
                    to: packet.to.clone(),
                    via: packet.via.clone(),
                    frame_type: packet.frame_type.clone(),
                    control: packet.control,
                    pid: packet.pid,
                    info: packet.info.clone(),
                    raw: packet.raw.clone(),
                    endpoint: packet.endpoint.clone(),
                    pinned: packet.pinned,
                };
                if let Err(e) = self
                    .store
                    .save_packet(stored, Some(self.config.retention.packet_retention))
                    .await
                {
                    warn!(error = %e, "failed to persist packet");
                }
            }
        }
        for hit in outcome.watch_hits {
            let _ = self.events.send(EngineEvent::WatchHit(hit));
        }
        let _ = self.events.send(EngineEvent::StationsUpdated(self.stations.snapshot()));

        for session_frame in outcome.session_frames {
            self.route_session_frame(session_frame).await;
        }
    }

    // ---- NET/ROM snapshotting ------------------------------------------------

    async fn restore_netrom(&mut self) {
        match self.store.load_netrom_snapshot().await {
            Ok(Some(snapshot)) => {
                self.last_packet_id = snapshot.last_packet_id;
                self.netrom.load_snapshot(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to restore netrom snapshot"),
        }
    }

    async fn maybe_snapshot_netrom(&mut self) {
        let now = now_ms();
        if !self.netrom.should_snapshot(now) {
            return;
        }
        let snapshot = self.netrom.snapshot(self.last_packet_id, self.config_hash, now);
        if let Err(e) = self.store.save_netrom_snapshot(snapshot.clone()).await {
            warn!(error = %e, "failed to persist netrom snapshot");
        }
        if let Err(e) = self
            .store
            .prune_netrom(self.config.retention.route_retention_days, now)
            .await
        {
            warn!(error = %e, "failed to prune netrom history");
        }
        let _ = self.events.send(EngineEvent::NetromSnapshotReady(snapshot));
    }
}

/// Looks up (or establishes as `Ask`) the incoming-transfer policy for a
/// peer, per the engine's permission table.
pub fn policy_for(config: &EngineConfig, peer: &str) -> PeerFilePolicy {
    config.policy_for(peer)
}
