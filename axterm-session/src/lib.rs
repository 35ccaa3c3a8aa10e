//! The per-peer connected-mode AX.25 state machine: one instance per
//! `(local, remote, path)` triple, implementing SABM/SABME/UA/DM/DISC/RR/
//! RNR/REJ/I per the abridged transition table of the specification this
//! engine follows.

pub mod error;
pub mod rtt;

pub use error::SessionError;
pub use rtt::RttEstimator;

use axterm_proto::ax25::{Ax25Address, FrameClass, Modulo, SFrameKind, UFrameKind};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// T2: minimum delay before sending a standalone RR in response to an
/// I-frame, so a piggyback ack on our own next I-frame can subsume it.
pub const T2_MIN: Duration = Duration::from_millis(250);
/// T3: idle-link probe interval, must exceed `T1_MAX`.
pub const T3_IDLE: Duration = Duration::from_secs(180);
pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const MODULO8_WINDOW: u8 = 7;
pub const MODULO128_WINDOW: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub local: Ax25Address,
    pub remote: Ax25Address,
    pub path: SmallVec<[Ax25Address; 8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    T1,
    T2,
    T3,
}

/// An instruction the session wants its host (the engine) to carry out.
/// The session never sends bytes or arms timers itself; it only emits
/// intent, matching the "engine-scheduled one-shot timers" design.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SendFrame { class: FrameClass, info: Vec<u8> },
    StartTimer { kind: TimerKind, duration: Duration },
    CancelTimer { kind: TimerKind },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    ConnectFailed(String),
    Delivered(Vec<u8>),
    Closed(String),
    LinkFailure(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    AwaitingConnect,
    Connected,
    AwaitingRelease,
    AwaitingReconnect,
}

#[derive(Debug, Clone)]
struct PendingIFrame {
    ns: u8,
    info: Vec<u8>,
    sent_at: Instant,
}

/// The full mutable state of one connected-mode session.
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    modulus: Modulo,
    window: u8,
    max_retries: u32,
    retries: u32,
    rtt: RttEstimator,

    vs: u8,
    va: u8,
    vr: u8,
    outstanding: VecDeque<PendingIFrame>,
    rejected_gap: bool,
    t1_running: bool,
    t3_running: bool,

    commands: VecDeque<SessionCommand>,
    events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            state: SessionState::Disconnected,
            modulus: Modulo::Eight,
            window: MODULO8_WINDOW,
            max_retries: DEFAULT_MAX_RETRIES,
            retries: 0,
            rtt: RttEstimator::new(),
            vs: 0,
            va: 0,
            vr: 0,
            outstanding: VecDeque::new(),
            rejected_gap: false,
            t1_running: false,
            t3_running: false,
            commands: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn with_modulus(mut self, modulus: Modulo) -> Self {
        self.window = match modulus {
            Modulo::Eight => MODULO8_WINDOW,
            Modulo::Extended => MODULO128_WINDOW,
        };
        self.modulus = modulus;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn drain_commands(&mut self) -> Vec<SessionCommand> {
        self.commands.drain(..).collect()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    fn seq_modulus(&self) -> u8 {
        match self.modulus {
            Modulo::Eight => 8,
            Modulo::Extended => 128,
        }
    }

    fn send(&mut self, class: FrameClass, info: Vec<u8>) {
        self.commands.push_back(SessionCommand::SendFrame { class, info });
    }

    fn start_timer(&mut self, kind: TimerKind, duration: Duration) {
        self.commands.push_back(SessionCommand::StartTimer { kind, duration });
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        self.commands.push_back(SessionCommand::CancelTimer { kind });
    }

    fn cancel_all_timers(&mut self) {
        self.cancel_timer(TimerKind::T1);
        self.cancel_timer(TimerKind::T2);
        self.cancel_timer(TimerKind::T3);
        self.t1_running = false;
        self.t3_running = false;
    }

    // ---- user actions ----------------------------------------------------

    /// `Disconnected -> AwaitingConnect`: send SABM(E), start T1.
    pub fn connect(&mut self) {
        if self.state != SessionState::Disconnected
            && self.state != SessionState::AwaitingReconnect
        {
            return;
        }
        self.retries = 0;
        let kind = match self.modulus {
            Modulo::Eight => UFrameKind::SABM,
            Modulo::Extended => UFrameKind::SABME,
        };
        self.send(FrameClass::U { kind, pf: true }, Vec::new());
        self.start_timer(TimerKind::T1, self.rtt.t1());
        self.t1_running = true;
        self.state = SessionState::AwaitingConnect;
    }

    /// `Connected -> AwaitingRelease`: send DISC, wait for UA.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        self.cancel_all_timers();
        self.send(FrameClass::U { kind: UFrameKind::DISC, pf: true }, Vec::new());
        self.start_timer(TimerKind::T1, self.rtt.t1());
        self.t1_running = true;
        self.retries = 0;
        self.state = SessionState::AwaitingRelease;
    }

    /// `Connected, window not full -> Connected`: build I(V(S),V(R)),
    /// enqueue, transmit, V(S)++, start T1 if not already running.
    pub fn send_info(&mut self, info: Vec<u8>) -> bool {
        if self.state != SessionState::Connected {
            return false;
        }
        if self.outstanding.len() >= self.window as usize {
            return false;
        }
        let ns = self.vs;
        self.send(
            FrameClass::I {
                ns,
                nr: self.vr,
                p: false,
            },
            info.clone(),
        );
        self.outstanding.push_back(PendingIFrame {
            ns,
            info,
            sent_at: Instant::now(),
        });
        self.vs = (self.vs + 1) % self.seq_modulus();
        if !self.t1_running {
            self.start_timer(TimerKind::T1, self.rtt.t1());
            self.t1_running = true;
        }
        true
    }

    pub fn window_available(&self) -> usize {
        (self.window as usize).saturating_sub(self.outstanding.len())
    }

    // ---- inbound frames ----------------------------------------------------

    pub fn on_frame(&mut self, class: FrameClass, info: Vec<u8>) {
        match self.state {
            SessionState::AwaitingConnect => self.on_frame_awaiting_connect(class),
            SessionState::Connected => self.on_frame_connected(class, info),
            SessionState::AwaitingRelease => self.on_frame_awaiting_release(class),
            SessionState::Disconnected | SessionState::AwaitingReconnect => {}
        }
    }

    fn on_frame_awaiting_connect(&mut self, class: FrameClass) {
        match class {
            FrameClass::U { kind: UFrameKind::UA, .. } => {
                self.cancel_all_timers();
                self.retries = 0;
                self.vs = 0;
                self.va = 0;
                self.vr = 0;
                self.outstanding.clear();
                self.start_timer(TimerKind::T3, T3_IDLE);
                self.t3_running = true;
                self.state = SessionState::Connected;
                info!(remote = ?self.key.remote, "ax25 session connected");
                self.events.push_back(SessionEvent::Connected);
            }
            FrameClass::U { kind: UFrameKind::DM, .. } => {
                self.cancel_all_timers();
                self.state = SessionState::Disconnected;
                self.events
                    .push_back(SessionEvent::ConnectFailed("peer refused (DM)".into()));
            }
            _ => {}
        }
    }

    fn on_frame_connected(&mut self, class: FrameClass, info: Vec<u8>) {
        match class {
            FrameClass::I { ns, nr, p } => {
                if ns == self.vr {
                    self.vr = (self.vr + 1) % self.seq_modulus();
                    self.rejected_gap = false;
                    self.events.push_back(SessionEvent::Delivered(info));
                    if p {
                        self.send(
                            FrameClass::S {
                                kind: SFrameKind::RR,
                                nr: self.vr,
                                pf: true,
                            },
                            Vec::new(),
                        );
                    } else {
                        self.start_timer(TimerKind::T2, T2_MIN);
                    }
                } else if !self.rejected_gap {
                    self.send(
                        FrameClass::S {
                            kind: SFrameKind::REJ,
                            nr: self.vr,
                            pf: false,
                        },
                        Vec::new(),
                    );
                    self.rejected_gap = true;
                }
                self.process_ack(nr);
            }
            FrameClass::S { kind: SFrameKind::RR, nr, .. }
            | FrameClass::S { kind: SFrameKind::RNR, nr, .. } => {
                self.process_ack(nr);
            }
            FrameClass::S { kind: SFrameKind::REJ, nr, .. }
            | FrameClass::S { kind: SFrameKind::SREJ, nr, .. } => {
                self.process_ack(nr);
                self.retransmit_from(nr);
            }
            FrameClass::U { kind: UFrameKind::DISC, .. } => {
                self.cancel_all_timers();
                self.send(FrameClass::U { kind: UFrameKind::UA, pf: true }, Vec::new());
                self.state = SessionState::Disconnected;
                self.events
                    .push_back(SessionEvent::Closed("peer disconnected".into()));
            }
            _ => {}
        }
    }

    fn on_frame_awaiting_release(&mut self, class: FrameClass) {
        if let FrameClass::U { kind: UFrameKind::UA, .. } = class {
            self.cancel_all_timers();
            self.state = SessionState::Disconnected;
            self.events.push_back(SessionEvent::Closed("released".into()));
        }
    }

    /// Frees all outstanding I-frames with `ns < nr (mod)` and updates
    /// `V(A)`.
    fn process_ack(&mut self, nr: u8) {
        let modulus = self.seq_modulus();
        while let Some(front) = self.outstanding.front() {
            // ns is "acked" if it lies in [V(A), nr) modulo the sequence space.
            let distance = (nr as i16 - front.ns as i16).rem_euclid(modulus as i16);
            let va_distance = (nr as i16 - self.va as i16).rem_euclid(modulus as i16);
            if distance > 0 && distance <= va_distance {
                if let Some(sent) = self.outstanding.pop_front() {
                    self.rtt.update(sent.sent_at.elapsed());
                }
            } else {
                break;
            }
        }
        self.va = nr;
        if self.outstanding.is_empty() {
            self.cancel_timer(TimerKind::T1);
            self.t1_running = false;
        } else {
            self.cancel_timer(TimerKind::T1);
            self.start_timer(TimerKind::T1, self.rtt.t1());
        }
    }

    /// Go-Back-N retransmission: `outstanding` holds only unacked frames in
    /// sequence order, so a REJ/SREJ or T1 expiry just means resend all of
    /// them; `from_ns` is unused beyond documenting the triggering N(R).
    fn retransmit_from(&mut self, _from_ns: u8) {
        let frames: Vec<(u8, Vec<u8>)> = self
            .outstanding
            .iter()
            .map(|f| (f.ns, f.info.clone()))
            .collect();
        for (ns, info) in frames {
            self.send(
                FrameClass::I {
                    ns,
                    nr: self.vr,
                    p: false,
                },
                info,
            );
        }
    }

    // ---- timer expiry ------------------------------------------------------

    pub fn on_t1_expiry(&mut self) {
        match self.state {
            SessionState::AwaitingConnect => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    let kind = match self.modulus {
                        Modulo::Eight => UFrameKind::SABM,
                        Modulo::Extended => UFrameKind::SABME,
                    };
                    self.send(FrameClass::U { kind, pf: true }, Vec::new());
                    self.start_timer(TimerKind::T1, self.rtt.t1_with_backoff(self.retries));
                } else {
                    self.cancel_all_timers();
                    self.state = SessionState::Disconnected;
                    let rto = self.rtt.t1();
                    warn!(retries = self.retries, ?rto, "ax25 connect retries exhausted");
                    self.events.push_back(SessionEvent::ConnectFailed(format!(
                        "no response after {} tries, RTO {:.1}s",
                        self.retries,
                        rto.as_secs_f32()
                    )));
                }
            }
            SessionState::Connected => {
                if self.outstanding.is_empty() {
                    return;
                }
                if self.retries < self.max_retries {
                    self.retries += 1;
                    let earliest = self.outstanding.front().map(|f| f.ns);
                    if let Some(ns) = earliest {
                        self.retransmit_from(ns);
                    }
                    self.start_timer(TimerKind::T1, self.rtt.t1_with_backoff(self.retries));
                } else {
                    let rto = self.rtt.t1();
                    self.send(FrameClass::U { kind: UFrameKind::DM, pf: true }, Vec::new());
                    self.cancel_all_timers();
                    self.state = SessionState::Disconnected;
                    self.events.push_back(SessionEvent::LinkFailure(
                        SessionError::RetriesExhausted {
                            retries: self.retries,
                            rto,
                        },
                    ));
                }
            }
            SessionState::AwaitingRelease => {
                if self.retries < self.max_retries {
                    self.retries += 1;
                    self.send(FrameClass::U { kind: UFrameKind::DISC, pf: true }, Vec::new());
                    self.start_timer(TimerKind::T1, self.rtt.t1_with_backoff(self.retries));
                } else {
                    self.cancel_all_timers();
                    self.state = SessionState::Disconnected;
                    self.events
                        .push_back(SessionEvent::Closed("release timed out".into()));
                }
            }
            SessionState::Disconnected | SessionState::AwaitingReconnect => {}
        }
    }

    pub fn on_t2_expiry(&mut self) {
        if self.state == SessionState::Connected {
            self.send(
                FrameClass::S {
                    kind: SFrameKind::RR,
                    nr: self.vr,
                    pf: false,
                },
                Vec::new(),
            );
        }
    }

    pub fn on_t3_expiry(&mut self) {
        if self.state == SessionState::Connected {
            debug!(remote = ?self.key.remote, "ax25 t3 idle probe");
            self.send(
                FrameClass::S {
                    kind: SFrameKind::RR,
                    nr: self.vr,
                    pf: true,
                },
                Vec::new(),
            );
            self.start_timer(TimerKind::T3, T3_IDLE);
        }
    }

    pub fn vs(&self) -> u8 {
        self.vs
    }
    pub fn va(&self) -> u8 {
        self.va
    }
    pub fn vr(&self) -> u8 {
        self.vr
    }
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axterm_proto::ax25::Ax25Address;

    fn key() -> SessionKey {
        SessionKey {
            local: Ax25Address::new("K0EPI", 7).unwrap(),
            remote: Ax25Address::new("N0CALL", 1).unwrap(),
            path: SmallVec::new(),
        }
    }

    #[test]
    fn connect_sends_sabm_and_starts_t1() {
        let mut session = Session::new(key());
        session.connect();
        let commands = session.drain_commands();
        assert!(matches!(
            commands[0],
            SessionCommand::SendFrame {
                class: FrameClass::U { kind: UFrameKind::SABM, pf: true },
                ..
            }
        ));
        assert!(matches!(
            commands[1],
            SessionCommand::StartTimer { kind: TimerKind::T1, .. }
        ));
        assert_eq!(session.state, SessionState::AwaitingConnect);
    }

    #[test]
    fn ua_completes_handshake() {
        let mut session = Session::new(key());
        session.connect();
        session.drain_commands();
        session.on_frame(FrameClass::U { kind: UFrameKind::UA, pf: true }, vec![]);
        assert_eq!(session.state, SessionState::Connected);
        assert_eq!(session.vs(), 0);
        assert_eq!(session.va(), 0);
        assert_eq!(session.vr(), 0);
        assert_eq!(session.drain_events(), vec![SessionEvent::Connected]);
    }

    #[test]
    fn retries_exhausted_notifies_failure() {
        let mut session = Session::new(key()).with_max_retries(2);
        session.connect();
        session.drain_commands();
        session.on_t1_expiry();
        session.on_t1_expiry();
        session.on_t1_expiry();
        assert_eq!(session.state, SessionState::Disconnected);
        let events = session.drain_events();
        assert!(matches!(events[0], SessionEvent::ConnectFailed(_)));
    }

    #[test]
    fn full_window_and_ack_clears_queue() {
        let mut session = Session::new(key());
        session.connect();
        session.drain_commands();
        session.on_frame(FrameClass::U { kind: UFrameKind::UA, pf: true }, vec![]);
        session.drain_events();
        session.drain_commands();

        for i in 0..7u8 {
            assert!(session.send_info(vec![i]));
        }
        assert_eq!(session.outstanding_len(), 7);
        assert!(!session.send_info(vec![99]), "window should be full");

        session.on_frame(
            FrameClass::S {
                kind: SFrameKind::RR,
                nr: 7,
                pf: false,
            },
            vec![],
        );
        assert_eq!(session.va(), session.vs());
        assert_eq!(session.outstanding_len(), 0);
    }

    #[test]
    fn out_of_order_i_frame_emits_single_reject() {
        let mut session = Session::new(key());
        session.connect();
        session.drain_commands();
        session.on_frame(FrameClass::U { kind: UFrameKind::UA, pf: true }, vec![]);
        session.drain_events();
        session.drain_commands();

        session.on_frame(
            FrameClass::I { ns: 1, nr: 0, p: false },
            b"out of order".to_vec(),
        );
        let commands = session.drain_commands();
        let rejects: Vec<_> = commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    SessionCommand::SendFrame {
                        class: FrameClass::S { kind: SFrameKind::REJ, .. },
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(rejects.len(), 1);

        // Repeating the same gap must not emit a second REJ.
        session.on_frame(
            FrameClass::I { ns: 1, nr: 0, p: false },
            b"still out of order".to_vec(),
        );
        let commands = session.drain_commands();
        assert!(commands.iter().all(|c| !matches!(
            c,
            SessionCommand::SendFrame {
                class: FrameClass::S { kind: SFrameKind::REJ, .. },
                ..
            }
        )));

        // Filling the gap advances V(R) and clears the flag.
        session.on_frame(FrameClass::I { ns: 0, nr: 0, p: false }, b"fill".to_vec());
        assert_eq!(session.vr(), 1);
    }
}
