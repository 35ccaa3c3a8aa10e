use crate::packet::{Packet, PacketBuffer};
use crate::station::StationTracker;
use crate::watch::{self, WatchHit, WatchRule};
use axterm_netrom::{NetromTracker, ViaHop};
use axterm_proto::ax25::{Ax25Frame, FrameClass, Modulo, PID_NO_LAYER3};
use axterm_proto::axdp::MAGIC as AXDP_MAGIC;
use axterm_proto::kiss::{KissFrame, KissParser, OPCODE_SET_HARDWARE};
use tracing::{debug, warn};

/// One decoded frame addressed to the local callsign, handed to the engine
/// for link-layer session and AXDP routing (data-flow items (d) and (e)).
/// Unlike [`Packet`], this is never itself persisted or broadcast — it's an
/// internal routing payload, not a record.
#[derive(Debug, Clone)]
pub struct SessionFrame {
    pub from: String,
    pub to: String,
    pub via: Vec<String>,
    pub class: FrameClass,
    pub info: Vec<u8>,
}

/// What one intake pass produced, for the caller (the engine's run loop) to
/// broadcast and optionally persist. Kept separate from persistence so this
/// module stays synchronous and independently testable.
#[derive(Debug, Default)]
pub struct IntakeOutcome {
    pub packets: Vec<Packet>,
    pub watch_hits: Vec<WatchHit>,
    pub session_frames: Vec<SessionFrame>,
}

/// Owns the KISS parser state for one link; the engine holds one per active
/// transport connection.
pub struct Intake {
    kiss: KissParser,
    modulo: Modulo,
}

impl Intake {
    pub fn new(modulo: Modulo) -> Self {
        Self {
            kiss: KissParser::new(),
            modulo,
        }
    }

    /// Runs the packet intake pipeline over one chunk of raw bytes from a
    /// transport: KISS de-framing, AX.25 decode, station and NET/ROM
    /// tracking, duplicate flagging, buffer insertion, and watch matching.
    /// Mobilinkd telemetry subframes are classified but ignored here; the
    /// link layer already turns those into [`axterm_link::LinkEvent::Telemetry`].
    #[allow(clippy::too_many_arguments)]
    pub fn feed(
        &mut self,
        bytes: &[u8],
        now: i64,
        endpoint: &str,
        stations: &mut StationTracker,
        netrom: &mut NetromTracker,
        buffer: &mut PacketBuffer,
        watch_rules: &[WatchRule],
        my_callsign: Option<&str>,
    ) -> IntakeOutcome {
        let mut outcome = IntakeOutcome::default();
        let (frames, errors) = self.kiss.feed(bytes);
        for err in errors {
            debug!(?err, "kiss decode error");
        }
        for raw in frames {
            let classified = KissFrame::from(raw);
            let KissFrame::Ax25(payload) = classified else {
                if let KissFrame::Unknown { command, .. } = classified {
                    if command & 0x0F != OPCODE_SET_HARDWARE {
                        debug!(command, "unclassified kiss command");
                    }
                }
                continue;
            };

            let frame = match Ax25Frame::decode(&payload, self.modulo) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "ax25 decode failed");
                    continue;
                }
            };

            let from = frame.source.display();
            let to = frame.destination.display();
            let via: Vec<String> = frame.via.iter().map(|a| a.display()).collect();
            let (control, control2) = frame.control_bytes(self.modulo);
            let control = control as i64 | control2.map(|b| (b as i64) << 8).unwrap_or(0);

            stations.observe(&from, now, &via);

            let via_hops: Vec<ViaHop> = frame
                .via
                .iter()
                .map(|a| ViaHop {
                    call: a.display(),
                    repeated: a.h_bit(),
                })
                .collect();
            netrom.observe(now, &from, &to, &via_hops);

            let text = std::str::from_utf8(&frame.info).ok();
            let is_duplicate = text
                .map(|t| buffer.is_recent_duplicate(&from, &to, t, &via, now))
                .unwrap_or(false);

            let frame_type = frame_type_name(&frame);
            let is_axdp = frame.pid == Some(PID_NO_LAYER3) && frame.info.starts_with(&AXDP_MAGIC);
            let addressed_to_us = my_callsign
                .map(|call| to.eq_ignore_ascii_case(call))
                .unwrap_or(false);

            if addressed_to_us {
                outcome.session_frames.push(SessionFrame {
                    from: from.clone(),
                    to: to.clone(),
                    via: via.clone(),
                    class: frame.class,
                    info: frame.info.clone(),
                });
            }

            let packet = Packet {
                timestamp: now,
                from: from.clone(),
                to: to.clone(),
                via: via.clone(),
                frame_type,
                control,
                pid: frame.pid.map(|p| p as i64),
                info: frame.info,
                raw: payload,
                endpoint: endpoint.to_string(),
                pinned: false,
                is_duplicate,
                is_axdp,
            };

            buffer.push(packet.clone());
            outcome
                .watch_hits
                .extend(watch::match_packet(watch_rules, &from, &to, &via, text));

            // Own-session AXDP traffic is reassembled and delivered by the
            // AXDP layer instead; don't also echo the raw PDU as a console
            // line. Monitored third-party traffic is never suppressed.
            if !(is_axdp && addressed_to_us) {
                outcome.packets.push(packet);
            }
        }
        outcome
    }
}

fn frame_type_name(frame: &Ax25Frame) -> String {
    use axterm_proto::ax25::FrameClass;
    match &frame.class {
        FrameClass::I { .. } => "I".to_string(),
        FrameClass::S { kind, .. } => format!("S:{kind:?}"),
        FrameClass::U { kind, .. } => format!("U:{kind:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axterm_netrom::{NetromConfig, NetromTracker};
    use axterm_proto::ax25::{Ax25Address, Direction, FrameClass, OutboundFrame, UFrameKind};
    use axterm_proto::kiss;

    fn ui_frame_bytes() -> Vec<u8> {
        let dest = Ax25Address::new("APRS", 0).unwrap();
        let src = Ax25Address::new("N0CALL", 1).unwrap();
        let class = FrameClass::U { kind: UFrameKind::UI, pf: false };
        let frame = OutboundFrame::new(dest, src, Direction::Command, class)
            .info(b"hello".to_vec())
            .pid(axterm_proto::ax25::PID_NO_LAYER3)
            .build();
        let encoded = frame.encode(Modulo::Eight);
        kiss::encode_data(0, &encoded)
    }

    #[test]
    fn feed_decodes_and_tracks_a_ui_frame() {
        let mut intake = Intake::new(Modulo::Eight);
        let mut stations = StationTracker::new();
        let mut netrom = NetromTracker::new(NetromConfig::default());
        let mut buffer = PacketBuffer::new(10);
        let bytes = ui_frame_bytes();

        let outcome = intake.feed(&bytes, 1000, "tcp", &mut stations, &mut netrom, &mut buffer, &[], None);

        assert_eq!(outcome.packets.len(), 1);
        let packet = &outcome.packets[0];
        assert_eq!(packet.from, "N0CALL-1");
        assert_eq!(packet.to, "APRS");
        assert_eq!(packet.decoded_text(), Some("hello"));
        assert_eq!(stations.get("N0CALL-1").unwrap().heard_count, 1);
        assert_eq!(buffer.len(), 1);
    }

    fn axdp_i_frame_bytes(info: Vec<u8>) -> Vec<u8> {
        let dest = Ax25Address::new("K0EPI", 7).unwrap();
        let src = Ax25Address::new("N0CALL", 1).unwrap();
        let class = FrameClass::I { ns: 0, nr: 0, p: false };
        let frame = OutboundFrame::new(dest, src, Direction::Command, class)
            .info(info)
            .pid(axterm_proto::ax25::PID_NO_LAYER3)
            .build();
        let encoded = frame.encode(Modulo::Eight);
        kiss::encode_data(0, &encoded)
    }

    #[test]
    fn own_session_axdp_frame_is_suppressed_and_routed() {
        let mut intake = Intake::new(Modulo::Eight);
        let mut stations = StationTracker::new();
        let mut netrom = NetromTracker::new(NetromConfig::default());
        let mut buffer = PacketBuffer::new(10);
        let mut info = b"AXDP".to_vec();
        info.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0]);
        let bytes = axdp_i_frame_bytes(info);

        let outcome = intake.feed(
            &bytes,
            1000,
            "tcp",
            &mut stations,
            &mut netrom,
            &mut buffer,
            &[],
            Some("K0EPI-7"),
        );

        assert!(outcome.packets.is_empty(), "axdp pdu should not surface as a console line");
        assert_eq!(outcome.session_frames.len(), 1);
        assert_eq!(outcome.session_frames[0].from, "N0CALL-1");
        assert_eq!(buffer.len(), 1, "the raw frame is still kept in history");
    }

    #[test]
    fn third_party_axdp_traffic_is_not_suppressed() {
        let mut intake = Intake::new(Modulo::Eight);
        let mut stations = StationTracker::new();
        let mut netrom = NetromTracker::new(NetromConfig::default());
        let mut buffer = PacketBuffer::new(10);
        let mut info = b"AXDP".to_vec();
        info.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0]);
        let bytes = axdp_i_frame_bytes(info);

        let outcome = intake.feed(
            &bytes,
            1000,
            "tcp",
            &mut stations,
            &mut netrom,
            &mut buffer,
            &[],
            Some("W1AW"),
        );

        assert_eq!(outcome.packets.len(), 1);
        assert!(outcome.session_frames.is_empty());
    }
}
