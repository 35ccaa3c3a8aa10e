use super::address::Ax25Address;
use crate::error::DecodeError;
use smallvec::SmallVec;

/// No-layer-3 PID value; AXDP tunnels through frames carrying this.
pub const PID_NO_LAYER3: u8 = 0xF0;

/// Sequence-number modulus. Modulo-8 is the default; modulo-128 ("extended
/// mode") is negotiated per-session via SABME/UA and must be supplied by the
/// caller — the wire format alone does not disambiguate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulo {
    Eight,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SFrameKind {
    RR,
    RNR,
    REJ,
    SREJ,
}

impl SFrameKind {
    fn ss_bits(self) -> u8 {
        match self {
            SFrameKind::RR => 0,
            SFrameKind::RNR => 1,
            SFrameKind::REJ => 2,
            SFrameKind::SREJ => 3,
        }
    }

    fn from_ss_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => SFrameKind::RR,
            1 => SFrameKind::RNR,
            2 => SFrameKind::REJ,
            _ => SFrameKind::SREJ,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFrameKind {
    SABM,
    SABME,
    UA,
    DM,
    DISC,
    UI,
    FRMR,
}

const U_SABM: u8 = 0x2F;
const U_SABME: u8 = 0x6F;
const U_UA: u8 = 0x63;
const U_DM: u8 = 0x0F;
const U_DISC: u8 = 0x43;
const U_UI: u8 = 0x03;
const U_FRMR: u8 = 0x87;
const U_PF_BIT: u8 = 0x10;

impl UFrameKind {
    fn base_byte(self) -> u8 {
        match self {
            UFrameKind::SABM => U_SABM,
            UFrameKind::SABME => U_SABME,
            UFrameKind::UA => U_UA,
            UFrameKind::DM => U_DM,
            UFrameKind::DISC => U_DISC,
            UFrameKind::UI => U_UI,
            UFrameKind::FRMR => U_FRMR,
        }
    }

    fn from_base_byte(base: u8) -> Option<Self> {
        match base {
            U_SABM => Some(UFrameKind::SABM),
            U_SABME => Some(UFrameKind::SABME),
            U_UA => Some(UFrameKind::UA),
            U_DM => Some(UFrameKind::DM),
            U_DISC => Some(UFrameKind::DISC),
            U_UI => Some(UFrameKind::UI),
            U_FRMR => Some(UFrameKind::FRMR),
            _ => None,
        }
    }
}

/// The decoded semantics of a frame's control field(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    I { ns: u8, nr: u8, p: bool },
    S { kind: SFrameKind, nr: u8, pf: bool },
    U { kind: UFrameKind, pf: bool },
}

impl FrameClass {
    pub fn is_information(&self) -> bool {
        matches!(self, FrameClass::I { .. })
    }

    pub fn is_supervisory(&self) -> bool {
        matches!(self, FrameClass::S { .. })
    }

    pub fn is_unnumbered(&self) -> bool {
        matches!(self, FrameClass::U { .. })
    }

    /// Carries a PID byte iff the frame is an I or UI frame.
    pub fn carries_pid(&self) -> bool {
        matches!(self, FrameClass::I { .. })
            || matches!(self, FrameClass::U { kind: UFrameKind::UI, .. })
    }

    /// Encodes the control field(s) for `modulo`. U frames are always a
    /// single byte regardless of modulus.
    pub fn encode(&self, modulo: Modulo) -> SmallVec<[u8; 2]> {
        let mut out = SmallVec::new();
        match (*self, modulo) {
            (FrameClass::I { ns, nr, p }, Modulo::Eight) => {
                out.push((nr << 5) | ((p as u8) << 4) | (ns << 1));
            }
            (FrameClass::I { ns, nr, p }, Modulo::Extended) => {
                out.push(ns << 1);
                out.push((nr << 1) | (p as u8));
            }
            (FrameClass::S { kind, nr, pf }, Modulo::Eight) => {
                out.push((nr << 5) | ((pf as u8) << 4) | (kind.ss_bits() << 2) | 0b01);
            }
            (FrameClass::S { kind, nr, pf }, Modulo::Extended) => {
                out.push((kind.ss_bits() << 2) | 0b01);
                out.push((nr << 1) | (pf as u8));
            }
            (FrameClass::U { kind, pf }, _) => {
                out.push(kind.base_byte() | if pf { U_PF_BIT } else { 0 });
            }
        }
        out
    }

    /// Decodes the control field(s) given the byte(s) available and the
    /// negotiated modulus. Returns the class and the number of control
    /// bytes consumed (1 or 2).
    pub fn decode(bytes: &[u8], modulo: Modulo) -> Result<(Self, usize), DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Ax25TooShort(bytes.len()));
        }
        let b0 = bytes[0];
        if b0 & 0b01 == 0 {
            // I frame.
            match modulo {
                Modulo::Eight => {
                    let nr = (b0 >> 5) & 0x07;
                    let p = (b0 >> 4) & 0x01 != 0;
                    let ns = (b0 >> 1) & 0x07;
                    Ok((FrameClass::I { ns, nr, p }, 1))
                }
                Modulo::Extended => {
                    if bytes.len() < 2 {
                        return Err(DecodeError::Ax25ControlAmbiguous(bytes.len()));
                    }
                    let ns = (b0 >> 1) & 0x7F;
                    let b1 = bytes[1];
                    let nr = (b1 >> 1) & 0x7F;
                    let p = b1 & 0x01 != 0;
                    Ok((FrameClass::I { ns, nr, p }, 2))
                }
            }
        } else if b0 & 0b10 == 0 {
            // S frame.
            match modulo {
                Modulo::Eight => {
                    let nr = (b0 >> 5) & 0x07;
                    let pf = (b0 >> 4) & 0x01 != 0;
                    let kind = SFrameKind::from_ss_bits(b0 >> 2);
                    Ok((FrameClass::S { kind, nr, pf }, 1))
                }
                Modulo::Extended => {
                    if bytes.len() < 2 {
                        return Err(DecodeError::Ax25ControlAmbiguous(bytes.len()));
                    }
                    let kind = SFrameKind::from_ss_bits(b0 >> 2);
                    let b1 = bytes[1];
                    let nr = (b1 >> 1) & 0x7F;
                    let pf = b1 & 0x01 != 0;
                    Ok((FrameClass::S { kind, nr, pf }, 2))
                }
            }
        } else {
            // U frame: always one byte.
            let pf = b0 & U_PF_BIT != 0;
            let base = b0 & !U_PF_BIT;
            let kind = UFrameKind::from_base_byte(base)
                .ok_or(DecodeError::Ax25ControlAmbiguous(bytes.len()))?;
            Ok((FrameClass::U { kind, pf }, 1))
        }
    }
}

/// A fully decoded AX.25 link-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ax25Frame {
    pub destination: Ax25Address,
    pub source: Ax25Address,
    pub via: SmallVec<[Ax25Address; 8]>,
    pub class: FrameClass,
    pub pid: Option<u8>,
    pub info: Vec<u8>,
}

impl Ax25Frame {
    /// Returns the raw control byte(s) for the given modulus, as the
    /// `{control, control_byte_1?}` pair used by the runtime packet record.
    pub fn control_bytes(&self, modulo: Modulo) -> (u8, Option<u8>) {
        let bytes = self.class.encode(modulo);
        (bytes[0], bytes.get(1).copied())
    }

    pub fn encode(&self, modulo: Modulo) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.via.len() * 7 + self.info.len());
        out.extend_from_slice(&self.destination.encode());
        out.extend_from_slice(&self.source.encode());
        for addr in &self.via {
            out.extend_from_slice(&addr.encode());
        }
        out.extend(self.class.encode(modulo));
        if self.class.carries_pid() {
            out.push(self.pid.unwrap_or(PID_NO_LAYER3));
        }
        out.extend_from_slice(&self.info);
        out
    }

    pub fn decode(bytes: &[u8], modulo: Modulo) -> Result<Self, DecodeError> {
        if bytes.len() < 14 {
            return Err(DecodeError::Ax25TooShort(bytes.len()));
        }
        let mut offset = 0usize;
        let dest_bytes: [u8; 7] = bytes[0..7].try_into().unwrap();
        let destination = Ax25Address::decode(&dest_bytes)?;
        offset += 7;
        let src_bytes: [u8; 7] = bytes[7..14].try_into().unwrap();
        let source = Ax25Address::decode(&src_bytes)?;
        offset += 7;

        let mut via: SmallVec<[Ax25Address; 8]> = SmallVec::new();
        if !source.is_last() {
            loop {
                if via.len() >= 8 {
                    return Err(DecodeError::Ax25BadAddress(offset));
                }
                if offset + 7 > bytes.len() {
                    return Err(DecodeError::Ax25TooShort(bytes.len()));
                }
                let chunk: [u8; 7] = bytes[offset..offset + 7].try_into().unwrap();
                let addr = Ax25Address::decode(&chunk)?;
                let last = addr.is_last();
                via.push(addr);
                offset += 7;
                if last {
                    break;
                }
            }
        }

        if offset >= bytes.len() {
            return Err(DecodeError::Ax25TooShort(bytes.len()));
        }
        let (class, consumed) = FrameClass::decode(&bytes[offset..], modulo)?;
        offset += consumed;

        let pid = if class.carries_pid() {
            if offset >= bytes.len() {
                return Err(DecodeError::Ax25TooShort(bytes.len()));
            }
            let p = bytes[offset];
            offset += 1;
            Some(p)
        } else {
            None
        };

        let info = bytes[offset..].to_vec();

        Ok(Ax25Frame {
            destination,
            source,
            via,
            class,
            pid,
            info,
        })
    }
}

/// Direction used to derive the symmetric C-bit placement on source and
/// destination addresses (command frames carry `dest.C=1, src.C=0`;
/// responses invert that).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Command,
    Response,
}

/// Builder that guarantees last-address-bit placement and C-bit symmetry
/// for outbound frames, so callers never construct an invalid address
/// chain by hand.
pub struct OutboundFrame {
    destination: Ax25Address,
    source: Ax25Address,
    via: SmallVec<[Ax25Address; 8]>,
    direction: Direction,
    class: FrameClass,
    pid: Option<u8>,
    info: Vec<u8>,
}

impl OutboundFrame {
    pub fn new(
        destination: Ax25Address,
        source: Ax25Address,
        direction: Direction,
        class: FrameClass,
    ) -> Self {
        Self {
            destination,
            source,
            via: SmallVec::new(),
            direction,
            class,
            pid: None,
            info: Vec::new(),
        }
    }

    pub fn via(mut self, via: impl IntoIterator<Item = Ax25Address>) -> Self {
        self.via = via.into_iter().collect();
        self
    }

    pub fn pid(mut self, pid: u8) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn info(mut self, info: Vec<u8>) -> Self {
        self.info = info;
        self
    }

    pub fn build(self) -> Ax25Frame {
        let (dest_c, src_c) = match self.direction {
            Direction::Command => (true, false),
            Direction::Response => (false, true),
        };
        let destination = self.destination.with_c_bit(dest_c).with_last(false);
        let mut via = self.via;
        let last_idx = if via.is_empty() { None } else { Some(via.len() - 1) };
        let via: SmallVec<[Ax25Address; 8]> = via
            .drain(..)
            .enumerate()
            .map(|(i, addr)| addr.with_last(Some(i) == last_idx))
            .collect();
        let source = self.source.with_c_bit(src_c).with_last(via.is_empty());

        Ax25Frame {
            destination,
            source,
            via,
            class: self.class,
            pid: self.pid,
            info: self.info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(call: &str, ssid: u8) -> Ax25Address {
        Ax25Address::new(call, ssid).unwrap()
    }

    #[test]
    fn ui_round_trip_with_via_path() {
        let frame = OutboundFrame::new(
            addr("APRS", 0),
            addr("N0CALL", 0),
            Direction::Command,
            FrameClass::U {
                kind: UFrameKind::UI,
                pf: false,
            },
        )
        .via([addr("WIDE1", 1)])
        .pid(PID_NO_LAYER3)
        .info(b"!4903.50N/07201.75W-hi".to_vec())
        .build();

        let encoded = frame.encode(Modulo::Eight);
        let decoded = Ax25Frame::decode(&encoded, Modulo::Eight).unwrap();
        assert_eq!(decoded.destination.display(), "APRS");
        assert_eq!(decoded.source.display(), "N0CALL");
        assert_eq!(decoded.via.len(), 1);
        assert_eq!(decoded.via[0].display(), "WIDE1-1");
        assert!(decoded.via[0].is_last());
        assert_eq!(decoded.info, b"!4903.50N/07201.75W-hi");
        assert_eq!(decoded.pid, Some(PID_NO_LAYER3));
        assert!(decoded.destination.c_bit());
        assert!(!decoded.source.c_bit());
    }

    #[test]
    fn command_response_c_bits_are_symmetric() {
        let cmd = OutboundFrame::new(
            addr("N0CALL", 1),
            addr("K0EPI", 7),
            Direction::Command,
            FrameClass::U {
                kind: UFrameKind::SABM,
                pf: true,
            },
        )
        .build();
        assert!(cmd.destination.c_bit());
        assert!(!cmd.source.c_bit());

        let resp = OutboundFrame::new(
            addr("N0CALL", 1),
            addr("K0EPI", 7),
            Direction::Response,
            FrameClass::U {
                kind: UFrameKind::UA,
                pf: true,
            },
        )
        .build();
        assert!(!resp.destination.c_bit());
        assert!(resp.source.c_bit());
    }

    #[test]
    fn i_frame_modulo8_round_trip() {
        let frame = OutboundFrame::new(
            addr("K0EPI", 7),
            addr("N0CALL", 1),
            Direction::Response,
            FrameClass::I {
                ns: 3,
                nr: 5,
                p: true,
            },
        )
        .pid(PID_NO_LAYER3)
        .info(b"payload".to_vec())
        .build();
        let encoded = frame.encode(Modulo::Eight);
        assert_eq!(encoded.len(), 14 + 1 + 1 + 7); // addrs + control + pid + info
        let decoded = Ax25Frame::decode(&encoded, Modulo::Eight).unwrap();
        assert_eq!(
            decoded.class,
            FrameClass::I {
                ns: 3,
                nr: 5,
                p: true
            }
        );
    }

    #[test]
    fn i_frame_extended_round_trip() {
        let frame = OutboundFrame::new(
            addr("K0EPI", 7),
            addr("N0CALL", 1),
            Direction::Response,
            FrameClass::I {
                ns: 100,
                nr: 50,
                p: false,
            },
        )
        .pid(PID_NO_LAYER3)
        .info(b"x".to_vec())
        .build();
        let encoded = frame.encode(Modulo::Extended);
        let decoded = Ax25Frame::decode(&encoded, Modulo::Extended).unwrap();
        assert_eq!(
            decoded.class,
            FrameClass::I {
                ns: 100,
                nr: 50,
                p: false
            }
        );
    }

    #[test]
    fn too_short_frame_reports_byte_count() {
        let err = Ax25Frame::decode(&[0u8; 10], Modulo::Eight).unwrap_err();
        assert_eq!(err, DecodeError::Ax25TooShort(10));
    }

    #[test]
    fn classification_matches_control_bit_pattern() {
        let (class, _) = FrameClass::decode(&[0x00], Modulo::Eight).unwrap();
        assert!(class.is_information());
        let (class, _) = FrameClass::decode(&[0x01], Modulo::Eight).unwrap();
        assert!(class.is_supervisory());
        let (class, _) = FrameClass::decode(&[U_UA], Modulo::Eight).unwrap();
        assert!(class.is_unnumbered());
    }
}
