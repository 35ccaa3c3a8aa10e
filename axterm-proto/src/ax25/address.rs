use crate::error::DecodeError;

/// A single seven-byte AX.25 address field.
///
/// `bit7` is reused by context: for a source/destination address it is the
/// command/response (C) bit; for a digipeater (via) address it is the
/// has-been-repeated (H) bit. AX.25 defines these as the same physical bit,
/// so we store one flag and expose both names as accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ax25Address {
    callsign: String,
    ssid: u8,
    bit7: bool,
    last: bool,
}

impl Ax25Address {
    /// Builds an address from a 1-6 character callsign and a 0-15 SSID.
    /// The callsign is upper-cased; anything outside `[A-Z0-9]` or a length
    /// outside 1-6 is rejected.
    pub fn new(callsign: &str, ssid: u8) -> Result<Self, DecodeError> {
        let upper = callsign.to_ascii_uppercase();
        if upper.is_empty()
            || upper.len() > 6
            || ssid > 15
            || !upper.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(DecodeError::Ax25BadAddress(upper.len()));
        }
        Ok(Self {
            callsign: upper,
            ssid,
            bit7: false,
            last: false,
        })
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn ssid(&self) -> u8 {
        self.ssid
    }

    /// Display form, e.g. `K0EPI-7` (no `-0` suffix for SSID zero).
    pub fn display(&self) -> String {
        if self.ssid == 0 {
            self.callsign.clone()
        } else {
            format!("{}-{}", self.callsign, self.ssid)
        }
    }

    pub fn c_bit(&self) -> bool {
        self.bit7
    }

    pub fn with_c_bit(mut self, c: bool) -> Self {
        self.bit7 = c;
        self
    }

    pub fn h_bit(&self) -> bool {
        self.bit7
    }

    pub fn with_h_bit(mut self, h: bool) -> Self {
        self.bit7 = h;
        self
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    pub(crate) fn with_last(mut self, last: bool) -> Self {
        self.last = last;
        self
    }

    /// Encodes this address to its canonical 7-byte wire form: each
    /// callsign byte shifted left one bit and space-padded to 6 characters,
    /// followed by the SSID byte with reserved bits set per the standard.
    pub fn encode(&self) -> [u8; 7] {
        let mut out = [0u8; 7];
        let padded: Vec<u8> = {
            let mut bytes = self.callsign.as_bytes().to_vec();
            bytes.resize(6, b' ');
            bytes
        };
        for (i, &b) in padded.iter().enumerate() {
            out[i] = b << 1;
        }
        let mut ssid_byte = 0b0110_0000u8; // reserved bits per AX.25
        ssid_byte |= self.ssid << 1;
        if self.bit7 {
            ssid_byte |= 0x80;
        }
        if self.last {
            ssid_byte |= 0x01;
        }
        out[6] = ssid_byte;
        out
    }

    /// Decodes a single 7-byte address field.
    pub fn decode(bytes: &[u8; 7]) -> Result<Self, DecodeError> {
        let mut callsign_bytes = [0u8; 6];
        for i in 0..6 {
            callsign_bytes[i] = bytes[i] >> 1;
        }
        let callsign = String::from_utf8_lossy(&callsign_bytes)
            .trim_end()
            .to_string();
        if callsign.is_empty() {
            return Err(DecodeError::Ax25BadAddress(7));
        }
        let ssid_byte = bytes[6];
        let ssid = (ssid_byte >> 1) & 0x0F;
        let bit7 = ssid_byte & 0x80 != 0;
        let last = ssid_byte & 0x01 != 0;
        Ok(Self {
            callsign,
            ssid,
            bit7,
            last,
        })
    }
}

impl std::fmt::Display for Ax25Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_callsign_and_ssid() {
        let addr = Ax25Address::new("n0call", 7)
            .unwrap()
            .with_c_bit(true)
            .with_last(true);
        let bytes = addr.encode();
        let decoded = Ax25Address::decode(&bytes).unwrap();
        assert_eq!(decoded.callsign(), "N0CALL");
        assert_eq!(decoded.ssid(), 7);
        assert!(decoded.c_bit());
        assert!(decoded.is_last());
    }

    #[test]
    fn rejects_oversized_callsign() {
        assert!(Ax25Address::new("TOOLONGCALL", 0).is_err());
    }

    #[test]
    fn rejects_ssid_over_15() {
        assert!(Ax25Address::new("N0CALL", 16).is_err());
    }

    #[test]
    fn display_omits_zero_ssid() {
        let addr = Ax25Address::new("APRS", 0).unwrap();
        assert_eq!(addr.display(), "APRS");
        let addr = Ax25Address::new("WIDE1", 1).unwrap();
        assert_eq!(addr.display(), "WIDE1-1");
    }
}
