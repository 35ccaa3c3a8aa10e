//! Mobilinkd TNC4 vendor telemetry and tuning, carried over the standard
//! KISS set-hardware command (opcode `0x06`). Subtype byte layout for
//! inbound telemetry follows the device's published KISS extension;
//! outbound tuning subcodes are this crate's own scheme (the device
//! accepts them interleaved with the telemetry subtypes on the same
//! command).

use axterm_proto::kiss::{self, OPCODE_SET_HARDWARE};
use std::time::Duration;

const SUBTYPE_INPUT_LEVEL: u8 = 0x01;
const SUBTYPE_BATTERY: u8 = 0x02;
const SUBTYPE_INPUT_GAIN_ECHO: u8 = 0x03;

const CMD_SET_MODEM_TYPE: u8 = 0x10;
const CMD_SET_INPUT_GAIN: u8 = 0x11;
const CMD_SET_OUTPUT_GAIN: u8 = 0x12;
const CMD_SET_BATTERY_MONITOR: u8 = 0x13;
const CMD_POLL_INPUT_LEVEL: u8 = 0x14;
const CMD_ADJUST_INPUT_LEVELS: u8 = 0x15;
const CMD_RESET: u8 = 0x16;

/// How long the engine waits after a poll or auto-adjust command before
/// sending the follow-up reset that restarts the demodulator.
pub const RESET_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLevel {
    pub vpp: u8,
    pub vavg: u8,
    pub vmin: u8,
    pub vmax: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telemetry {
    InputLevel(InputLevel),
    BatteryPercent(u8),
    InputGainEcho(u8),
    Unknown { subtype: u8, payload: Vec<u8> },
}

/// Parses a set-hardware payload (subtype byte followed by its fields).
pub fn parse_telemetry(payload: &[u8]) -> Option<Telemetry> {
    let (&subtype, rest) = payload.split_first()?;
    Some(match subtype {
        SUBTYPE_INPUT_LEVEL if rest.len() >= 4 => Telemetry::InputLevel(InputLevel {
            vpp: rest[0],
            vavg: rest[1],
            vmin: rest[2],
            vmax: rest[3],
        }),
        SUBTYPE_BATTERY if !rest.is_empty() => Telemetry::BatteryPercent(rest[0].min(100)),
        SUBTYPE_INPUT_GAIN_ECHO if !rest.is_empty() => Telemetry::InputGainEcho(rest[0].min(4)),
        other => Telemetry::Unknown {
            subtype: other,
            payload: rest.to_vec(),
        },
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobilinkdConfig {
    pub modem_type: u8,
    pub input_gain: u8,
    pub output_gain: u8,
}

/// The init sequence the link sends right after open: set modem type,
/// input and output gain, then enable battery-level reporting.
pub fn init_sequence(config: &MobilinkdConfig) -> Vec<Vec<u8>> {
    vec![
        kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_SET_MODEM_TYPE, config.modem_type]),
        kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_SET_INPUT_GAIN, config.input_gain]),
        kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_SET_OUTPUT_GAIN, config.output_gain]),
        kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_SET_BATTERY_MONITOR, 0x01]),
    ]
}

/// A single probe frame used to autodetect a Mobilinkd TNC4 at open: any
/// set-hardware response at all (regardless of subtype) confirms it.
pub fn probe_frame() -> Vec<u8> {
    kiss::encode_command(OPCODE_SET_HARDWARE, &[SUBTYPE_INPUT_LEVEL])
}

/// Requests a one-shot input-level report. Callers must follow up with
/// [`reset_frame`] after [`RESET_DELAY`] to restart the demodulator.
pub fn poll_input_level_frame() -> Vec<u8> {
    kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_POLL_INPUT_LEVEL])
}

/// Triggers the device's own input-gain auto-adjust routine. Callers must
/// follow up with [`reset_frame`] after [`RESET_DELAY`].
pub fn adjust_input_levels_frame() -> Vec<u8> {
    kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_ADJUST_INPUT_LEVELS])
}

pub fn set_input_gain_frame(level: u8) -> Vec<u8> {
    kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_SET_INPUT_GAIN, level.min(4)])
}

pub fn reset_frame() -> Vec<u8> {
    kiss::encode_command(OPCODE_SET_HARDWARE, &[CMD_RESET])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input_level() {
        let telemetry = parse_telemetry(&[SUBTYPE_INPUT_LEVEL, 10, 20, 30, 40]).unwrap();
        assert_eq!(
            telemetry,
            Telemetry::InputLevel(InputLevel {
                vpp: 10,
                vavg: 20,
                vmin: 30,
                vmax: 40
            })
        );
    }

    #[test]
    fn clamps_battery_percent() {
        let telemetry = parse_telemetry(&[SUBTYPE_BATTERY, 255]).unwrap();
        assert_eq!(telemetry, Telemetry::BatteryPercent(100));
    }

    #[test]
    fn init_sequence_has_four_frames() {
        let config = MobilinkdConfig {
            modem_type: 1,
            input_gain: 2,
            output_gain: 3,
        };
        assert_eq!(init_sequence(&config).len(), 4);
    }
}
