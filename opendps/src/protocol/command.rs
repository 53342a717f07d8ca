//! OpenDPS command set: opcodes, status codes and payload codecs.
//!
//! The numeric values are fixed by the device firmware and must match it
//! byte for byte; treat the tables below as configuration, not as something
//! to renumber.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};

/// Bit set in a response opcode to mark it as a response.
pub const RESPONSE_BIT: u8 = 0x80;

/// Success status byte for ordinary commands.
pub const STATUS_SUCCESS: u8 = 0x01;

/// Wire value meaning "temperature sensor absent".
pub const TEMP_ABSENT: u16 = 0xFFFF;

/// Request opcodes understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Liveness check (0x01).
    Ping = 0x01,
    /// Read input/output voltage, current and temperatures (0x04).
    Query = 0x04,
    /// Lock or unlock the front panel (0x07).
    Lock = 0x07,
    /// Begin a firmware upgrade session (0x09).
    UpgradeStart = 0x09,
    /// One firmware chunk (0x0A).
    UpgradeData = 0x0A,
    /// Enable or disable the power output (0x0C).
    EnableOutput = 0x0C,
    /// Set a named parameter, textual payload (0x0E).
    SetParameters = 0x0E,
    /// Read bootloader and firmware version strings (0x11).
    Version = 0x11,
    /// Switch the active screen (0x15).
    ChangeScreen = 0x15,
    /// Set display brightness (0x16).
    SetBrightness = 0x16,
}

impl Command {
    /// The request opcode byte.
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// The opcode the device answers with (request | 0x80).
    pub fn response_opcode(self) -> u8 {
        self as u8 | RESPONSE_BIT
    }
}

/// Screens selectable via [`Command::ChangeScreen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Screen {
    /// The main voltage/current screen.
    Main = 0,
    /// The settings screen.
    Settings = 1,
}

/// Per-chunk status bytes of the upgrade sub-protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    /// Chunk accepted, send the next one.
    Continue,
    /// Bootloader communication error.
    BootcomError,
    /// Firmware checksum rejected.
    CrcError,
    /// Flash erase failed.
    EraseError,
    /// Flash write failed.
    FlashError,
    /// Firmware image too large.
    OverflowError,
    /// Upgrade complete.
    Success,
    /// A status byte outside the known set.
    Unknown(u8),
}

impl From<u8> for UpgradeStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Continue,
            1 => Self::BootcomError,
            2 => Self::CrcError,
            3 => Self::EraseError,
            4 => Self::FlashError,
            5 => Self::OverflowError,
            16 => Self::Success,
            other => Self::Unknown(other),
        }
    }
}

impl UpgradeStatus {
    /// The wire value of this status.
    pub fn code(self) -> u8 {
        match self {
            Self::Continue => 0,
            Self::BootcomError => 1,
            Self::CrcError => 2,
            Self::EraseError => 3,
            Self::FlashError => 4,
            Self::OverflowError => 5,
            Self::Success => 16,
            Self::Unknown(code) => code,
        }
    }
}

/// Build the textual set-parameters payload: tag byte, NUL, ASCII decimal.
///
/// Only voltage (`b'u'`) and current (`b'i'`) use this textual encoding;
/// every other command is binary. The firmware parses exactly this shape,
/// so it is reproduced verbatim.
pub fn parameter_payload(tag: u8, value: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12);
    payload.push(tag);
    payload.push(0x00);
    payload.extend_from_slice(value.to_string().as_bytes());
    payload
}

/// Decoded query response.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryStatus {
    /// Input voltage in millivolts.
    pub v_in: u16,
    /// Output voltage in millivolts.
    pub v_out: u16,
    /// Output current in milliamps.
    pub i_out: u16,
    /// Whether the power output is enabled.
    pub output_enabled: bool,
    /// First temperature sensor in degrees, `None` when absent.
    pub temp1: Option<f64>,
    /// Second temperature sensor in degrees, `None` when absent.
    pub temp2: Option<f64>,
    /// Whether the device shut its output down due to temperature.
    pub temp_shutdown: bool,
}

/// Decode a raw temperature field.
///
/// 0xFFFF means the sensor is absent. When bit 0x8000 is set the value is
/// reinterpreted as `raw - 0x10000` before dividing by ten; when clear the
/// raw value is used directly. Small positive raw values without the high
/// bit are never sign-adjusted.
fn decode_temperature(raw: u16) -> Option<f64> {
    if raw == TEMP_ABSENT {
        return None;
    }
    let tenths = if raw & 0x8000 != 0 {
        f64::from(i32::from(raw) - 0x10000)
    } else {
        f64::from(raw)
    };
    Some(tenths / 10.0)
}

impl QueryStatus {
    /// Parse the query response payload (the bytes after the status byte).
    ///
    /// Layout, all big-endian:
    /// `v_in:u16 | v_out:u16 | i_out:u16 | enabled:u8 | temp1:u16 |
    /// temp2:u16 | temp_shutdown:u8`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(Error::Protocol(format!(
                "query response too short: {} bytes",
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        let v_in = cursor.read_u16::<BigEndian>()?;
        let v_out = cursor.read_u16::<BigEndian>()?;
        let i_out = cursor.read_u16::<BigEndian>()?;
        let output_enabled = cursor.read_u8()? == 1;
        let temp1 = decode_temperature(cursor.read_u16::<BigEndian>()?);
        let temp2 = decode_temperature(cursor.read_u16::<BigEndian>()?);
        let temp_shutdown = cursor.read_u8()? == 1;

        Ok(Self {
            v_in,
            v_out,
            i_out,
            output_enabled,
            temp1,
            temp2,
            temp_shutdown,
        })
    }
}

/// Decoded version response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VersionInfo {
    /// Bootloader version string.
    pub bootloader: String,
    /// Firmware version string.
    pub firmware: String,
}

fn take_cstr(data: &[u8]) -> Option<(String, &[u8])> {
    let nul = data.iter().position(|&b| b == 0)?;
    let text = String::from_utf8_lossy(&data[..nul]).into_owned();
    Some((text, &data[nul + 1..]))
}

impl VersionInfo {
    /// Parse the version response payload: two consecutive NUL-terminated
    /// strings (bootloader version, firmware version).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (bootloader, rest) = take_cstr(data)
            .ok_or_else(|| Error::Protocol("version response missing bootloader string".into()))?;
        let (firmware, _) = take_cstr(rest)
            .ok_or_else(|| Error::Protocol("version response missing firmware string".into()))?;
        Ok(Self {
            bootloader,
            firmware,
        })
    }
}
