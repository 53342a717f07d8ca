//! Byte-level framing for the OpenDPS serial protocol.
//!
//! ## Frame Format
//!
//! ```text
//! +-----+--------------------------------------------+-----+
//! | SOF |  escaped( opcode | payload | crc_h crc_l ) | EOF |
//! +-----+--------------------------------------------+-----+
//! | 7E  |                 variable                   | 7F  |
//! +-----+--------------------------------------------+-----+
//! ```
//!
//! The CRC16-CCITT covers the unescaped `opcode‖payload` only. Escaping is
//! applied after the CRC on transmit and undone before verification on
//! receive: any body byte equal to SOF, DLE or EOF is sent as `DLE` followed
//! by the byte XORed with 0x20, so the sentinels never appear inside a
//! frame.

use crate::error::{Error, Result};
use crate::protocol::crc::crc16_ccitt;

/// Start-of-frame sentinel.
pub const SOF: u8 = 0x7E;

/// Escape (data link escape) byte.
pub const DLE: u8 = 0x7D;

/// End-of-frame sentinel.
pub const EOF: u8 = 0x7F;

/// XOR mask applied to escaped bytes.
pub const XOR: u8 = 0x20;

/// Largest payload `encode` accepts. Generous enough for the biggest
/// negotiable upgrade chunk.
pub const MAX_PAYLOAD_LEN: usize = 2048;

fn stuff(byte: u8, out: &mut Vec<u8>) {
    if byte == SOF || byte == DLE || byte == EOF {
        out.push(DLE);
        out.push(byte ^ XOR);
    } else {
        out.push(byte);
    }
}

/// Encode one frame carrying `opcode` and `payload`.
///
/// Fails only when the payload exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode(opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::Framing(format!(
            "payload too large: {} bytes, limit is {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }

    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(opcode);
    body.extend_from_slice(payload);
    let crc = crc16_ccitt(&body);

    let mut frame = Vec::with_capacity(body.len() * 2 + 6);
    frame.push(SOF);
    for &byte in &body {
        stuff(byte, &mut frame);
    }
    stuff((crc >> 8) as u8, &mut frame);
    stuff((crc & 0xFF) as u8, &mut frame);
    frame.push(EOF);
    Ok(frame)
}

/// Extract and validate one frame from a raw receive buffer.
///
/// The most recently seen SOF wins, so stray noise (including spurious SOF
/// bytes) before the true frame start is tolerated. Escaped body bytes never
/// equal a sentinel on the wire, so a raw EOF always terminates the frame.
///
/// Returns the opcode and the unescaped payload with the CRC stripped.
pub fn decode(raw: &[u8]) -> Result<(u8, Vec<u8>)> {
    let mut body: Vec<u8> = Vec::with_capacity(raw.len());
    let mut in_frame = false;
    let mut escaped = false;
    let mut terminated = false;

    for &byte in raw {
        match byte {
            SOF => {
                in_frame = true;
                escaped = false;
                body.clear();
            },
            EOF if in_frame => {
                terminated = true;
                break;
            },
            DLE if in_frame => {
                escaped = true;
            },
            _ if in_frame => {
                if escaped {
                    body.push(byte ^ XOR);
                    escaped = false;
                } else {
                    body.push(byte);
                }
            },
            // Noise outside any frame.
            _ => {},
        }
    }

    if !terminated {
        return Err(Error::Framing("no complete frame in buffer".into()));
    }
    // Opcode plus two CRC bytes is the minimum well-formed body.
    if body.len() < 3 {
        return Err(Error::Framing(format!(
            "frame body too short: {} bytes",
            body.len()
        )));
    }

    let (data, crc_bytes) = body.split_at(body.len() - 2);
    let actual = u16::from(crc_bytes[0]) << 8 | u16::from(crc_bytes[1]);
    let expected = crc16_ccitt(data);
    if actual != expected {
        return Err(Error::CrcMismatch { expected, actual });
    }

    Ok((data[0], data[1..].to_vec()))
}
