//! CRC16-CCITT checksum calculation.
//!
//! OpenDPS uses CRC16-CCITT in its XMODEM flavour: polynomial 0x1021,
//! initial value 0, MSB-first, no reflection and no final XOR. The same
//! checksum covers both the frame body and the whole firmware image during
//! an upgrade.

/// Calculate CRC16-CCITT over `data`.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
