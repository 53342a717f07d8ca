//! Error types for opendps.

use std::io;
use thiserror::Error;

/// Result type for opendps operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for opendps operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No terminating sentinel within the read budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed or unterminated frame.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Frame CRC did not verify.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC computed over the received frame body.
        expected: u16,
        /// CRC carried in the frame.
        actual: u16,
    },

    /// Response opcode or status mismatch surviving all retries.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Accumulated response exceeded the receive buffer limit.
    #[error("Buffer overflow: {len} bytes received, limit is {max}")]
    BufferOverflow {
        /// Bytes accumulated so far.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Firmware upgrade aborted by the device.
    #[error("Upgrade failed: {0}")]
    Upgrade(#[from] UpgradeError),
}

/// Device-reported failure during a firmware upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UpgradeError {
    /// The device failed to erase its flash.
    #[error("device failed to erase flash")]
    EraseFailed,

    /// The device rejected the firmware CRC.
    #[error("device rejected the firmware checksum")]
    CrcRejected,

    /// The device failed to write a chunk to flash.
    #[error("device failed to write flash")]
    FlashFailed,

    /// The firmware image does not fit the device's flash.
    #[error("firmware image too large for device")]
    Overflow,

    /// Bootloader communication error.
    #[error("bootloader communication error")]
    BootcomError,

    /// The device reported a status byte outside the known set.
    #[error("device reported unrecognized upgrade status {0:#04x}")]
    Unrecognized(u8),
}
