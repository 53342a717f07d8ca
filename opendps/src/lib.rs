//! # opendps
//!
//! A client library for OpenDPS power supplies.
//!
//! This crate speaks the OpenDPS serial wire protocol: byte-stuffed frames
//! delimited by sentinel bytes and protected by CRC16-CCITT, carrying a
//! small command set for controlling the device and upgrading its
//! firmware.
//!
//! - Frame encoding/decoding and CRC16 checksum calculation
//! - Command/response exchange with bounded retry
//! - Query and version payload decoding
//! - Chunked firmware upgrade sessions
//!
//! ## Features
//!
//! - `native` (default): real serial port support via the `serialport`
//!   crate
//! - `serde`: serialization support for decoded data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use opendps::Device;
//!
//! fn main() -> opendps::Result<()> {
//!     let mut device = Device::open("/dev/ttyUSB0", 115_200)?;
//!     device.ping()?;
//!     device.set_voltage_mv(3300)?;
//!     device.set_output(true)?;
//!
//!     let status = device.query()?;
//!     println!("{} mV out, {} mA", status.v_out, status.i_out);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod device;
pub mod error;
pub mod port;
pub mod protocol;
pub mod receive;
pub mod upgrade;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    channel::{ChannelConfig, CommandChannel},
    device::Device,
    error::{Error, Result, UpgradeError},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Command, QueryStatus, Screen, UpgradeStatus, VersionInfo},
    receive::ResponseReceiver,
    upgrade::{UpgradeSession, UpgradeStage, UpgradeState},
};
