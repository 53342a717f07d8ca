//! Wire protocol: checksums, framing and the command set.

pub mod command;
pub mod crc;
pub mod frame;

// Re-export common types
pub use command::{Command, QueryStatus, Screen, UpgradeStatus, VersionInfo};
