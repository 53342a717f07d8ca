//! High-level device handle.
//!
//! [`Device`] wraps a transport and exposes one method per device
//! operation. It is generic over `Read + Write` so the whole surface is
//! testable against a scripted port; [`Device::open`] constructs it over a
//! real serial port when the `native` feature is enabled.

use std::io::{Read, Write};
use std::path::Path;

use log::info;

use crate::channel::{ChannelConfig, CommandChannel};
use crate::error::Result;
use crate::protocol::command::{
    parameter_payload, Command, QueryStatus, Screen, VersionInfo, STATUS_SUCCESS,
};
use crate::receive::{ResponseReceiver, RESPONSE_LIMIT_WIDE};
use crate::upgrade::UpgradeSession;

/// A connected OpenDPS device.
pub struct Device<P: Read + Write> {
    port: P,
}

#[cfg(feature = "native")]
impl Device<crate::port::NativePort> {
    /// Open the device on a serial port.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = crate::port::NativePort::open_simple(port_name, baud_rate)?;
        Ok(Self::new(port))
    }
}

impl<P: Read + Write> Device<P> {
    /// Wrap an already-open transport.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Access the underlying transport.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the handle and return the transport.
    pub fn into_port(self) -> P {
        self.port
    }

    fn channel(&mut self) -> CommandChannel<'_, P> {
        CommandChannel::new(&mut self.port)
    }

    /// Channel with the wide receive limit, for responses carrying
    /// free-form strings.
    fn wide_channel(&mut self) -> CommandChannel<'_, P> {
        let config = ChannelConfig {
            receiver: ResponseReceiver::with_limit(RESPONSE_LIMIT_WIDE),
            ..ChannelConfig::default()
        };
        CommandChannel::with_config(&mut self.port, config)
    }

    /// Liveness check.
    pub fn ping(&mut self) -> Result<()> {
        self.channel()
            .send_command(Command::Ping.opcode(), &[], STATUS_SUCCESS)?;
        Ok(())
    }

    /// Lock or unlock the front panel buttons.
    pub fn set_lock(&mut self, locked: bool) -> Result<()> {
        self.channel()
            .send_command(Command::Lock.opcode(), &[u8::from(locked)], STATUS_SUCCESS)?;
        Ok(())
    }

    /// Set display brightness, 0..=100.
    pub fn set_brightness(&mut self, percent: u8) -> Result<()> {
        self.channel().send_command(
            Command::SetBrightness.opcode(),
            &[percent],
            STATUS_SUCCESS,
        )?;
        Ok(())
    }

    /// Enable or disable the power output.
    pub fn set_output(&mut self, enabled: bool) -> Result<()> {
        self.channel().send_command(
            Command::EnableOutput.opcode(),
            &[u8::from(enabled)],
            STATUS_SUCCESS,
        )?;
        Ok(())
    }

    /// Set the output voltage in millivolts.
    pub fn set_voltage_mv(&mut self, millivolts: u32) -> Result<()> {
        let payload = parameter_payload(b'u', millivolts);
        self.channel()
            .send_command(Command::SetParameters.opcode(), &payload, STATUS_SUCCESS)?;
        Ok(())
    }

    /// Set the output current limit in milliamps.
    pub fn set_current_ma(&mut self, milliamps: u32) -> Result<()> {
        let payload = parameter_payload(b'i', milliamps);
        self.channel()
            .send_command(Command::SetParameters.opcode(), &payload, STATUS_SUCCESS)?;
        Ok(())
    }

    /// Read voltages, current, output state and temperatures.
    pub fn query(&mut self) -> Result<QueryStatus> {
        let data = self
            .wide_channel()
            .send_command(Command::Query.opcode(), &[], STATUS_SUCCESS)?;
        QueryStatus::parse(&data)
    }

    /// Switch the active screen.
    pub fn change_screen(&mut self, screen: Screen) -> Result<()> {
        self.channel().send_command(
            Command::ChangeScreen.opcode(),
            &[screen as u8],
            STATUS_SUCCESS,
        )?;
        Ok(())
    }

    /// Read bootloader and firmware version strings.
    pub fn version(&mut self) -> Result<VersionInfo> {
        let data = self
            .wide_channel()
            .send_command(Command::Version.opcode(), &[], STATUS_SUCCESS)?;
        VersionInfo::parse(&data)
    }

    /// Upgrade the firmware from an image file on disk.
    pub fn upgrade(&mut self, path: &Path, progress: &mut dyn FnMut(u8)) -> Result<()> {
        let firmware = std::fs::read(path)?;
        info!("read firmware image {} ({} bytes)", path.display(), firmware.len());
        self.upgrade_from_slice(&firmware, progress)
    }

    /// Upgrade the firmware from an in-memory image.
    pub fn upgrade_from_slice(
        &mut self,
        firmware: &[u8],
        progress: &mut dyn FnMut(u8),
    ) -> Result<()> {
        UpgradeSession::new(&mut self.port, firmware).run(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame;
    use crate::testutil::MockSerial;

    fn ok_reply(command: Command, extra: &[u8]) -> Vec<u8> {
        let mut body = vec![STATUS_SUCCESS];
        body.extend_from_slice(extra);
        frame::encode(command.response_opcode(), &body).unwrap()
    }

    #[test]
    fn test_ping_exchange() {
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::Ping, &[]));

        let mut device = Device::new(port);
        device.ping().unwrap();

        let frames = device.port_mut().written_frames();
        assert_eq!(frames.len(), 1);
        let (opcode, body) = frame::decode(&frames[0]).unwrap();
        assert_eq!(opcode, Command::Ping.opcode());
        assert!(body.is_empty());
    }

    #[test]
    fn test_set_voltage_sends_textual_payload() {
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::SetParameters, &[]));

        let mut device = Device::new(port);
        device.set_voltage_mv(3300).unwrap();

        let frames = device.port_mut().written_frames();
        let (opcode, body) = frame::decode(&frames[0]).unwrap();
        assert_eq!(opcode, Command::SetParameters.opcode());
        assert_eq!(body, b"u\x003300");
    }

    #[test]
    fn test_set_current_sends_textual_payload() {
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::SetParameters, &[]));

        let mut device = Device::new(port);
        device.set_current_ma(750).unwrap();

        let frames = device.port_mut().written_frames();
        let (_, body) = frame::decode(&frames[0]).unwrap();
        assert_eq!(body, b"i\x00750");
    }

    #[test]
    fn test_lock_and_output_flags() {
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::Lock, &[]))
            .push_read(ok_reply(Command::EnableOutput, &[]));

        let mut device = Device::new(port);
        device.set_lock(true).unwrap();
        device.set_output(false).unwrap();

        let frames = device.port_mut().written_frames();
        assert_eq!(frame::decode(&frames[0]).unwrap().1, vec![1]);
        assert_eq!(frame::decode(&frames[1]).unwrap().1, vec![0]);
    }

    #[test]
    fn test_query_roundtrip() {
        let payload = [
            0x2E, 0xE0, 0x13, 0x88, 0x01, 0xF4, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
        ];
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::Query, &payload));

        let mut device = Device::new(port);
        let status = device.query().unwrap();
        assert_eq!(status.v_in, 12000);
        assert_eq!(status.v_out, 5000);
        assert_eq!(status.i_out, 500);
        assert!(status.output_enabled);
    }

    #[test]
    fn test_version_roundtrip() {
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::Version, b"boot-1.2\0opendps-2.0\0"));

        let mut device = Device::new(port);
        let version = device.version().unwrap();
        assert_eq!(version.bootloader, "boot-1.2");
        assert_eq!(version.firmware, "opendps-2.0");
    }

    #[test]
    fn test_upgrade_from_file() {
        use crate::protocol::command::UpgradeStatus;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, vec![0xC3u8; 64]).unwrap();

        let mut port = MockSerial::new();
        port.push_read(frame::encode(
            Command::UpgradeStart.response_opcode(),
            &[UpgradeStatus::Continue.code(), 0x04, 0x00],
        )
        .unwrap());
        port.push_read(frame::encode(
            Command::UpgradeData.response_opcode(),
            &[UpgradeStatus::Success.code()],
        )
        .unwrap());

        let mut device = Device::new(port);
        let mut last = 0;
        device.upgrade(&path, &mut |pct| last = pct).unwrap();
        assert_eq!(last, 100);
    }

    #[test]
    fn test_change_screen_payload() {
        let mut port = MockSerial::new();
        port.push_read(ok_reply(Command::ChangeScreen, &[]));

        let mut device = Device::new(port);
        device.change_screen(Screen::Settings).unwrap();

        let frames = device.port_mut().written_frames();
        assert_eq!(frame::decode(&frames[0]).unwrap().1, vec![1]);
    }
}
