//! Firmware upgrade session.
//!
//! An upgrade is a negotiated start followed by a strict chunk walk: the
//! host proposes a chunk size and the whole-image CRC, the device may
//! answer with a smaller chunk size, then each chunk goes out exactly once
//! and the device's per-chunk status decides whether to continue, finish
//! or abort. Chunks are never retransmitted; after a failed chunk the
//! device is mid-erase or mid-write and the only safe recovery is to start
//! the session over.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};

use crate::channel::CommandChannel;
use crate::error::{Error, Result, UpgradeError};
use crate::protocol::command::{Command, UpgradeStatus};
use crate::protocol::crc::crc16_ccitt;

/// Chunk size proposed to the device.
pub const DEFAULT_CHUNK_SIZE: u16 = 1024;

/// Where a session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStage {
    /// Created, start command not yet sent.
    Start,
    /// Start acknowledged, chunk size settled.
    Negotiated,
    /// Chunks are being sent.
    Transferring,
    /// Device reported success.
    Done,
    /// Aborted on an error.
    Failed,
}

/// Progress and negotiated parameters of one session.
#[derive(Debug, Clone)]
pub struct UpgradeState {
    /// Effective chunk size after negotiation.
    pub chunk_size: u16,
    /// Total firmware image size in bytes.
    pub file_size: usize,
    /// Bytes acknowledged by the device so far.
    pub bytes_sent: usize,
    /// CRC of the whole image, as announced at start.
    pub file_crc: u16,
    /// Last per-chunk status received.
    pub last_status: Option<UpgradeStatus>,
    /// Current stage.
    pub stage: UpgradeStage,
}

/// Drives a firmware image through the upgrade sub-protocol.
pub struct UpgradeSession<'a, P: Read + Write> {
    port: &'a mut P,
    firmware: &'a [u8],
    state: UpgradeState,
}

impl<'a, P: Read + Write> UpgradeSession<'a, P> {
    /// Create a session for `firmware`, to be sent over `port`.
    pub fn new(port: &'a mut P, firmware: &'a [u8]) -> Self {
        let state = UpgradeState {
            chunk_size: DEFAULT_CHUNK_SIZE,
            file_size: firmware.len(),
            bytes_sent: 0,
            file_crc: crc16_ccitt(firmware),
            last_status: None,
            stage: UpgradeStage::Start,
        };
        Self {
            port,
            firmware,
            state,
        }
    }

    /// Current session state.
    pub fn state(&self) -> &UpgradeState {
        &self.state
    }

    /// Send the upgrade-start command and settle the chunk size.
    ///
    /// The start is an ordinary command with the usual retry policy; the
    /// device answers `Continue` together with the chunk size it is
    /// prepared to accept. A differing non-zero size from the device wins.
    pub fn start(&mut self) -> Result<()> {
        if self.firmware.is_empty() {
            return Err(Error::Protocol("firmware image is empty".into()));
        }

        let mut payload = [0u8; 4];
        BigEndian::write_u16(&mut payload[0..2], self.state.chunk_size);
        BigEndian::write_u16(&mut payload[2..4], self.state.file_crc);
        info!(
            "starting upgrade: {} bytes, crc {:#06x}",
            self.state.file_size, self.state.file_crc
        );

        let reply = CommandChannel::new(self.port).send_command(
            Command::UpgradeStart.opcode(),
            &payload,
            UpgradeStatus::Continue.code(),
        )?;

        if reply.len() >= 2 {
            let device_chunk = BigEndian::read_u16(&reply[0..2]);
            if device_chunk != 0 && device_chunk != self.state.chunk_size {
                debug!(
                    "device negotiated chunk size {} (proposed {})",
                    device_chunk, self.state.chunk_size
                );
                self.state.chunk_size = device_chunk;
            }
        }
        self.state.stage = UpgradeStage::Negotiated;
        Ok(())
    }

    /// Send every chunk and wait for the device to report success.
    ///
    /// `progress` is invoked with the percentage of bytes acknowledged so
    /// far (0..=100). Each chunk goes out exactly once; any status other
    /// than `Continue` or `Success` aborts with the matching error, and a
    /// session that runs out of chunks without `Success` is a protocol
    /// error.
    pub fn transfer(&mut self, progress: &mut dyn FnMut(u8)) -> Result<()> {
        self.state.stage = UpgradeStage::Transferring;
        let mut channel = CommandChannel::new(self.port);

        for chunk in self.firmware.chunks(usize::from(self.state.chunk_size)) {
            let (opcode, body) = channel.send_once(Command::UpgradeData.opcode(), chunk)?;
            if opcode != Command::UpgradeData.response_opcode() {
                return Err(Error::Protocol(format!(
                    "unexpected response opcode {opcode:#04x} during upgrade"
                )));
            }
            let status = UpgradeStatus::from(body.first().copied().ok_or_else(|| {
                Error::Protocol("upgrade data response has no status byte".into())
            })?);
            self.state.last_status = Some(status);

            match status {
                UpgradeStatus::Continue => {
                    self.state.bytes_sent += chunk.len();
                    let percent = self.state.bytes_sent * 100 / self.state.file_size;
                    progress(u8::try_from(percent).unwrap_or(100));
                },
                UpgradeStatus::Success => {
                    self.state.bytes_sent += chunk.len();
                    progress(100);
                    self.state.stage = UpgradeStage::Done;
                    info!("upgrade complete: {} bytes flashed", self.state.bytes_sent);
                    return Ok(());
                },
                UpgradeStatus::EraseError => return Err(UpgradeError::EraseFailed.into()),
                UpgradeStatus::CrcError => return Err(UpgradeError::CrcRejected.into()),
                UpgradeStatus::FlashError => return Err(UpgradeError::FlashFailed.into()),
                UpgradeStatus::OverflowError => return Err(UpgradeError::Overflow.into()),
                UpgradeStatus::BootcomError => return Err(UpgradeError::BootcomError.into()),
                UpgradeStatus::Unknown(code) => {
                    return Err(UpgradeError::Unrecognized(code).into());
                },
            }
        }

        Err(Error::Protocol(
            "device did not report upgrade completion".into(),
        ))
    }

    /// Run the whole session: start, then transfer.
    ///
    /// On any error the session is marked [`UpgradeStage::Failed`].
    pub fn run(&mut self, progress: &mut dyn FnMut(u8)) -> Result<()> {
        let result = self.start().and_then(|()| self.transfer(progress));
        if result.is_err() {
            self.state.stage = UpgradeStage::Failed;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame;
    use crate::testutil::MockSerial;

    fn start_reply(chunk_size: u16) -> Vec<u8> {
        let code = UpgradeStatus::Continue.code();
        frame::encode(
            Command::UpgradeStart.response_opcode(),
            &[code, (chunk_size >> 8) as u8, (chunk_size & 0xFF) as u8],
        )
        .unwrap()
    }

    fn data_reply(status: UpgradeStatus) -> Vec<u8> {
        frame::encode(Command::UpgradeData.response_opcode(), &[status.code()]).unwrap()
    }

    #[test]
    fn test_empty_firmware_rejected() {
        let mut port = MockSerial::new();
        let mut session = UpgradeSession::new(&mut port, &[]);
        let result = session.run(&mut |_| {});
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(session.state().stage, UpgradeStage::Failed);
        // Nothing hit the wire.
        assert!(port.written.is_empty());
    }

    #[test]
    fn test_full_session_chunking_and_progress() {
        // 2500 bytes at chunk size 1000: three chunks of 1000/1000/500.
        let firmware = vec![0xA5u8; 2500];
        let mut port = MockSerial::new();
        port.push_read(start_reply(1000))
            .push_read(data_reply(UpgradeStatus::Continue))
            .push_read(data_reply(UpgradeStatus::Continue))
            .push_read(data_reply(UpgradeStatus::Success));

        let mut session = UpgradeSession::new(&mut port, &firmware);
        let mut reports = Vec::new();
        session.run(&mut |pct| reports.push(pct)).unwrap();

        assert_eq!(session.state().stage, UpgradeStage::Done);
        assert_eq!(session.state().bytes_sent, 2500);
        assert_eq!(reports, vec![40, 80, 100]);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));

        // One start frame plus three data frames.
        let frames = port.written_frames();
        assert_eq!(frames.len(), 4);
        let (opcode, body) = frame::decode(&frames[0]).unwrap();
        assert_eq!(opcode, Command::UpgradeStart.opcode());
        assert_eq!(body[0..2], 1000u16.to_be_bytes());
        assert_eq!(body[2..4], crc16_ccitt(&firmware).to_be_bytes());
    }

    #[test]
    fn test_crc_rejection_stops_transfer() {
        let firmware = vec![0x11u8; 2500];
        let mut port = MockSerial::new();
        port.push_read(start_reply(1000))
            .push_read(data_reply(UpgradeStatus::Continue))
            .push_read(data_reply(UpgradeStatus::CrcError));

        let mut session = UpgradeSession::new(&mut port, &firmware);
        let result = session.run(&mut |_| {});
        assert!(matches!(
            result,
            Err(Error::Upgrade(UpgradeError::CrcRejected))
        ));
        assert_eq!(session.state().stage, UpgradeStage::Failed);
        // Start plus exactly two data frames: the failed chunk is not
        // retried and no further chunk follows it.
        assert_eq!(port.written_frames().len(), 3);
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let firmware = vec![0x22u8; 100];
        let mut port = MockSerial::new();
        port.push_read(start_reply(1024))
            .push_read(data_reply(UpgradeStatus::Unknown(0x7A)));

        let mut session = UpgradeSession::new(&mut port, &firmware);
        let result = session.run(&mut |_| {});
        assert!(matches!(
            result,
            Err(Error::Upgrade(UpgradeError::Unrecognized(0x7A)))
        ));
    }

    #[test]
    fn test_device_negotiates_smaller_chunk() {
        let firmware = vec![0x33u8; 1024];
        let mut port = MockSerial::new();
        port.push_read(start_reply(512));
        port.push_read(data_reply(UpgradeStatus::Continue));
        port.push_read(data_reply(UpgradeStatus::Success));

        let mut session = UpgradeSession::new(&mut port, &firmware);
        session.run(&mut |_| {}).unwrap();
        assert_eq!(session.state().chunk_size, 512);
        // 1024 bytes went out as two 512-byte chunks.
        assert_eq!(port.written_frames().len(), 3);
    }

    #[test]
    fn test_missing_success_at_end_is_protocol_error() {
        let firmware = vec![0x44u8; 100];
        let mut port = MockSerial::new();
        port.push_read(start_reply(1024));
        port.push_read(data_reply(UpgradeStatus::Continue));

        let mut session = UpgradeSession::new(&mut port, &firmware);
        let result = session.run(&mut |_| {});
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(session.state().stage, UpgradeStage::Failed);
    }
}
