//! Command/response exchange with bounded retry.
//!
//! One logical command is one frame out and one validated frame back. Any
//! failure between the write and the validation (timeout, framing, CRC,
//! wrong opcode or status) consumes one attempt and the whole cycle is
//! repeated from a fresh send. A failed write is different: the link itself
//! is presumed unusable and the error surfaces immediately.

use std::io::{Read, Write};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::command::RESPONSE_BIT;
use crate::protocol::frame;
use crate::receive::ResponseReceiver;

/// Retries on top of the initial attempt.
pub const MAX_RETRY: u32 = 3;

/// Tunables for one command channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Retries after the first attempt fails.
    pub max_retries: u32,
    /// Receive-side reassembly settings.
    pub receiver: ResponseReceiver,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY,
            receiver: ResponseReceiver::default(),
        }
    }
}

/// Orchestrates command/response exchanges over a byte-stream transport.
pub struct CommandChannel<'a, P: Read + Write> {
    port: &'a mut P,
    config: ChannelConfig,
}

impl<'a, P: Read + Write> CommandChannel<'a, P> {
    /// Create a channel with default settings.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: ChannelConfig::default(),
        }
    }

    /// Create a channel with custom settings.
    pub fn with_config(port: &'a mut P, config: ChannelConfig) -> Self {
        Self { port, config }
    }

    /// Send one command and return the response payload after the status
    /// byte.
    ///
    /// The response is accepted only when its opcode equals
    /// `opcode | 0x80`, its CRC verifies and its status byte equals
    /// `expected_status`. Up to `1 + max_retries` full cycles are attempted;
    /// after exhaustion the last observed error is returned.
    pub fn send_command(
        &mut self,
        opcode: u8,
        payload: &[u8],
        expected_status: u8,
    ) -> Result<Vec<u8>> {
        let request = frame::encode(opcode, payload)?;
        let attempts = self.config.max_retries + 1;
        let mut last_err = Error::Protocol(format!("command {opcode:#04x}: no attempt completed"));

        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!("command {opcode:#04x}: retrying (attempt {attempt}/{attempts})");
            }
            trace!("TX {} bytes", request.len());
            // A write failure means the link is gone; surface it at once
            // instead of burning the retry budget.
            self.port.write_all(&request).map_err(Error::Io)?;
            self.port.flush().map_err(Error::Io)?;

            match self.exchange(opcode, expected_status) {
                Ok(data) => return Ok(data),
                Err(e) => {
                    debug!("command {opcode:#04x}: attempt {attempt} failed: {e}");
                    last_err = e;
                },
            }
        }

        warn!("command {opcode:#04x}: giving up after {attempts} attempts: {last_err}");
        Err(last_err)
    }

    /// One write/receive/decode exchange with no retry and no validation.
    ///
    /// Upgrade data chunks must never be resent, so the chunk loop uses
    /// this and interprets the raw opcode and body itself.
    pub fn send_once(&mut self, opcode: u8, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
        let request = frame::encode(opcode, payload)?;
        trace!("TX {} bytes", request.len());
        self.port.write_all(&request).map_err(Error::Io)?;
        self.port.flush().map_err(Error::Io)?;
        let raw = self.config.receiver.read_frame(self.port)?;
        frame::decode(&raw)
    }

    fn exchange(&mut self, opcode: u8, expected_status: u8) -> Result<Vec<u8>> {
        let raw = self.config.receiver.read_frame(self.port)?;
        let (resp_opcode, body) = frame::decode(&raw)?;
        validate_response(opcode, expected_status, resp_opcode, body)
    }
}

/// Check response opcode and status, returning the payload after the
/// status byte.
fn validate_response(
    opcode: u8,
    expected_status: u8,
    resp_opcode: u8,
    body: Vec<u8>,
) -> Result<Vec<u8>> {
    if resp_opcode != opcode | RESPONSE_BIT {
        return Err(Error::Protocol(format!(
            "unexpected response opcode {resp_opcode:#04x} for command {opcode:#04x}"
        )));
    }
    let status = body
        .first()
        .copied()
        .ok_or_else(|| Error::Protocol(format!("command {opcode:#04x}: response has no status byte")))?;
    if status != expected_status {
        return Err(Error::Protocol(format!(
            "command {opcode:#04x}: status {status:#04x}, expected {expected_status:#04x}"
        )));
    }
    Ok(body[1..].to_vec())
}
