//! Receive-side frame reassembly.
//!
//! The device answers over a byte stream that may deliver a response in
//! arbitrary slices, preceded by line noise. [`ResponseReceiver`]
//! accumulates reads until the end-of-frame sentinel shows up, then hands
//! the raw buffer to [`crate::protocol::frame::decode`] callers. The
//! per-call read timeout lives in the transport; on top of it the receiver
//! bounds how many consecutive empty reads it tolerates.

use std::io::{self, Read};

use log::trace;

use crate::error::{Error, Result};
use crate::protocol::frame;

/// Consecutive empty reads tolerated before giving up.
pub const MAX_EMPTY_READS: u32 = 10;

/// Receive buffer limit for ordinary command responses.
pub const RESPONSE_LIMIT: usize = 128;

/// Receive buffer limit for query and version responses, which carry
/// free-form strings and may outgrow the ordinary bound.
pub const RESPONSE_LIMIT_WIDE: usize = 512;

/// Accumulates transport reads into one raw frame buffer.
#[derive(Debug, Clone)]
pub struct ResponseReceiver {
    /// Largest response accepted before failing with `BufferOverflow`.
    pub max_len: usize,
    /// Consecutive empty reads tolerated before `Timeout`.
    pub max_empty_reads: u32,
}

impl Default for ResponseReceiver {
    fn default() -> Self {
        Self {
            max_len: RESPONSE_LIMIT,
            max_empty_reads: MAX_EMPTY_READS,
        }
    }
}

impl ResponseReceiver {
    /// Create a receiver with a custom buffer limit.
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            max_len,
            ..Self::default()
        }
    }

    /// Read from `port` until a raw EOF sentinel has been observed.
    ///
    /// Returns the accumulated bytes, which may include noise before the
    /// frame; extracting the frame is the codec's job. A read yielding zero
    /// bytes (or a `TimedOut`/`WouldBlock` error from the transport) counts
    /// against the empty-read budget; any received byte resets it.
    pub fn read_frame<P: Read>(&self, port: &mut P) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.max_len.min(RESPONSE_LIMIT));
        let mut scratch = [0u8; RESPONSE_LIMIT];
        let mut empty_reads = 0;

        loop {
            let n = match port.read(&mut scratch) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    0
                },
                Err(e) => return Err(Error::Io(e)),
            };

            if n == 0 {
                empty_reads += 1;
                trace!("empty read {empty_reads}/{}", self.max_empty_reads);
                if empty_reads >= self.max_empty_reads {
                    return Err(Error::Timeout(format!(
                        "no end of frame after {} empty reads ({} bytes buffered)",
                        self.max_empty_reads,
                        buf.len()
                    )));
                }
                continue;
            }
            empty_reads = 0;

            if buf.len() + n > self.max_len {
                return Err(Error::BufferOverflow {
                    len: buf.len() + n,
                    max: self.max_len,
                });
            }

            let chunk = &scratch[..n];
            buf.extend_from_slice(chunk);
            if chunk.contains(&frame::EOF) {
                trace!("RX {} bytes", buf.len());
                return Ok(buf);
            }
        }
    }
}
