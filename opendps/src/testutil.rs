//! Scripted mock serial port shared by the unit tests.

use std::collections::VecDeque;
use std::io::{Read, Write};

/// Mock serial port with separate read/write buffers.
///
/// Reads are scripted as discrete chunks, one chunk per `read` call, the
/// way a real serial port hands data to the caller. An exhausted script
/// behaves like an idle port and reports `TimedOut`.
pub struct MockSerial {
    reads: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    pub fail_writes: bool,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            reads: VecDeque::new(),
            written: Vec::new(),
            fail_writes: false,
        }
    }

    /// Script a chunk to be returned by one future `read` call.
    pub fn push_read(&mut self, chunk: impl Into<Vec<u8>>) -> &mut Self {
        self.reads.push_back(chunk.into());
        self
    }

    /// Script one empty read (a per-call timeout on a quiet link).
    pub fn push_timeout(&mut self) -> &mut Self {
        self.reads.push_back(Vec::new());
        self
    }

    /// Split everything written so far into raw frames on the EOF byte.
    ///
    /// EOF never appears escaped inside a frame, so this split is exact.
    pub fn written_frames(&self) -> Vec<Vec<u8>> {
        self.written
            .split_inclusive(|&b| b == crate::protocol::frame::EOF)
            .filter(|chunk| chunk.contains(&crate::protocol::frame::EOF))
            .map(<[u8]>::to_vec)
            .collect()
    }
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.reads.pop_front() {
            Some(chunk) if chunk.is_empty() => {
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"))
            },
            Some(chunk) => {
                assert!(chunk.len() <= buf.len(), "scripted chunk larger than read buffer");
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            },
            None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
        }
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.fail_writes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link down",
            ));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
