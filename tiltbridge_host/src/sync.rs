use std::io::{self, ErrorKind, Read};

use log::debug;
use tiltbridge_common::frame::{RawFrame, HEADER, PAYLOAD_LEN};

/// Splits an IMU byte stream into frames.
///
/// Bytes are scanned one at a time for the 0x55 header, then the 32 payload
/// bytes after it are taken as they come. There is no resynchronization: after
/// a desync any 0x55, including one inside stale payload, starts a frame.
///
/// The iterator ends after the first I/O error, or quietly when the stream
/// ends between frames. A stream ending inside a frame yields `UnexpectedEof`.
pub struct FrameSync<R> {
    reader: R,
    skipped: u64,
    done: bool,
}

impl<R: Read> FrameSync<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            skipped: 0,
            done: false,
        }
    }

    /// Bytes discarded while hunting for a header.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_frame(&mut self) -> io::Result<Option<RawFrame>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) if byte[0] == HEADER => break,
                Ok(_) => self.skipped += 1,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut payload = [0u8; PAYLOAD_LEN];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(RawFrame::from_payload(&payload)))
    }
}

impl<R: Read> Iterator for FrameSync<R> {
    type Item = io::Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                debug!("IMU stream ended after skipping {} bytes", self.skipped);
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
