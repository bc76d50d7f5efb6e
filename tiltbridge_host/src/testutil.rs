//! In-memory stand-ins for serial handles.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::config::READ_POLL;

/// Reader fed byte by byte from another thread. Times out like a serial port
/// configured with [`READ_POLL`] and reports end of stream once the sender is gone.
pub struct ChannelReader {
    rx: Receiver<u8>,
}

impl ChannelReader {
    pub fn pair() -> (Sender<u8>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self { rx })
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(READ_POLL) {
            Ok(byte) => {
                buf[0] = byte;
                let mut n = 1;
                while n < buf.len() {
                    match self.rx.try_recv() {
                        Ok(b) => {
                            buf[n] = b;
                            n += 1;
                        }
                        Err(_) => break,
                    }
                }
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

/// Writer whose bytes can be inspected from the test.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Loopback platform: acknowledges every complete command written to it.
#[derive(Clone)]
pub struct FakePlatform {
    pub written: SharedBuf,
    acks: Sender<u8>,
    handled: Arc<Mutex<usize>>,
}

impl FakePlatform {
    pub fn new() -> (Self, ChannelReader) {
        let (acks, reader) = ChannelReader::pair();
        (
            Self {
                written: SharedBuf::default(),
                acks,
                handled: Arc::new(Mutex::new(0)),
            },
            reader,
        )
    }

    pub fn commands(&self) -> Vec<String> {
        self.written
            .text()
            .split_inclusive('$')
            .filter(|c| c.ends_with('$'))
            .map(String::from)
            .collect()
    }
}

impl Write for FakePlatform {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.write(buf)?;
        let commands = self.commands();
        let mut handled = self.handled.lock().unwrap_or_else(PoisonError::into_inner);
        for cmd in &commands[*handled..] {
            let ack = if cmd.starts_with("^MOVE") { b'M' } else { b'X' };
            let _ = self.acks.send(ack);
        }
        *handled = commands.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
