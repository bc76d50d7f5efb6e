use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serialport::SerialPort;
use thiserror::Error;

use crate::config::{SerialConfig, READ_POLL};
use crate::error::{BridgeError, Result};

/// Open a serial port with the short poll timeout the workers rely on.
pub fn open(config: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    info!("Opening {} at {} baud...", config.port, config.baud);
    match serialport::new(&config.port, config.baud)
        .timeout(READ_POLL)
        .open()
    {
        Ok(port) => {
            info!("Opened {}", config.port);
            Ok(port)
        }
        Err(e) => {
            warn!("Failed to open serial port {}: {}", config.port, e);
            Err(BridgeError::connection(&config.port, e))
        }
    }
}

/// Shared flag a session raises to stop its worker.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A reader whose timed-out reads are retried until data arrives or the
/// stop flag goes up, so callers see an indefinitely blocking read that can
/// still be cancelled.
pub struct CancellableReader<R> {
    inner: R,
    stop: StopFlag,
}

impl<R: Read> CancellableReader<R> {
    pub fn new(inner: R, stop: StopFlag) -> Self {
        Self { inner, stop }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.stop.is_raised() {
                return Err(io::Error::new(ErrorKind::ConnectionAborted, Cancelled));
            }
            match self.inner.read(buf) {
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                other => return other,
            }
        }
    }
}

/// Payload of the error a [`CancellableReader`] returns after a stop request.
#[derive(Debug, Error)]
#[error("read cancelled")]
pub struct Cancelled;

/// True only for the error a [`CancellableReader`] returns after a stop
/// request, not for a `ConnectionAborted` coming from the driver.
pub fn is_cancelled(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<Cancelled>())
}
