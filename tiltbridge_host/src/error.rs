use std::path::PathBuf;

use thiserror::Error;
use tiltbridge_common::ProtocolError;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Opening or using a serial handle failed.
    #[error("serial connection failed on {port}: {source}")]
    Connection {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Input rejected before any device was touched.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("platform is still executing the previous move")]
    Busy,

    #[error("platform is not connected")]
    Disconnected,

    #[error("recording to {path} failed: {source}")]
    Recording {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("worker thread panicked")]
    WorkerPanicked,
}

impl BridgeError {
    pub fn connection(port: impl Into<String>, source: serialport::Error) -> Self {
        Self::Connection {
            port: port.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
