use thiserror::Error;

/// Validation failures raised before anything touches a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame header must be 0x55, found {0:#04x}")]
    BadHeader(u8),

    #[error("frame length mismatch: expected {expected}, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("invalid coordinate: {0:?}")]
    InvalidCoordinate(String),

    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),
}
