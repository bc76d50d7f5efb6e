use std::time::Duration;

use tiltbridge_common::{is_supported_baud, ProtocolError, IMU_BAUD, PLATFORM_BAUD};

use crate::error::{BridgeError, Result};

/// How often a blocked read wakes up to check for a stop request.
pub const READ_POLL: Duration = Duration::from_millis(100);

/// A port identifier and baud rate, validated before anything is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud: u32) -> Result<Self> {
        let port = port.into();
        if port.trim().is_empty() {
            return Err(BridgeError::validation("no serial port selected"));
        }
        if !is_supported_baud(baud) {
            return Err(ProtocolError::UnsupportedBaud(baud).into());
        }
        Ok(Self { port, baud })
    }

    pub fn imu(port: impl Into<String>) -> Result<Self> {
        Self::new(port, IMU_BAUD)
    }

    pub fn platform(port: impl Into<String>) -> Result<Self> {
        Self::new(port, PLATFORM_BAUD)
    }
}
