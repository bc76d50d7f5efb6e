//! Wire formats and data types shared by the tiltbridge host.
//!
//! IMU side: 33-byte telemetry frames decoded into an [`ImuSample`].
//! Platform side: ASCII motion commands and single-byte acknowledgements.

pub mod chunk;
pub mod cmd;
pub mod display;
pub mod error;
pub mod frame;

pub use error::ProtocolError;

#[cfg(feature = "std")]
use serde::{Deserialize, Serialize};

/// Baud rates accepted by both serial devices.
pub const BAUD_RATES: [u32; 14] = [
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 56000, 57600, 115200,
];
pub const IMU_BAUD: u32 = 115200;
pub const PLATFORM_BAUD: u32 = 9600;

pub fn is_supported_baud(baud: u32) -> bool {
    BAUD_RATES.contains(&baud)
}

/// Latest known IMU state.
///
/// Each group of four fields is written only by the sub-record that carries
/// its prefix, so a frame missing one group leaves the previous values in place.
#[cfg_attr(feature = "std", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub accel_t: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub vel_z: f64,
    pub vel_t: f64,
    pub angle_x: f64,
    pub angle_y: f64,
    pub angle_z: f64,
    pub angle_t: f64,
}

/// Field names in the order records are written: sorted by name.
pub const SAMPLE_FIELDS: [&str; 12] = [
    "accel_t", "accel_x", "accel_y", "accel_z", "angle_t", "angle_x", "angle_y", "angle_z",
    "vel_t", "vel_x", "vel_y", "vel_z",
];

impl ImuSample {
    /// acceleration in g
    pub fn acceleration(&self) -> [f64; 3] {
        [self.accel_x, self.accel_y, self.accel_z]
    }

    /// angular velocity in deg/s
    pub fn angular_velocity(&self) -> [f64; 3] {
        [self.vel_x, self.vel_y, self.vel_z]
    }

    /// orientation in degrees, before any angle reference is applied
    pub fn orientation(&self) -> [f64; 3] {
        [self.angle_x, self.angle_y, self.angle_z]
    }

    /// Values matching [`SAMPLE_FIELDS`] position for position.
    pub fn sorted_values(&self) -> [f64; 12] {
        [
            self.accel_t,
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.angle_t,
            self.angle_x,
            self.angle_y,
            self.angle_z,
            self.vel_t,
            self.vel_x,
            self.vel_y,
            self.vel_z,
        ]
    }
}

/// Offsets subtracted from raw orientation. Zero means absolute mode.
#[cfg_attr(feature = "std", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngleReference {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AngleReference {
    /// Take the current raw orientation as the new zero.
    pub fn set_relative(&mut self, sample: &ImuSample) {
        self.x = sample.angle_x;
        self.y = sample.angle_y;
        self.z = sample.angle_z;
    }

    pub fn set_absolute(&mut self) {
        *self = Self::default();
    }

    pub fn is_absolute(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    pub fn relative(&self, sample: &ImuSample) -> [f64; 3] {
        [
            sample.angle_x - self.x,
            sample.angle_y - self.y,
            sample.angle_z - self.z,
        ]
    }
}
