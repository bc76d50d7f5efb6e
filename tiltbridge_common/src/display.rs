//! Decimation of decoded samples down to a readable refresh rate.

#[cfg(feature = "std")]
use serde::{Deserialize, Serialize};

use crate::{AngleReference, ImuSample};

/// Frames consumed per emitted display sample.
pub const THROTTLE_RATIO: u32 = 16;

/// Counts frames down and fires on every [`THROTTLE_RATIO`]th one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    remaining: u32,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            remaining: THROTTLE_RATIO - 1,
        }
    }
}

impl Throttle {
    /// Register one frame. Returns true when a display sample is due.
    pub fn tick(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            false
        } else {
            self.remaining = THROTTLE_RATIO - 1;
            true
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Right-align `value` in `width` columns with the sign kept in the first
/// column, e.g. `-  3.2` rather than `  -3.2`.
pub fn format_signed(value: f64, width: usize, precision: usize) -> String {
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let digits = format!("{:.*}", precision, value.abs());
    let pad = width.saturating_sub(sign.len() + digits.len());
    format!("{}{}{}", sign, " ".repeat(pad), digits)
}

pub fn format_angle(value: f64) -> String {
    format_signed(value, 6, 1)
}

pub fn format_accel(value: f64) -> String {
    format_signed(value, 6, 2)
}

pub fn format_vel(value: f64) -> String {
    format_signed(value, 5, 0)
}

/// A throttled reading ready for display: orientation relative to the
/// current reference plus the raw acceleration and angular velocity.
#[cfg_attr(feature = "std", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySample {
    pub angle: [f64; 3],
    pub accel: [f64; 3],
    pub vel: [f64; 3],
    pub angle_text: [String; 3],
    pub accel_text: [String; 3],
    pub vel_text: [String; 3],
}

impl DisplaySample {
    pub fn new(sample: &ImuSample, reference: &AngleReference) -> Self {
        let angle = reference.relative(sample);
        let accel = sample.acceleration();
        let vel = sample.angular_velocity();

        Self {
            angle,
            accel,
            vel,
            angle_text: angle.map(format_angle),
            accel_text: accel.map(format_accel),
            vel_text: vel.map(format_vel),
        }
    }

    /// What the display shows after a disconnect.
    pub fn zeroed() -> Self {
        Self::new(&ImuSample::default(), &AngleReference::default())
    }
}

impl core::fmt::Display for DisplaySample {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "angle {} {} {} | accel {} {} {} | vel {} {} {}",
            self.angle_text[0],
            self.angle_text[1],
            self.angle_text[2],
            self.accel_text[0],
            self.accel_text[1],
            self.accel_text[2],
            self.vel_text[0],
            self.vel_text[1],
            self.vel_text[2],
        )
    }
}
