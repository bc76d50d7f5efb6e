use core::fmt::Display;

#[cfg(feature = "std")]
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

pub const MOVE_DONE: u8 = b'M';
pub const ZERO_DONE: u8 = b'X';

/// Lead screw ratio assumed until the operator enters another one.
pub const DEFAULT_STEPS_PER_MM: i32 = 300;

/// Single-byte replies from the platform.
#[cfg_attr(feature = "std", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformAck {
    MoveDone,
    ZeroDone,
}

impl Display for PlatformAck {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl PlatformAck {
    /// `None` for bytes the platform protocol does not define.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            MOVE_DONE => Some(PlatformAck::MoveDone),
            ZERO_DONE => Some(PlatformAck::ZeroDone),
            _ => None,
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            PlatformAck::MoveDone => MOVE_DONE,
            PlatformAck::ZeroDone => ZERO_DONE,
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            PlatformAck::MoveDone => "move-done",
            PlatformAck::ZeroDone => "zero-done",
        }
    }
}

/// Four axis targets in motor steps.
pub type Coords = [i32; 4];

#[cfg_attr(feature = "std", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCommand {
    Move(Coords),
    Zero,
}

impl Display for PlatformCommand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PlatformCommand::Move([c1, c2, c3, c4]) => {
                write!(f, "^MOVE,{},{},{},{}$", c1, c2, c3, c4)
            }
            PlatformCommand::Zero => write!(f, "^ZERO$"),
        }
    }
}

impl PlatformCommand {
    /// MOVE whose second and fourth axes mirror the first and third.
    pub fn synced_move(c1: i32, c3: i32) -> Self {
        PlatformCommand::Move([c1, c1.saturating_neg(), c3, c3.saturating_neg()])
    }

    /// ASCII bytes as they go on the wire.
    pub fn to_wire(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// The ack that completes this command.
    pub fn expected_ack(&self) -> PlatformAck {
        match self {
            PlatformCommand::Move(_) => PlatformAck::MoveDone,
            PlatformCommand::Zero => PlatformAck::ZeroDone,
        }
    }
}

pub fn parse_coordinate(text: &str) -> Result<i32, ProtocolError> {
    text.trim()
        .parse::<i32>()
        .map_err(|_| ProtocolError::InvalidCoordinate(text.to_string()))
}

/// Millimetre readout of a step count, `0.000` when the ratio is unusable.
pub fn steps_to_mm(steps: i32, steps_per_mm: i32) -> String {
    if steps_per_mm > 0 {
        format!("{:5.3}", steps as f64 / steps_per_mm as f64)
    } else {
        String::from("0.000")
    }
}

/// The operator's four coordinate inputs.
///
/// In sync mode the second and fourth inputs are blank and derived from the
/// first and third when a MOVE is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinateInputs {
    values: Coords,
    sync: bool,
}

impl CoordinateInputs {
    pub fn values(&self) -> Coords {
        self.values
    }

    pub fn is_synced(&self) -> bool {
        self.sync
    }

    pub fn set(&mut self, values: Coords) {
        self.values = values;
    }

    pub fn set_axis(&mut self, axis: usize, value: i32) {
        if let Some(slot) = self.values.get_mut(axis) {
            *slot = value;
        }
    }

    /// Switching sync off re-enables the mirrored inputs at zero.
    pub fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
        self.values[1] = 0;
        self.values[3] = 0;
    }

    pub fn move_command(&self) -> PlatformCommand {
        if self.sync {
            PlatformCommand::synced_move(self.values[0], self.values[2])
        } else {
            PlatformCommand::Move(self.values)
        }
    }

    /// Build ZERO and clear the inputs right away. The device ack does not
    /// carry positions, so the reset is not confirmed.
    pub fn zero_command(&mut self) -> PlatformCommand {
        self.values = [0; 4];
        PlatformCommand::Zero
    }

    /// Millimetre readouts; mirrored axes read blank while synced.
    pub fn mm_readout(&self, steps_per_mm: i32) -> [String; 4] {
        let mut out: [String; 4] = Default::default();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if self.sync && (i == 1 || i == 3) {
                String::new()
            } else {
                steps_to_mm(self.values[i], steps_per_mm)
            };
        }
        out
    }
}
