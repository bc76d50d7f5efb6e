//! IMU telemetry frames.
//!
//! A frame is 33 bytes: three 11-byte sub-records back to back. The header
//! byte 0x55 doubles as the marker byte of the first sub-record.
//!
//! ```text
//! | marker | prefix | x lo | x hi | y lo | y hi | z lo | z hi | t lo | t hi | sum |
//! ```

use core::fmt::Display;
use static_assertions::const_assert_eq;

use crate::{ImuSample, ProtocolError};

pub const HEADER: u8 = 0x55;
pub const PAYLOAD_LEN: usize = 32;
pub const FRAME_LEN: usize = 1 + PAYLOAD_LEN;
pub const SUBRECORD_LEN: usize = 11;
pub const SUBRECORDS_PER_FRAME: usize = 3;

const_assert_eq!(FRAME_LEN, SUBRECORD_LEN * SUBRECORDS_PER_FRAME);

pub const ACCEL_PREFIX: u8 = 0x51;
pub const VEL_PREFIX: u8 = 0x52;
pub const ANGLE_PREFIX: u8 = 0x53;

const RAW_FULL_SCALE: f64 = 32768.0;
const ACCEL_RANGE_G: f64 = 16.0;
const VEL_RANGE_DPS: f64 = 2000.0;
const ANGLE_RANGE_DEG: f64 = 180.0;

/// Die temperature from the raw fourth field, in degrees Celsius.
pub fn temperature(raw: i16) -> f64 {
    raw as f64 / 340.0 + 36.25
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRecordKind {
    Acceleration,
    AngularVelocity,
    Orientation,
}

impl Display for SubRecordKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            SubRecordKind::Acceleration => "accel",
            SubRecordKind::AngularVelocity => "vel",
            SubRecordKind::Orientation => "angle",
        };
        write!(f, "{}", name)
    }
}

impl SubRecordKind {
    pub fn from_prefix(prefix: u8) -> Option<Self> {
        match prefix {
            ACCEL_PREFIX => Some(SubRecordKind::Acceleration),
            VEL_PREFIX => Some(SubRecordKind::AngularVelocity),
            ANGLE_PREFIX => Some(SubRecordKind::Orientation),
            _ => None,
        }
    }

    pub fn prefix(&self) -> u8 {
        match self {
            SubRecordKind::Acceleration => ACCEL_PREFIX,
            SubRecordKind::AngularVelocity => VEL_PREFIX,
            SubRecordKind::Orientation => ANGLE_PREFIX,
        }
    }

    /// Physical value of a full-scale raw reading.
    pub fn range(&self) -> f64 {
        match self {
            SubRecordKind::Acceleration => ACCEL_RANGE_G,
            SubRecordKind::AngularVelocity => VEL_RANGE_DPS,
            SubRecordKind::Orientation => ANGLE_RANGE_DEG,
        }
    }

    pub fn scale(&self, raw: i16) -> f64 {
        raw as f64 / RAW_FULL_SCALE * self.range()
    }
}

/// One 11-byte segment of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRecord {
    pub marker: u8,
    pub prefix: u8,
    /// x, y, z, raw temperature
    pub raw: [i16; 4],
    pub checksum: u8,
}

impl SubRecord {
    pub fn from_bytes(bytes: &[u8; SUBRECORD_LEN]) -> Self {
        let mut raw = [0i16; 4];
        for (i, field) in raw.iter_mut().enumerate() {
            let lo = 2 + i * 2;
            *field = i16::from_le_bytes([bytes[lo], bytes[lo + 1]]);
        }

        Self {
            marker: bytes[0],
            prefix: bytes[1],
            raw,
            checksum: bytes[10],
        }
    }

    pub fn to_bytes(&self) -> [u8; SUBRECORD_LEN] {
        let mut bytes = [0u8; SUBRECORD_LEN];
        bytes[0] = self.marker;
        bytes[1] = self.prefix;
        for (i, field) in self.raw.iter().enumerate() {
            let lo = 2 + i * 2;
            bytes[lo..lo + 2].copy_from_slice(&field.to_le_bytes());
        }
        bytes[10] = self.checksum;
        bytes
    }

    /// Build a well-formed record with a valid checksum.
    pub fn new(kind: SubRecordKind, raw: [i16; 4]) -> Self {
        let mut record = Self {
            marker: HEADER,
            prefix: kind.prefix(),
            raw,
            checksum: 0,
        };
        record.checksum = record.expected_checksum();
        record
    }

    pub fn kind(&self) -> Option<SubRecordKind> {
        SubRecordKind::from_prefix(self.prefix)
    }

    /// Low byte of the sum of the first ten bytes.
    pub fn expected_checksum(&self) -> u8 {
        let bytes = self.to_bytes();
        bytes[..SUBRECORD_LEN - 1]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.expected_checksum()
    }
}

/// A complete frame as read off the wire, header included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    bytes: [u8; FRAME_LEN],
}

impl RawFrame {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != FRAME_LEN {
            return Err(ProtocolError::FrameLength {
                expected: FRAME_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0] != HEADER {
            return Err(ProtocolError::BadHeader(bytes[0]));
        }
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(bytes);
        Ok(Self { bytes: frame })
    }

    /// Join a header byte that was already matched with the payload read after it.
    pub fn from_payload(payload: &[u8; PAYLOAD_LEN]) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = HEADER;
        bytes[1..].copy_from_slice(payload);
        Self { bytes }
    }

    pub fn from_records(records: &[SubRecord; SUBRECORDS_PER_FRAME]) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        for (i, record) in records.iter().enumerate() {
            bytes[i * SUBRECORD_LEN..(i + 1) * SUBRECORD_LEN].copy_from_slice(&record.to_bytes());
        }
        // the first marker is the frame header no matter what the record says
        bytes[0] = HEADER;
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn sub_records(&self) -> [SubRecord; SUBRECORDS_PER_FRAME] {
        let mut records = [SubRecord {
            marker: 0,
            prefix: 0,
            raw: [0; 4],
            checksum: 0,
        }; SUBRECORDS_PER_FRAME];

        for (i, record) in records.iter_mut().enumerate() {
            let mut chunk = [0u8; SUBRECORD_LEN];
            chunk.copy_from_slice(&self.bytes[i * SUBRECORD_LEN..(i + 1) * SUBRECORD_LEN]);
            *record = SubRecord::from_bytes(&chunk);
        }
        records
    }
}

/// Whether the trailing sum byte of each sub-record is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// Accept every record with a known prefix.
    #[default]
    Ignore,
    /// Drop records whose sum byte does not match.
    Verify,
}

/// A sub-record that was dropped without touching the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    UnknownPrefix(u8),
    ChecksumMismatch { prefix: u8, expected: u8, found: u8 },
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Anomaly::UnknownPrefix(p) => write!(f, "unknown prefix {:#04x}", p),
            Anomaly::ChecksumMismatch {
                prefix,
                expected,
                found,
            } => write!(
                f,
                "checksum mismatch on {:#04x}: expected {:#04x}, found {:#04x}",
                prefix, expected, found
            ),
        }
    }
}

/// What a single frame did to the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOutcome {
    pub applied: usize,
    pub anomalies: [Option<Anomaly>; SUBRECORDS_PER_FRAME],
}

impl DecodeOutcome {
    pub fn anomaly_count(&self) -> usize {
        self.anomalies.iter().filter(|a| a.is_some()).count()
    }
}

impl ImuSample {
    /// Write the four fields owned by the record's prefix.
    pub fn apply(
        &mut self,
        record: &SubRecord,
        policy: ChecksumPolicy,
    ) -> Result<SubRecordKind, Anomaly> {
        let kind = record
            .kind()
            .ok_or(Anomaly::UnknownPrefix(record.prefix))?;

        if policy == ChecksumPolicy::Verify && !record.checksum_ok() {
            return Err(Anomaly::ChecksumMismatch {
                prefix: record.prefix,
                expected: record.expected_checksum(),
                found: record.checksum,
            });
        }

        let [x, y, z, t] = record.raw;
        let values = [kind.scale(x), kind.scale(y), kind.scale(z), temperature(t)];
        let fields = match kind {
            SubRecordKind::Acceleration => [
                &mut self.accel_x,
                &mut self.accel_y,
                &mut self.accel_z,
                &mut self.accel_t,
            ],
            SubRecordKind::AngularVelocity => [
                &mut self.vel_x,
                &mut self.vel_y,
                &mut self.vel_z,
                &mut self.vel_t,
            ],
            SubRecordKind::Orientation => [
                &mut self.angle_x,
                &mut self.angle_y,
                &mut self.angle_z,
                &mut self.angle_t,
            ],
        };
        for (field, value) in fields.into_iter().zip(values) {
            *field = value;
        }
        Ok(kind)
    }

    /// Apply every sub-record of a frame in wire order.
    pub fn decode_frame(&mut self, frame: &RawFrame, policy: ChecksumPolicy) -> DecodeOutcome {
        let mut outcome = DecodeOutcome::default();
        for (slot, record) in frame.sub_records().iter().enumerate() {
            match self.apply(record, policy) {
                Ok(_) => outcome.applied += 1,
                Err(anomaly) => outcome.anomalies[slot] = Some(anomaly),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn frame_of(records: [SubRecord; 3]) -> RawFrame {
        RawFrame::from_records(&records)
    }

    fn typical_records() -> [SubRecord; 3] {
        [
            SubRecord::new(SubRecordKind::Acceleration, [0, 16384, -16384, 340]),
            SubRecord::new(SubRecordKind::AngularVelocity, [1638, -3277, 0, 680]),
            SubRecord::new(SubRecordKind::Orientation, [8192, -8192, 16384, 0]),
        ]
    }

    #[test]
    fn decodes_acceleration() {
        let mut sample = ImuSample::default();
        let frame = frame_of(typical_records());
        let outcome = sample.decode_frame(&frame, ChecksumPolicy::Ignore);

        assert_eq!(outcome.applied, 3);
        assert_eq!(outcome.anomaly_count(), 0);
        assert_abs_diff_eq!(sample.accel_x, 0.0);
        assert_abs_diff_eq!(sample.accel_y, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.accel_z, -8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.accel_t, 37.25, epsilon = 1e-12);
    }

    #[test]
    fn decodes_velocity_and_orientation() {
        let mut sample = ImuSample::default();
        sample.decode_frame(&frame_of(typical_records()), ChecksumPolicy::Ignore);

        assert_abs_diff_eq!(sample.vel_x, 1638.0 / 32768.0 * 2000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.vel_y, -3277.0 / 32768.0 * 2000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.vel_t, 38.25, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.angle_x, 45.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.angle_y, -45.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.angle_z, 90.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.angle_t, 36.25, epsilon = 1e-12);
    }

    #[test]
    fn decoding_is_order_independent() {
        let [a, v, o] = typical_records();
        let orders = [
            [a, v, o],
            [a, o, v],
            [v, a, o],
            [v, o, a],
            [o, a, v],
            [o, v, a],
        ];

        let mut expected = ImuSample::default();
        expected.decode_frame(&frame_of(orders[0]), ChecksumPolicy::Ignore);

        for order in orders {
            let mut sample = ImuSample::default();
            sample.decode_frame(&frame_of(order), ChecksumPolicy::Ignore);
            assert_eq!(sample, expected);
        }
    }

    #[test]
    fn unknown_prefix_leaves_sample_untouched() {
        let mut sample = ImuSample::default();
        sample.decode_frame(&frame_of(typical_records()), ChecksumPolicy::Ignore);
        let before = sample;

        let mut bogus = SubRecord::new(SubRecordKind::Acceleration, [1, 2, 3, 4]);
        bogus.prefix = 0x54;
        let frame = frame_of([bogus, bogus, bogus]);
        let outcome = sample.decode_frame(&frame, ChecksumPolicy::Ignore);

        assert_eq!(sample, before);
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.anomaly_count(), 3);
        assert_eq!(outcome.anomalies[0], Some(Anomaly::UnknownPrefix(0x54)));
    }

    #[test]
    fn stale_groups_persist_across_frames() {
        let mut sample = ImuSample::default();
        sample.decode_frame(&frame_of(typical_records()), ChecksumPolicy::Ignore);

        let mut bogus = SubRecord::new(SubRecordKind::Orientation, [0; 4]);
        bogus.prefix = 0x00;
        let next = [
            SubRecord::new(SubRecordKind::Acceleration, [16384, 0, 0, 0]),
            bogus,
            bogus,
        ];
        sample.decode_frame(&frame_of(next), ChecksumPolicy::Ignore);

        assert_abs_diff_eq!(sample.accel_x, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sample.angle_z, 90.0, epsilon = 1e-12);
    }

    #[test]
    fn checksum_policy() {
        let mut record = SubRecord::new(SubRecordKind::Orientation, [100, 200, 300, 0]);
        assert!(record.checksum_ok());
        record.checksum = record.checksum.wrapping_add(1);
        assert!(!record.checksum_ok());

        let mut sample = ImuSample::default();
        assert!(sample.apply(&record, ChecksumPolicy::Ignore).is_ok());

        let mut sample = ImuSample::default();
        let err = sample.apply(&record, ChecksumPolicy::Verify).unwrap_err();
        assert!(matches!(err, Anomaly::ChecksumMismatch { prefix: 0x53, .. }));
        assert_eq!(sample, ImuSample::default());
    }

    #[test]
    fn sub_record_offsets() {
        let frame = frame_of(typical_records());
        let bytes = frame.as_bytes();
        assert_eq!(bytes[0], HEADER);
        assert_eq!(bytes[1], ACCEL_PREFIX);
        assert_eq!(bytes[11], HEADER);
        assert_eq!(bytes[12], VEL_PREFIX);
        assert_eq!(bytes[22], HEADER);
        assert_eq!(bytes[23], ANGLE_PREFIX);

        let records = frame.sub_records();
        assert_eq!(records[0].raw, [0, 16384, -16384, 340]);
        assert_eq!(records[2].kind(), Some(SubRecordKind::Orientation));
    }

    #[test]
    fn raw_frame_validation() {
        assert_eq!(
            RawFrame::from_bytes(&[HEADER; 10]),
            Err(ProtocolError::FrameLength {
                expected: FRAME_LEN,
                actual: 10
            })
        );
        assert_eq!(
            RawFrame::from_bytes(&[0u8; FRAME_LEN]),
            Err(ProtocolError::BadHeader(0))
        );

        let payload = [0x11u8; PAYLOAD_LEN];
        let frame = RawFrame::from_payload(&payload);
        assert_eq!(frame.as_bytes()[0], HEADER);
        assert_eq!(RawFrame::from_bytes(frame.as_bytes()), Ok(frame));
    }

    #[test]
    fn temperature_offsets() {
        assert_abs_diff_eq!(temperature(0), 36.25);
        assert_abs_diff_eq!(temperature(-340), 35.25, epsilon = 1e-12);
    }
}
