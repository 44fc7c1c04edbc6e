//! Sensor streaming: channel mask and sample decoding
//!
//! The 64-bit mask is split on the wire into MASK (low word) and MASK2
//! (high word). A streamed sample holds one big-endian i16 per enabled bit,
//! walking the low word from bit 31 down to bit 0, then the high word from
//! bit 63 down to bit 32.

use super::{be_i16, DecodeError};
use serde::Serialize;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Bitset selecting which telemetry channels the device streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SensorMask(u64);

impl SensorMask {
    pub const OFF: Self = Self(0);

    pub const GYRO_Z_FILTERED: Self = Self(2 << 9);
    pub const GYRO_Y_FILTERED: Self = Self(2 << 10);
    pub const GYRO_X_FILTERED: Self = Self(2 << 11);
    pub const ACCELEROMETER_Z_FILTERED: Self = Self(2 << 12);
    pub const ACCELEROMETER_Y_FILTERED: Self = Self(2 << 13);
    pub const ACCELEROMETER_X_FILTERED: Self = Self(2 << 14);
    pub const IMU_YAW_ANGLE_FILTERED: Self = Self(2 << 15);
    pub const IMU_ROLL_ANGLE_FILTERED: Self = Self(2 << 16);
    pub const IMU_PITCH_ANGLE_FILTERED: Self = Self(2 << 17);
    pub const GYRO_Z_RAW: Self = Self(2 << 21);
    pub const GYRO_Y_RAW: Self = Self(2 << 22);
    pub const GYRO_X_RAW: Self = Self(2 << 23);
    pub const ACCELEROMETER_Z_RAW: Self = Self(2 << 24);
    pub const ACCELEROMETER_Y_RAW: Self = Self(2 << 25);
    pub const ACCELEROMETER_X_RAW: Self = Self(2 << 26);
    pub const VELOCITY_Y: Self = Self(2 << 54);
    pub const VELOCITY_X: Self = Self(2 << 55);
    pub const LOCATOR_Y: Self = Self(2 << 57);
    pub const LOCATOR_X: Self = Self(2 << 58);

    pub const GYRO_FILTERED_ALL: Self =
        Self(Self::GYRO_Z_FILTERED.0 | Self::GYRO_Y_FILTERED.0 | Self::GYRO_X_FILTERED.0);
    pub const GYRO_RAW_ALL: Self = Self(Self::GYRO_Z_RAW.0 | Self::GYRO_Y_RAW.0 | Self::GYRO_X_RAW.0);
    pub const IMU_ANGLES_FILTERED_ALL: Self = Self(
        Self::IMU_YAW_ANGLE_FILTERED.0
            | Self::IMU_ROLL_ANGLE_FILTERED.0
            | Self::IMU_PITCH_ANGLE_FILTERED.0,
    );
    pub const ACCELEROMETER_FILTERED_ALL: Self = Self(
        Self::ACCELEROMETER_Z_FILTERED.0
            | Self::ACCELEROMETER_Y_FILTERED.0
            | Self::ACCELEROMETER_X_FILTERED.0,
    );
    pub const ACCELEROMETER_RAW: Self = Self(
        Self::ACCELEROMETER_Z_RAW.0 | Self::ACCELEROMETER_Y_RAW.0 | Self::ACCELEROMETER_X_RAW.0,
    );
    pub const LOCATOR_ALL: Self = Self(
        Self::LOCATOR_X.0 | Self::LOCATOR_Y.0 | Self::VELOCITY_X.0 | Self::VELOCITY_Y.0,
    );

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn is_off(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// MASK field: bits 0..32
    pub const fn low_word(&self) -> u32 {
        self.0 as u32
    }

    /// MASK2 field: bits 32..64
    pub const fn high_word(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Number of i16 samples one streamed frame carries
    pub fn channel_count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Enabled bit positions in wire order
    pub fn stream_order(&self) -> impl Iterator<Item = u32> + '_ {
        (0..32u32)
            .rev()
            .chain((32..64u32).rev())
            .filter(move |bit| self.0 & (1u64 << bit) != 0)
    }

    fn named(name: &str) -> Option<Self> {
        let mask = match name {
            "off" => Self::OFF,
            "gyroZFiltered" => Self::GYRO_Z_FILTERED,
            "gyroYFiltered" => Self::GYRO_Y_FILTERED,
            "gyroXFiltered" => Self::GYRO_X_FILTERED,
            "accelerometerZFiltered" => Self::ACCELEROMETER_Z_FILTERED,
            "accelerometerYFiltered" => Self::ACCELEROMETER_Y_FILTERED,
            "accelerometerXFiltered" => Self::ACCELEROMETER_X_FILTERED,
            "imuYawAngleFiltered" => Self::IMU_YAW_ANGLE_FILTERED,
            "imuRollAngleFiltered" => Self::IMU_ROLL_ANGLE_FILTERED,
            "imuPitchAngleFiltered" => Self::IMU_PITCH_ANGLE_FILTERED,
            "gyroZRaw" => Self::GYRO_Z_RAW,
            "gyroYRaw" => Self::GYRO_Y_RAW,
            "gyroXRaw" => Self::GYRO_X_RAW,
            "accelerometerZRaw" => Self::ACCELEROMETER_Z_RAW,
            "accelerometerYRaw" => Self::ACCELEROMETER_Y_RAW,
            "accelerometerXRaw" => Self::ACCELEROMETER_X_RAW,
            "locatorX" => Self::LOCATOR_X,
            "locatorY" => Self::LOCATOR_Y,
            "velocityX" => Self::VELOCITY_X,
            "velocityY" => Self::VELOCITY_Y,
            "gyroFilteredAll" => Self::GYRO_FILTERED_ALL,
            "gyroRawAll" => Self::GYRO_RAW_ALL,
            "imuAnglesFilteredAll" => Self::IMU_ANGLES_FILTERED_ALL,
            "accelerometerFilteredAll" => Self::ACCELEROMETER_FILTERED_ALL,
            "accelerometerRaw" => Self::ACCELEROMETER_RAW,
            "locatorAll" => Self::LOCATOR_ALL,
            _ => return None,
        };
        Some(mask)
    }
}

impl BitOr for SensorMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SensorMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SensorMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

/// Parses `0x...` hex or a comma-separated list of channel names
/// (`locatorAll,accelerometerFilteredAll`).
impl FromStr for SensorMask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16)
                .map(Self)
                .map_err(|e| format!("invalid mask '{}': {}", s, e));
        }

        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .try_fold(Self::OFF, |acc, name| {
                Self::named(name)
                    .map(|m| acc | m)
                    .ok_or_else(|| format!("unknown sensor '{}'", name))
            })
    }
}

// =============================================================================
// Sample records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TwoAxis<T> {
    pub x: Option<T>,
    pub y: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ThreeAxis<T> {
    pub x: Option<T>,
    pub y: Option<T>,
    pub z: Option<T>,
}

impl ThreeAxis<f64> {
    /// Squared magnitude, when all three axes are present
    pub fn magnitude_squared(&self) -> Option<f64> {
        Some(self.x? * self.x? + self.y? * self.y? + self.z? * self.z?)
    }
}

/// Locator: position in cm, velocity in cm/s
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LocatorData {
    pub position: Option<TwoAxis<f64>>,
    pub velocity: Option<TwoAxis<f64>>,
}

/// IMU angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AttitudeData {
    pub yaw: Option<i32>,
    pub pitch: Option<i32>,
    pub roll: Option<i32>,
}

/// Rotation rates in degrees per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GyroscopeData {
    pub filtered: Option<ThreeAxis<i32>>,
    pub raw: Option<ThreeAxis<i32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AccelerometerData {
    /// Acceleration in g
    pub filtered: Option<ThreeAxis<f64>>,
    /// Raw counts
    pub raw: Option<ThreeAxis<i32>>,
}

/// One streamed sample
///
/// A sub-record is `None` when none of its channels was requested, which
/// is different from a reading of zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SensorFrame {
    pub locator: Option<LocatorData>,
    pub orientation: Option<AttitudeData>,
    pub gyroscope: Option<GyroscopeData>,
    pub accelerometer: Option<AccelerometerData>,
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

fn set_axis<T>(target: &mut ThreeAxis<T>, axis: Axis, value: T) {
    match axis {
        Axis::X => target.x = Some(value),
        Axis::Y => target.y = Some(value),
        Axis::Z => target.z = Some(value),
    }
}

fn set_plane<T>(target: &mut TwoAxis<T>, axis: Axis, value: T) {
    match axis {
        Axis::X => target.x = Some(value),
        _ => target.y = Some(value),
    }
}

impl SensorFrame {
    /// Decode a sensor stream payload for the mask in force
    ///
    /// A packet may carry several samples back to back; each becomes its
    /// own frame.
    pub fn decode(mask: SensorMask, data: &[u8]) -> Result<Vec<SensorFrame>, DecodeError> {
        let count = mask.channel_count();
        if count == 0 {
            return Err(DecodeError::SensorsDisabled);
        }

        let frame_len = count * 2;
        if data.is_empty() || data.len() % frame_len != 0 {
            return Err(DecodeError::WrongLength {
                what: "sensor",
                expected: frame_len,
                actual: data.len(),
            });
        }

        Ok(data
            .chunks_exact(frame_len)
            .map(|chunk| Self::decode_one(mask, chunk))
            .collect())
    }

    fn decode_one(mask: SensorMask, chunk: &[u8]) -> SensorFrame {
        let mut frame = SensorFrame::default();

        for (index, bit) in mask.stream_order().enumerate() {
            let value = be_i16(chunk, index * 2);
            frame.apply(bit, value);
        }

        frame
    }

    fn apply(&mut self, bit: u32, value: i16) {
        let v = i32::from(value);
        match bit {
            27 => set_axis(self.accel_raw(), Axis::X, v),
            26 => set_axis(self.accel_raw(), Axis::Y, v),
            25 => set_axis(self.accel_raw(), Axis::Z, v),
            24 => set_axis(self.gyro_raw(), Axis::X, v / 10),
            23 => set_axis(self.gyro_raw(), Axis::Y, v / 10),
            22 => set_axis(self.gyro_raw(), Axis::Z, v / 10),
            18 => self.attitude().pitch = Some(v),
            17 => self.attitude().roll = Some(v),
            16 => self.attitude().yaw = Some(v),
            15 => set_axis(self.accel_filtered(), Axis::X, f64::from(value) / 4096.0),
            14 => set_axis(self.accel_filtered(), Axis::Y, f64::from(value) / 4096.0),
            13 => set_axis(self.accel_filtered(), Axis::Z, f64::from(value) / 4096.0),
            12 => set_axis(self.gyro_filtered(), Axis::X, v / 10),
            11 => set_axis(self.gyro_filtered(), Axis::Y, v / 10),
            10 => set_axis(self.gyro_filtered(), Axis::Z, v / 10),
            59 => set_plane(self.position(), Axis::X, f64::from(value)),
            58 => set_plane(self.position(), Axis::Y, f64::from(value)),
            56 => set_plane(self.velocity(), Axis::X, f64::from(value)),
            55 => set_plane(self.velocity(), Axis::Y, f64::from(value)),
            // Channels this engine does not model still occupy a slot
            _ => {}
        }
    }

    fn accelerometer(&mut self) -> &mut AccelerometerData {
        self.accelerometer.get_or_insert_with(Default::default)
    }

    fn accel_raw(&mut self) -> &mut ThreeAxis<i32> {
        self.accelerometer().raw.get_or_insert_with(Default::default)
    }

    fn accel_filtered(&mut self) -> &mut ThreeAxis<f64> {
        self.accelerometer()
            .filtered
            .get_or_insert_with(Default::default)
    }

    fn gyroscope(&mut self) -> &mut GyroscopeData {
        self.gyroscope.get_or_insert_with(Default::default)
    }

    fn gyro_raw(&mut self) -> &mut ThreeAxis<i32> {
        self.gyroscope().raw.get_or_insert_with(Default::default)
    }

    fn gyro_filtered(&mut self) -> &mut ThreeAxis<i32> {
        self.gyroscope().filtered.get_or_insert_with(Default::default)
    }

    fn attitude(&mut self) -> &mut AttitudeData {
        self.orientation.get_or_insert_with(Default::default)
    }

    fn locator(&mut self) -> &mut LocatorData {
        self.locator.get_or_insert_with(Default::default)
    }

    fn position(&mut self) -> &mut TwoAxis<f64> {
        self.locator().position.get_or_insert_with(Default::default)
    }

    fn velocity(&mut self) -> &mut TwoAxis<f64> {
        self.locator().velocity.get_or_insert_with(Default::default)
    }

    /// Filtered acceleration vector, if all three axes were streamed
    pub fn filtered_acceleration(&self) -> Option<ThreeAxis<f64>> {
        self.accelerometer.and_then(|a| a.filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    #[test]
    fn test_mask_bit_positions() {
        assert_eq!(SensorMask::GYRO_Z_FILTERED.bits(), 1 << 10);
        assert_eq!(SensorMask::ACCELEROMETER_X_RAW.bits(), 1 << 27);
        assert_eq!(SensorMask::LOCATOR_X.bits(), 1 << 59);
        assert_eq!(SensorMask::VELOCITY_Y.bits(), 1 << 55);
        assert_eq!(SensorMask::LOCATOR_ALL.channel_count(), 4);
    }

    #[test]
    fn test_mask_words() {
        let mask = SensorMask::LOCATOR_ALL | SensorMask::ACCELEROMETER_FILTERED_ALL;
        assert_eq!(mask.low_word(), 0x0000_E000);
        assert_eq!(mask.high_word(), 0x0D80_0000);
    }

    #[test]
    fn test_stream_order_low_then_high() {
        let mask = SensorMask::LOCATOR_X | SensorMask::GYRO_Z_FILTERED | SensorMask::ACCELEROMETER_X_RAW;
        let order: Vec<u32> = mask.stream_order().collect();
        assert_eq!(order, vec![27, 10, 59]);
    }

    #[test]
    fn test_decode_locator_only() {
        let data = samples(&[120, -45, 30, -5]);
        let frames = SensorFrame::decode(SensorMask::LOCATOR_ALL, &data).unwrap();
        assert_eq!(frames.len(), 1);

        let frame = frames[0];
        let locator = frame.locator.unwrap();
        assert_eq!(locator.position.unwrap().x, Some(120.0));
        assert_eq!(locator.position.unwrap().y, Some(-45.0));
        assert_eq!(locator.velocity.unwrap().x, Some(30.0));
        assert_eq!(locator.velocity.unwrap().y, Some(-5.0));

        // Not requested means absent, not zero
        assert!(frame.accelerometer.is_none());
        assert!(frame.gyroscope.is_none());
        assert!(frame.orientation.is_none());
    }

    #[test]
    fn test_decode_filtered_accelerometer_and_gyro() {
        let mask = SensorMask::ACCELEROMETER_FILTERED_ALL | SensorMask::GYRO_FILTERED_ALL;
        // accel X, Y, Z then gyro X, Y, Z
        let data = samples(&[4096, -2048, 0, 125, -30, 9]);
        let frame = SensorFrame::decode(mask, &data).unwrap()[0];

        let accel = frame.filtered_acceleration().unwrap();
        assert_eq!(accel.x, Some(1.0));
        assert_eq!(accel.y, Some(-0.5));
        assert_eq!(accel.z, Some(0.0));
        assert_eq!(accel.magnitude_squared(), Some(1.25));
        assert!(frame.accelerometer.unwrap().raw.is_none());

        let gyro = frame.gyroscope.unwrap().filtered.unwrap();
        assert_eq!(gyro.x, Some(12));
        assert_eq!(gyro.y, Some(-3));
        assert_eq!(gyro.z, Some(0));
    }

    #[test]
    fn test_decode_partial_axes() {
        let data = samples(&[17]);
        let frame = SensorFrame::decode(SensorMask::IMU_YAW_ANGLE_FILTERED, &data).unwrap()[0];
        let attitude = frame.orientation.unwrap();
        assert_eq!(attitude.yaw, Some(17));
        assert_eq!(attitude.pitch, None);
        assert_eq!(attitude.roll, None);
    }

    #[test]
    fn test_decode_multiple_samples_per_packet() {
        let data = samples(&[1, 2, 3, 4]);
        let frames = SensorFrame::decode(SensorMask::LOCATOR_X | SensorMask::LOCATOR_Y, &data).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].locator.unwrap().position.unwrap().x, Some(3.0));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let data = samples(&[1, 2, 3]);
        assert!(SensorFrame::decode(SensorMask::LOCATOR_ALL, &data).is_err());
        assert!(SensorFrame::decode(SensorMask::LOCATOR_ALL, &[]).is_err());
    }

    #[test]
    fn test_decode_rejects_when_off() {
        assert_eq!(
            SensorFrame::decode(SensorMask::OFF, &[0, 1]),
            Err(DecodeError::SensorsDisabled)
        );
    }

    #[test]
    fn test_mask_from_str() {
        let mask: SensorMask = "locatorAll, accelerometerFilteredAll".parse().unwrap();
        assert_eq!(
            mask,
            SensorMask::LOCATOR_ALL | SensorMask::ACCELEROMETER_FILTERED_ALL
        );
        let hex: SensorMask = "0x400".parse().unwrap();
        assert_eq!(hex, SensorMask::GYRO_Z_FILTERED);
        assert!("bogus".parse::<SensorMask>().is_err());
    }
}
