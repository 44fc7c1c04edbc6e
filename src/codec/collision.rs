//! Collision async payload (fixed 16-byte layout)
//!
//! ```text
//! 0..2   accel X   i16 BE / 4096.0 -> g
//! 2..4   accel Y   i16 BE / 4096.0
//! 4..6   accel Z   i16 BE / 4096.0
//! 6      axis      bit0 = X, bit1 = Y
//! 7..9   power X   u16 BE
//! 9..11  power Y   u16 BE
//! 11     speed     u8 / 255.0
//! 12..16 timestamp u32 BE milliseconds
//! ```

use super::{be_i16, be_u16, be_u32, DecodeError};
use serde::Serialize;

/// Size of a collision payload on the wire
pub const COLLISION_DATA_LEN: usize = 16;

/// Scale from raw accelerometer counts to g
pub const ACCEL_COUNTS_PER_G: f64 = 4096.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollisionAcceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollisionAxis {
    pub x: bool,
    pub y: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollisionPower {
    pub x: f64,
    pub y: f64,
}

/// A decoded collision; immutable once built
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CollisionEvent {
    /// Acceleration at impact, in g
    pub impact_acceleration: CollisionAcceleration,
    /// Which axes crossed their threshold
    pub impact_axis: CollisionAxis,
    /// Raw impact magnitude per axis
    pub impact_power: CollisionPower,
    /// Normalized speed at impact, 0..=1
    pub impact_speed: f64,
    /// Device timestamp in seconds
    pub timestamp: f64,
}

impl CollisionEvent {
    /// Decode a 16-byte collision payload
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != COLLISION_DATA_LEN {
            return Err(DecodeError::WrongLength {
                what: "collision",
                expected: COLLISION_DATA_LEN,
                actual: data.len(),
            });
        }

        let accel = |offset| f64::from(be_i16(data, offset)) / ACCEL_COUNTS_PER_G;
        let mask = data[6];

        Ok(Self {
            impact_acceleration: CollisionAcceleration {
                x: accel(0),
                y: accel(2),
                z: accel(4),
            },
            impact_axis: CollisionAxis {
                x: mask & 0x01 != 0,
                y: mask & 0x02 != 0,
            },
            impact_power: CollisionPower {
                x: f64::from(be_u16(data, 7)),
                y: f64::from(be_u16(data, 9)),
            },
            impact_speed: f64::from(data[11]) / 255.0,
            timestamp: f64::from(be_u32(data, 12)) / 1000.0,
        })
    }

    /// Direction of the impact in degrees, `atan2(-x, -y)`
    pub fn impact_angle(&self) -> f64 {
        (-self.impact_acceleration.x)
            .atan2(-self.impact_acceleration.y)
            .to_degrees()
    }

    /// Encode back to the wire layout (device side)
    ///
    /// Values are truncated to the wire resolution.
    pub fn encode(&self) -> [u8; COLLISION_DATA_LEN] {
        let mut out = [0u8; COLLISION_DATA_LEN];
        let counts = |g: f64| ((g * ACCEL_COUNTS_PER_G) as i16).to_be_bytes();
        out[0..2].copy_from_slice(&counts(self.impact_acceleration.x));
        out[2..4].copy_from_slice(&counts(self.impact_acceleration.y));
        out[4..6].copy_from_slice(&counts(self.impact_acceleration.z));
        out[6] = u8::from(self.impact_axis.x) | (u8::from(self.impact_axis.y) << 1);
        out[7..9].copy_from_slice(&(self.impact_power.x as u16).to_be_bytes());
        out[9..11].copy_from_slice(&(self.impact_power.y as u16).to_be_bytes());
        out[11] = (self.impact_speed.clamp(0.0, 1.0) * 255.0).round() as u8;
        out[12..16].copy_from_slice(&((self.timestamp * 1000.0) as u32).to_be_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const REFERENCE: [u8; 16] = [
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x10, 0x00, 0x20, 0xFF, 0x00, 0x00, 0x03,
        0xE8,
    ];

    #[test]
    fn test_decode_reference_payload() {
        let event = CollisionEvent::decode(&REFERENCE).unwrap();
        assert_eq!(event.impact_axis, CollisionAxis { x: true, y: true });
        assert_eq!(event.impact_speed, 1.0);
        assert_eq!(event.timestamp, 1.0);
        assert_eq!(event.impact_power.x, 16.0);
        assert_eq!(event.impact_power.y, 32.0);
        assert_eq!(event.impact_acceleration.z, 0.0);
    }

    #[test]
    fn test_decode_negative_acceleration() {
        let mut data = REFERENCE;
        // 0xF000 = -4096 -> -1.0 g
        data[0] = 0xF0;
        data[1] = 0x00;
        // 0x0800 = 2048 -> 0.5 g
        data[2] = 0x08;
        let event = CollisionEvent::decode(&data).unwrap();
        assert_eq!(event.impact_acceleration.x, -1.0);
        assert_eq!(event.impact_acceleration.y, 0.5);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            CollisionEvent::decode(&REFERENCE[..15]),
            Err(DecodeError::WrongLength { actual: 15, .. })
        ));
        let mut long = REFERENCE.to_vec();
        long.push(0);
        assert!(CollisionEvent::decode(&long).is_err());
        assert!(CollisionEvent::decode(&[]).is_err());
    }

    #[test]
    fn test_impact_angle() {
        let mut event = CollisionEvent::decode(&REFERENCE).unwrap();
        event.impact_acceleration.x = 0.0;
        event.impact_acceleration.y = -1.0;
        assert!((event.impact_angle() - 0.0).abs() < 1e-9);

        event.impact_acceleration.x = -1.0;
        event.impact_acceleration.y = 0.0;
        assert!((event.impact_angle() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_encode_reference_payload() {
        let event = CollisionEvent::decode(&REFERENCE).unwrap();
        assert_eq!(event.encode(), REFERENCE);
    }

    proptest! {
        #[test]
        fn prop_acceleration_is_twos_complement_over_4096(data in proptest::collection::vec(any::<u8>(), 16)) {
            let event = CollisionEvent::decode(&data).unwrap();
            let expected_x = f64::from(i16::from_be_bytes([data[0], data[1]])) / 4096.0;
            let expected_y = f64::from(i16::from_be_bytes([data[2], data[3]])) / 4096.0;
            let expected_z = f64::from(i16::from_be_bytes([data[4], data[5]])) / 4096.0;
            prop_assert_eq!(event.impact_acceleration.x, expected_x);
            prop_assert_eq!(event.impact_acceleration.y, expected_y);
            prop_assert_eq!(event.impact_acceleration.z, expected_z);
            prop_assert!((0.0..=1.0).contains(&event.impact_speed));
        }

        #[test]
        fn prop_any_other_length_is_rejected(len in 0usize..64) {
            prop_assume!(len != COLLISION_DATA_LEN);
            let data = vec![0u8; len];
            prop_assert!(CollisionEvent::decode(&data).is_err());
        }
    }
}
