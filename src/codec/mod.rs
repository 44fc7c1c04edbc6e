//! Binary codec for the toy protocol
//!
//! Stateless conversion between typed values and exact wire layouts:
//! - **packet**: frame envelope (start bytes, sequence, length, checksum)
//! - **command**: outgoing command payloads, with input clamping
//! - **collision / sensor / device**: inbound payload decoders
//!
//! Nothing in here performs I/O. Decoders never panic on wire input; they
//! return `DecodeError`, which the session turns into a logged drop.

pub mod collision;
pub mod command;
pub mod device;
pub mod packet;
pub mod sensor;

pub use collision::{CollisionAcceleration, CollisionAxis, CollisionEvent, CollisionPower};
pub use command::{
    Color, CollisionConfig, Command, RollMode, Stabilization, ToyOptions,
};
pub use device::{AppVersion, ChargeState, PowerState, ToyModel, VersionInfo};
pub use sensor::{
    AccelerometerData, AttitudeData, GyroscopeData, LocatorData, SensorFrame, SensorMask,
    ThreeAxis, TwoAxis,
};

use crate::error::LinkError;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// Device id + command id pair identifying a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Opcode {
    pub device: u8,
    pub command: u8,
}

/// One outgoing command, ready for framing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub sequence: u8,
    pub opcode: Opcode,
    pub payload: Bytes,
}

/// Async id: power notification
pub const ASYNC_POWER_NOTIFICATION: u8 = 0x01;
/// Async id: streamed sensor samples
pub const ASYNC_SENSOR_DATA: u8 = 0x03;
/// Async id: pre-sleep warning
pub const ASYNC_SLEEP_WARNING: u8 = 0x05;
/// Async id: collision detected
pub const ASYNC_COLLISION: u8 = 0x07;
/// Async id: device went to sleep
pub const ASYNC_DID_SLEEP: u8 = 0x14;

/// Asynchronous packet types the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AsyncEventType {
    SensorData,
    SleepWarning,
    Collision,
    DidSleep,
    Other(u8),
}

impl AsyncEventType {
    /// Map an async id code to its event type
    pub fn from_id(id: u8) -> Self {
        match id {
            ASYNC_SENSOR_DATA => Self::SensorData,
            ASYNC_SLEEP_WARNING => Self::SleepWarning,
            ASYNC_COLLISION => Self::Collision,
            ASYNC_DID_SLEEP => Self::DidSleep,
            other => Self::Other(other),
        }
    }
}

/// Device-level information packets not tied to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceInfoType {
    PowerNotification,
}

/// Classification of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameKind {
    /// Answer to a command we sent
    SyncAck { sequence: u8, code: u8 },
    /// Unsolicited event (collision, sensor stream, sleep)
    AsyncEvent(AsyncEventType),
    /// Unsolicited device status
    DeviceInfo(DeviceInfoType),
}

/// One decoded inbound frame; consumed exactly once by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

/// Decode failure on inbound bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the smallest valid layout
    Truncated { expected: usize, actual: usize },
    /// Start-of-packet bytes are not a known frame type
    BadStartOfPacket(u8, u8),
    /// Checksum byte does not match the frame contents
    BadChecksum { expected: u8, actual: u8 },
    /// Declared length disagrees with the bytes received
    LengthMismatch { declared: usize, actual: usize },
    /// Fixed-size payload has the wrong size
    WrongLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Sensor data arrived while no sensor channel is enabled
    SensorsDisabled,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { expected, actual } => {
                write!(f, "truncated frame: {} bytes (need {})", actual, expected)
            }
            Self::BadStartOfPacket(a, b) => {
                write!(f, "bad start of packet: {:02X} {:02X}", a, b)
            }
            Self::BadChecksum { expected, actual } => {
                write!(f, "checksum 0x{:02X}, expected 0x{:02X}", actual, expected)
            }
            Self::LengthMismatch { declared, actual } => {
                write!(f, "length field {} but {} bytes follow", declared, actual)
            }
            Self::WrongLength {
                what,
                expected,
                actual,
            } => write!(f, "{} payload is {} bytes (need {})", what, actual, expected),
            Self::SensorsDisabled => write!(f, "sensor data with no sensors enabled"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for LinkError {
    fn from(err: DecodeError) -> Self {
        LinkError::MalformedFrame {
            reason: err.to_string(),
        }
    }
}

/// Read a big-endian u16 at `offset`
#[inline]
pub(crate) fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Read a big-endian two's-complement i16 at `offset`
#[inline]
pub(crate) fn be_i16(data: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([data[offset], data[offset + 1]])
}

/// Read a big-endian u32 at `offset`
#[inline]
pub(crate) fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_ids() {
        assert_eq!(AsyncEventType::from_id(0x03), AsyncEventType::SensorData);
        assert_eq!(AsyncEventType::from_id(0x07), AsyncEventType::Collision);
        assert_eq!(AsyncEventType::from_id(0x05), AsyncEventType::SleepWarning);
        assert_eq!(AsyncEventType::from_id(0x14), AsyncEventType::DidSleep);
        assert_eq!(AsyncEventType::from_id(0x0B), AsyncEventType::Other(0x0B));
    }

    #[test]
    fn test_decode_error_converts_to_malformed_frame() {
        let err: LinkError = DecodeError::BadChecksum {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, LinkError::MalformedFrame { .. }));
    }

    #[test]
    fn test_big_endian_readers() {
        let data = [0xFF, 0xFE, 0x00, 0x00, 0x03, 0xE8];
        assert_eq!(be_i16(&data, 0), -2);
        assert_eq!(be_u16(&data, 0), 0xFFFE);
        assert_eq!(be_u32(&data, 2), 1000);
    }
}
