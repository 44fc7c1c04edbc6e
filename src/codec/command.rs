//! Outgoing commands and their payload layouts
//!
//! Constructors taking `f64` clamp to the hardware range instead of failing:
//! headings wrap into `[0, 360)`, everything else saturates, NaN becomes 0.

use super::{Opcode, SensorMask};
use crate::constants::SENSOR_BASE_RATE_HZ;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

/// Core device id
pub const DID_CORE: u8 = 0x00;
/// Sphero device id
pub const DID_SPHERO: u8 = 0x02;

pub const CID_PING: u8 = 0x01;
pub const CID_VERSIONING: u8 = 0x02;
pub const CID_GET_POWER_STATE: u8 = 0x20;

pub const CID_SET_HEADING: u8 = 0x01;
pub const CID_SET_STABILIZATION: u8 = 0x02;
pub const CID_SET_DATA_STREAMING: u8 = 0x11;
pub const CID_CONFIGURE_COLLISION_DETECTION: u8 = 0x12;
pub const CID_CONFIGURE_LOCATOR: u8 = 0x13;
pub const CID_SET_RGB_LED: u8 = 0x20;
pub const CID_SET_BACK_LED: u8 = 0x21;
pub const CID_ROLL: u8 = 0x30;
pub const CID_SET_OPTIONS_FLAGS: u8 = 0x35;

/// RGB color for the main LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const WHITE: Self = Self::rgb(255, 255, 255);
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const GREEN: Self = Self::rgb(0, 255, 0);
    pub const BLUE: Self = Self::rgb(0, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build from unit-range components (0.0..=1.0), clamped
    pub fn from_unit(r: f64, g: f64, b: f64) -> Self {
        Self::rgb(clamp_u8(r * 255.0), clamp_u8(g * 255.0), clamp_u8(b * 255.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RollMode {
    Stop,
    Roll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stabilization {
    Off,
    On,
}

/// Persistent option flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ToyOptions(u32);

impl ToyOptions {
    pub const NONE: Self = Self(0);
    pub const PREVENT_SLEEP_IN_CHARGER: Self = Self(0x01);
    pub const ENABLE_VECTOR_DRIVE: Self = Self(0x02);
    pub const DISABLE_SELF_LEVEL_IN_CHARGER: Self = Self(0x04);
    pub const TAIL_LIGHT_ALWAYS_ON: Self = Self(0x08);
    pub const ENABLE_MOTION_TIMEOUT: Self = Self(0x10);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ToyOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Collision detection thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollisionConfig {
    /// 0 disables detection, 1 is the standard detector
    pub method: u8,
    pub x_threshold: u8,
    pub x_speed: u8,
    pub y_threshold: u8,
    pub y_speed: u8,
    /// Post-collision quiet period, in 10ms units
    pub dead_time: u8,
}

impl CollisionConfig {
    pub const fn enabled() -> Self {
        Self {
            method: 1,
            x_threshold: 100,
            x_speed: 100,
            y_threshold: 100,
            y_speed: 100,
            dead_time: 10,
        }
    }

    pub const fn disabled() -> Self {
        Self {
            method: 0,
            x_threshold: 0,
            x_speed: 0,
            y_threshold: 0,
            y_speed: 0,
            dead_time: 0,
        }
    }
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self::enabled()
    }
}

/// Every command the engine can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Versioning,
    GetPowerState,
    Roll {
        heading: u16,
        speed: u8,
        mode: RollMode,
    },
    SetHeading(u16),
    SetStabilization(Stabilization),
    SetDataStreaming {
        divisor: u16,
        mask: SensorMask,
    },
    ConfigureCollisionDetection(CollisionConfig),
    ConfigureLocator {
        x: i16,
        y: i16,
        yaw: u16,
    },
    SetMainLed(Color),
    SetBackLed(u8),
    SetOptionsFlags(ToyOptions),
}

impl Command {
    /// Roll at `speed` (0..=255) toward `heading` degrees
    pub fn roll(heading: f64, speed: f64) -> Self {
        Self::Roll {
            heading: wrap_heading(heading),
            speed: clamp_u8(speed),
            mode: RollMode::Roll,
        }
    }

    /// Stop, facing `heading`
    pub fn stop(heading: f64) -> Self {
        Self::Roll {
            heading: wrap_heading(heading),
            speed: 0,
            mode: RollMode::Stop,
        }
    }

    pub fn heading(heading: f64) -> Self {
        Self::SetHeading(wrap_heading(heading))
    }

    pub fn back_led(brightness: f64) -> Self {
        Self::SetBackLed(clamp_u8(brightness))
    }

    pub fn configure_locator(x: f64, y: f64, yaw: f64) -> Self {
        Self::ConfigureLocator {
            x: clamp_i16(x),
            y: clamp_i16(y),
            yaw: wrap_heading(yaw),
        }
    }

    /// Reset the locator origin to (0, 0) with yaw 0
    pub fn locator_reset() -> Self {
        Self::ConfigureLocator { x: 0, y: 0, yaw: 0 }
    }

    /// Stream `mask` every `interval_ms`; an empty mask turns streaming off
    pub fn sensor_streaming(mask: SensorMask, interval_ms: u32) -> Self {
        let divisor = if mask.is_off() {
            0
        } else {
            (SENSOR_BASE_RATE_HZ / streaming_rate(interval_ms)).clamp(1, u32::from(u16::MAX)) as u16
        };
        Self::SetDataStreaming { divisor, mask }
    }

    pub fn opcode(&self) -> Opcode {
        let (device, command) = match self {
            Self::Ping => (DID_CORE, CID_PING),
            Self::Versioning => (DID_CORE, CID_VERSIONING),
            Self::GetPowerState => (DID_CORE, CID_GET_POWER_STATE),
            Self::Roll { .. } => (DID_SPHERO, CID_ROLL),
            Self::SetHeading(_) => (DID_SPHERO, CID_SET_HEADING),
            Self::SetStabilization(_) => (DID_SPHERO, CID_SET_STABILIZATION),
            Self::SetDataStreaming { .. } => (DID_SPHERO, CID_SET_DATA_STREAMING),
            Self::ConfigureCollisionDetection(_) => (DID_SPHERO, CID_CONFIGURE_COLLISION_DETECTION),
            Self::ConfigureLocator { .. } => (DID_SPHERO, CID_CONFIGURE_LOCATOR),
            Self::SetMainLed(_) => (DID_SPHERO, CID_SET_RGB_LED),
            Self::SetBackLed(_) => (DID_SPHERO, CID_SET_BACK_LED),
            Self::SetOptionsFlags(_) => (DID_SPHERO, CID_SET_OPTIONS_FLAGS),
        };
        Opcode { device, command }
    }

    /// Short name for logs and traces
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Versioning => "Versioning",
            Self::GetPowerState => "GetPowerState",
            Self::Roll { .. } => "Roll",
            Self::SetHeading(_) => "SetHeading",
            Self::SetStabilization(_) => "SetStabilization",
            Self::SetDataStreaming { .. } => "SetDataStreaming",
            Self::ConfigureCollisionDetection(_) => "ConfigureCollisionDetection",
            Self::ConfigureLocator { .. } => "ConfigureLocator",
            Self::SetMainLed(_) => "SetMainLed",
            Self::SetBackLed(_) => "SetBackLed",
            Self::SetOptionsFlags(_) => "SetOptionsFlags",
        }
    }

    /// Encode the data section of the frame
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        match self {
            Self::Ping | Self::Versioning | Self::GetPowerState => {}
            Self::Roll {
                heading,
                speed,
                mode,
            } => {
                buf.put_u8(*speed);
                buf.put_u16(*heading);
                buf.put_u8(match mode {
                    RollMode::Stop => 0,
                    RollMode::Roll => 1,
                });
            }
            Self::SetHeading(heading) => buf.put_u16(*heading),
            Self::SetStabilization(state) => buf.put_u8(match state {
                Stabilization::Off => 0,
                Stabilization::On => 1,
            }),
            Self::SetDataStreaming { divisor, mask } => {
                buf.put_u16(*divisor);
                buf.put_u16(1);
                buf.put_u32(mask.low_word());
                buf.put_u8(0);
                buf.put_u32(mask.high_word());
            }
            Self::ConfigureCollisionDetection(config) => {
                buf.put_slice(&[
                    config.method,
                    config.x_threshold,
                    config.x_speed,
                    config.y_threshold,
                    config.y_speed,
                    config.dead_time,
                ]);
            }
            Self::ConfigureLocator { x, y, yaw } => {
                buf.put_u8(0);
                buf.put_i16(*x);
                buf.put_i16(*y);
                buf.put_u16(*yaw);
            }
            Self::SetMainLed(color) => buf.put_slice(&[color.r, color.g, color.b, 0]),
            Self::SetBackLed(brightness) => buf.put_u8(*brightness),
            Self::SetOptionsFlags(options) => buf.put_u32(options.bits()),
        }
        buf.freeze()
    }
}

/// Samples per second for a sampling interval, at least 1
pub fn streaming_rate(interval_ms: u32) -> u32 {
    (1000 / interval_ms.max(1)).max(1)
}

/// Wrap degrees into `[0, 360)` and truncate
pub fn wrap_heading(degrees: f64) -> u16 {
    if !degrees.is_finite() {
        return 0;
    }
    (degrees.rem_euclid(360.0) as u16).min(359)
}

fn clamp_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

fn clamp_i16(value: f64) -> i16 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_clamps_speed() {
        let cmd = Command::roll(90.0, 500.0);
        assert_eq!(cmd.payload().as_ref(), &[255, 0x00, 0x5A, 0x01]);
        assert_eq!(
            cmd.opcode(),
            Opcode {
                device: DID_SPHERO,
                command: CID_ROLL
            }
        );
    }

    #[test]
    fn test_roll_negative_speed_and_nan() {
        assert_eq!(Command::roll(0.0, -10.0).payload()[0], 0);
        assert_eq!(Command::roll(f64::NAN, f64::NAN).payload().as_ref(), &[0, 0, 0, 1]);
    }

    #[test]
    fn test_heading_wraps() {
        assert_eq!(wrap_heading(-90.0), 270);
        assert_eq!(wrap_heading(450.0), 90);
        assert_eq!(wrap_heading(360.0), 0);
        assert_eq!(wrap_heading(359.9), 359);
        assert_eq!(wrap_heading(f64::INFINITY), 0);
    }

    #[test]
    fn test_stop_payload() {
        assert_eq!(Command::stop(180.0).payload().as_ref(), &[0, 0x00, 0xB4, 0x00]);
    }

    #[test]
    fn test_led_payloads() {
        assert_eq!(
            Command::SetMainLed(Color::rgb(1, 2, 3)).payload().as_ref(),
            &[1, 2, 3, 0]
        );
        assert_eq!(Command::back_led(300.0).payload().as_ref(), &[255]);
        assert_eq!(Color::from_unit(1.5, 0.5, -1.0), Color::rgb(255, 127, 0));
    }

    #[test]
    fn test_locator_sends_yaw() {
        let cmd = Command::configure_locator(10.0, -20.0, 45.0);
        assert_eq!(
            cmd.payload().as_ref(),
            &[0x00, 0x00, 0x0A, 0xFF, 0xEC, 0x00, 0x2D]
        );
        assert_eq!(
            Command::locator_reset().payload().as_ref(),
            &[0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_locator_clamps_coordinates() {
        assert_eq!(
            Command::configure_locator(1e9, -1e9, 0.0),
            Command::ConfigureLocator {
                x: i16::MAX,
                y: i16::MIN,
                yaw: 0
            }
        );
    }

    #[test]
    fn test_streaming_rate() {
        assert_eq!(streaming_rate(250), 4);
        assert_eq!(streaming_rate(10), 100);
        assert_eq!(streaming_rate(0), 1000);
        assert_eq!(streaming_rate(5000), 1);
    }

    #[test]
    fn test_data_streaming_payload() {
        let mask = SensorMask::LOCATOR_ALL | SensorMask::ACCELEROMETER_FILTERED_ALL;
        let cmd = Command::sensor_streaming(mask, 250);
        assert_eq!(
            cmd.payload().as_ref(),
            &[
                0x00, 0x64, // N = 400 / 4
                0x00, 0x01, // M
                0x00, 0x00, 0xE0, 0x00, // MASK
                0x00, // PCNT
                0x0D, 0x80, 0x00, 0x00, // MASK2
            ]
        );
    }

    #[test]
    fn test_data_streaming_off() {
        let cmd = Command::sensor_streaming(SensorMask::OFF, 250);
        assert_eq!(
            cmd,
            Command::SetDataStreaming {
                divisor: 0,
                mask: SensorMask::OFF
            }
        );
        assert_eq!(cmd.payload().len(), 13);
    }

    #[test]
    fn test_collision_presets() {
        assert_eq!(
            Command::ConfigureCollisionDetection(CollisionConfig::enabled())
                .payload()
                .as_ref(),
            &[1, 100, 100, 100, 100, 10]
        );
        assert_eq!(
            Command::ConfigureCollisionDetection(CollisionConfig::disabled())
                .payload()
                .as_ref(),
            &[0; 6]
        );
    }

    #[test]
    fn test_core_commands_have_empty_payload() {
        for cmd in [Command::Ping, Command::Versioning, Command::GetPowerState] {
            assert!(cmd.payload().is_empty());
            assert_eq!(cmd.opcode().device, DID_CORE);
        }
    }

    #[test]
    fn test_options_flags() {
        let opts = ToyOptions::ENABLE_VECTOR_DRIVE | ToyOptions::TAIL_LIGHT_ALWAYS_ON;
        assert_eq!(
            Command::SetOptionsFlags(opts).payload().as_ref(),
            &[0, 0, 0, 0x0A]
        );
    }
}
