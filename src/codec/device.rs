//! Device-level responses: versioning and power state

use super::{be_u16, DecodeError};
use serde::Serialize;
use std::cmp::Ordering;

/// Known toy models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToyModel {
    SprkPlus,
    Unknown(u8),
}

impl ToyModel {
    pub fn from_id(id: u8) -> Self {
        match id {
            crate::constants::MODEL_SPRK_PLUS => Self::SprkPlus,
            other => Self::Unknown(other),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::SprkPlus => crate::constants::MODEL_SPRK_PLUS,
            Self::Unknown(id) => *id,
        }
    }
}

/// Main application firmware version
///
/// Components are kept as decimal strings and compared lexicographically,
/// so "10" sorts before "9". Firmware gating built on this ordering relies
/// on that behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppVersion {
    pub major: String,
    pub minor: String,
}

impl AppVersion {
    pub fn new(major: impl Into<String>, minor: impl Into<String>) -> Self {
        Self {
            major: major.into(),
            minor: minor.into(),
        }
    }
}

impl Ord for AppVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then_with(|| self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for AppVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decoded versioning response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub model: ToyModel,
    pub hardware: u8,
    pub app_version: AppVersion,
}

/// Bytes the versioning decoder reads: RECV, MDL, HW, MSA-ver, MSA-rev
pub const VERSION_MIN_LEN: usize = 5;

impl VersionInfo {
    /// Decode a versioning response payload
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < VERSION_MIN_LEN {
            return Err(DecodeError::WrongLength {
                what: "versioning",
                expected: VERSION_MIN_LEN,
                actual: data.len(),
            });
        }

        Ok(Self {
            model: ToyModel::from_id(data[1]),
            hardware: data[2],
            app_version: AppVersion::new(data[3].to_string(), data[4].to_string()),
        })
    }
}

/// Battery charge state reported with the power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChargeState {
    Charging,
    Ok,
    Low,
    Critical,
    Unknown(u8),
}

impl ChargeState {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Charging,
            2 => Self::Ok,
            3 => Self::Low,
            4 => Self::Critical,
            other => Self::Unknown(other),
        }
    }
}

/// Decoded power state response
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerState {
    pub charge_state: ChargeState,
    /// Battery voltage in volts
    pub battery_voltage: f64,
}

/// Bytes the power state decoder reads: RecVer, PowerState, BattVoltage(2)
pub const POWER_STATE_MIN_LEN: usize = 4;

impl PowerState {
    /// Decode a power state response payload
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < POWER_STATE_MIN_LEN {
            return Err(DecodeError::WrongLength {
                what: "power state",
                expected: POWER_STATE_MIN_LEN,
                actual: data.len(),
            });
        }

        Ok(Self {
            charge_state: ChargeState::from_byte(data[1]),
            battery_voltage: f64::from(be_u16(data, 2)) / 100.0,
        })
    }

    /// Decode the one-byte power notification async payload
    pub fn decode_notification(data: &[u8]) -> Result<ChargeState, DecodeError> {
        match data.first() {
            Some(&byte) => Ok(ChargeState::from_byte(byte)),
            None => Err(DecodeError::WrongLength {
                what: "power notification",
                expected: 1,
                actual: 0,
            }),
        }
    }
}
