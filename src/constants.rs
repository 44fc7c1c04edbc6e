//! Protocol and application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

use uuid::Uuid;

// =============================================================================
// GATT layout
// =============================================================================

/// Robot control service (commands + responses)
pub const ROBOT_CONTROL_SERVICE: Uuid = Uuid::from_u128(0x22bb746f_2ba0_7554_2d6f_726568705327);

/// Command frames are written here
pub const COMMANDS_CHARACTERISTIC: Uuid = Uuid::from_u128(0x22bb746f_2ba1_7554_2d6f_726568705327);

/// Response and async frames arrive here as notifications
pub const RESPONSE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x22bb746f_2ba6_7554_2d6f_726568705327);

/// BLE control service (wake-up sequence)
pub const BLE_SERVICE: Uuid = Uuid::from_u128(0x22bb746f_2bb0_7554_2d6f_726568705327);

/// Anti denial-of-service characteristic, receives the auth token
pub const ANTI_DOS_CHARACTERISTIC: Uuid = Uuid::from_u128(0x22bb746f_2bbd_7554_2d6f_726568705327);

/// Radio TX power characteristic
pub const TX_POWER_CHARACTERISTIC: Uuid = Uuid::from_u128(0x22bb746f_2bb2_7554_2d6f_726568705327);

/// Wake characteristic
pub const WAKE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x22bb746f_2bbf_7554_2d6f_726568705327);

// =============================================================================
// Handshake
// =============================================================================

/// Token written to the anti-DoS characteristic
pub const DEFAULT_AUTH_TOKEN: &str = "011i3";

/// Byte written to the TX power characteristic
pub const DEFAULT_TX_POWER_LEVEL: u8 = 7;

/// Byte written to the wake characteristic
pub const WAKE_ENABLE: u8 = 1;

// =============================================================================
// Sensors
// =============================================================================

/// Default sensor sampling interval (milliseconds)
pub const DEFAULT_SENSOR_INTERVAL_MS: u32 = 250;

/// Firmware base sample rate the streaming divisor is applied to
pub const SENSOR_BASE_RATE_HZ: u32 = 400;

/// Default squared-acceleration threshold for free fall (g²)
pub const FREE_FALL_ACCEL_SQUARED_THRESHOLD: f64 = 0.2;

/// Default minimum time since the last landed sample (milliseconds)
pub const FREE_FALL_TIME_THRESHOLD_MS: u64 = 175;

/// Default consecutive sub-threshold samples required before free fall
pub const FREE_FALL_DEBOUNCE_SAMPLES: u32 = 2;

// =============================================================================
// Runtime
// =============================================================================

/// Channel capacity for async message passing
pub const CHANNEL_CAPACITY: usize = 256;

/// Session housekeeping tick (milliseconds)
pub const SESSION_TICK_MS: u64 = 100;

/// Number of distinct sequence ids
pub const SEQUENCE_SPACE: usize = 256;

// =============================================================================
// Simulator
// =============================================================================

/// Model number reported by a SPRK+
pub const MODEL_SPRK_PLUS: u8 = 50;

/// Default simulated battery voltage (centivolts)
pub const DEFAULT_SIM_BATTERY_CENTIVOLTS: u16 = 792;

/// Default interval between simulated collisions (0 = never)
pub const DEFAULT_SIM_COLLISION_INTERVAL_MS: u64 = 0;
