//! Configuration management
//!
//! Optional TOML file (default `toy-link.toml` in the working directory).
//! Every section and field has a default, so a partial or empty file is
//! valid.

use crate::constants::{
    CHANNEL_CAPACITY, DEFAULT_AUTH_TOKEN, DEFAULT_SENSOR_INTERVAL_MS,
    DEFAULT_SIM_BATTERY_CENTIVOLTS, DEFAULT_SIM_COLLISION_INTERVAL_MS, DEFAULT_TX_POWER_LEVEL,
    FREE_FALL_ACCEL_SQUARED_THRESHOLD, FREE_FALL_DEBOUNCE_SAMPLES, FREE_FALL_TIME_THRESHOLD_MS,
    MODEL_SPRK_PLUS,
};
use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "toy-link.toml";

// =============================================================================
// Application Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub sensors: SensorsConfig,
    pub free_fall: FreeFallConfig,
    pub simulator: SimulatorConfig,
}

// =============================================================================
// Link
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Fail a command with `Timeout` if unanswered after this long
    /// (absent = wait until disconnect)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_ms: Option<u64>,

    /// Answer the pre-sleep warning with a Ping
    pub keep_awake: bool,

    /// Token written to the anti-DoS characteristic
    pub auth_token: String,

    /// Radio power level written during the handshake
    pub tx_power_level: u8,

    /// Capacity of the request and peripheral channels
    pub channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: None,
            keep_awake: true,
            auth_token: DEFAULT_AUTH_TOKEN.to_string(),
            tx_power_level: DEFAULT_TX_POWER_LEVEL,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// =============================================================================
// Sensors
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// Sampling interval used by `enable_sensors`
    pub interval_ms: u32,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_SENSOR_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreeFallConfig {
    /// Squared acceleration magnitude below which a sample counts as falling (g²)
    pub acceleration_squared_threshold: f64,
    /// Minimum time since the last landed sample
    pub time_threshold_ms: u64,
    /// Consecutive falling samples required
    pub debounce_samples: u32,
}

impl Default for FreeFallConfig {
    fn default() -> Self {
        Self {
            acceleration_squared_threshold: FREE_FALL_ACCEL_SQUARED_THRESHOLD,
            time_threshold_ms: FREE_FALL_TIME_THRESHOLD_MS,
            debounce_samples: FREE_FALL_DEBOUNCE_SAMPLES,
        }
    }
}

// =============================================================================
// Simulator
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Model id reported by versioning
    pub model: u8,
    pub hardware: u8,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub battery_voltage_centivolts: u16,
    /// Emit a collision this often while detection is on (0 = never)
    pub collision_interval_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            model: MODEL_SPRK_PLUS,
            hardware: 7,
            firmware_major: 3,
            firmware_minor: 59,
            battery_voltage_centivolts: DEFAULT_SIM_BATTERY_CENTIVOLTS,
            collision_interval_ms: DEFAULT_SIM_COLLISION_INTERVAL_MS,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Load config from `path`, falling back to defaults
///
/// A missing file is normal. An unreadable or unparsable file is logged
/// and ignored.
pub fn load(path: &Path) -> Config {
    if !path.exists() {
        debug!("No config at {:?}, using defaults", path);
        return Config::default();
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config parse error in {:?}: {}, using defaults", path, e);
                Config::default()
            }
        },
        Err(e) => {
            warn!("Failed to read config {:?}: {}, using defaults", path, e);
            Config::default()
        }
    }
}

/// Read and parse `path`, reporting failures instead of falling back
pub fn load_strict(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| LinkError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| LinkError::ConfigValidation {
        field: "file",
        reason: e.to_string(),
    })
}

/// Reject values the engine cannot run with
pub fn validate(config: &Config) -> Result<()> {
    let invalid = |field, reason: &str| {
        Err(LinkError::ConfigValidation {
            field,
            reason: reason.to_string(),
        })
    };

    if config.link.command_timeout_ms == Some(0) {
        return invalid("link.command_timeout_ms", "must be positive when set");
    }
    if config.link.auth_token.is_empty() {
        return invalid("link.auth_token", "must not be empty");
    }
    if config.link.channel_capacity == 0 {
        return invalid("link.channel_capacity", "must be positive");
    }
    if config.sensors.interval_ms == 0 {
        return invalid("sensors.interval_ms", "must be positive");
    }

    let threshold = config.free_fall.acceleration_squared_threshold;
    if !threshold.is_finite() || threshold <= 0.0 {
        return invalid(
            "free_fall.acceleration_squared_threshold",
            "must be a positive number",
        );
    }
    if config.free_fall.debounce_samples == 0 {
        return invalid("free_fall.debounce_samples", "must be at least 1");
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
