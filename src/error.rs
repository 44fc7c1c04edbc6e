//! Centralized error types for the link engine
//!
//! All engine errors are represented by the `LinkError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, LinkError>`.
//!
//! Propagation policy:
//! - `MalformedFrame` and `UnmatchedResponse` are recovered inside the session
//!   (logged, counted, dropped). They only reach callers through `decode` helpers.
//! - `Transport`, `HandshakeFailed` and `Disconnected` are surfaced to whoever
//!   initiated the connection or issued the command.

use std::fmt;
use std::path::PathBuf;

/// Why a connection handshake did not reach `Ready`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// A required GATT characteristic was not found after discovery completed
    MissingCharacteristic(&'static str),
    /// The peripheral reported an error during a handshake step
    Transport { step: &'static str, reason: String },
    /// The device answered a handshake query with something unusable
    BadResponse { step: &'static str, reason: String },
    /// The link went away before the handshake finished
    Disconnected,
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCharacteristic(name) => write!(f, "missing characteristic: {}", name),
            Self::Transport { step, reason } => write!(f, "{} failed: {}", step, reason),
            Self::BadResponse { step, reason } => write!(f, "bad {} response: {}", step, reason),
            Self::Disconnected => write!(f, "disconnected during handshake"),
        }
    }
}

/// All link errors
#[derive(Debug)]
pub enum LinkError {
    // === Transport ===
    /// BLE discovery, write or subscription failure
    Transport {
        operation: &'static str,
        reason: String,
    },

    // === Protocol ===
    /// Inbound bytes could not be decoded
    MalformedFrame { reason: String },
    /// Sync response with a sequence id nobody is waiting for
    UnmatchedResponse { sequence: u8 },
    /// Device answered with a non-zero response code
    CommandRejected { code: u8 },
    /// No response within the configured command timeout
    Timeout { sequence: Option<u8> },

    // === Connection ===
    /// Link torn down; terminal for every pending and future call
    Disconnected,
    /// Handshake did not complete; terminal for this connection attempt
    HandshakeFailed { reason: HandshakeFailure },

    // === IO ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Runtime ===
    /// Tokio runtime creation failed
    Runtime { source: std::io::Error },
}

impl LinkError {
    /// Build a transport error from a peripheral-reported reason
    pub fn transport(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Transport {
            operation,
            reason: reason.into(),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Runtime { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { operation, reason } => {
                write!(f, "Transport error during {}: {}", operation, reason)
            }
            Self::MalformedFrame { reason } => write!(f, "Malformed frame: {}", reason),
            Self::UnmatchedResponse { sequence } => {
                write!(f, "Response for unknown sequence id {}", sequence)
            }
            Self::CommandRejected { code } => {
                write!(f, "Command rejected by device (code 0x{:02X})", code)
            }
            Self::Timeout { sequence: Some(seq) } => {
                write!(f, "No response for sequence id {}", seq)
            }
            Self::Timeout { sequence: None } => write!(f, "Command timed out before sending"),
            Self::Disconnected => write!(f, "Toy disconnected"),
            Self::HandshakeFailed { reason } => write!(f, "Handshake failed: {}", reason),
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
        }
    }
}

/// Alias for Result with LinkError
pub type Result<T> = std::result::Result<T, LinkError>;
