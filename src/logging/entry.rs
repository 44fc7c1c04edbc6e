//! Log entry types
//!
//! Protocol trace records produced by the link session.

use serde::{Deserialize, Serialize};

/// Direction of protocol frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,  // Toy -> Engine
    Out, // Engine -> Toy
}

/// Type of log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogKind {
    /// Command frame written or response/async frame received
    Protocol {
        direction: Direction,
        message_name: String,
        size: usize,
    },
    /// Link lifecycle and dropped-frame notices
    System { message: String },
}

/// One trace record (serializable for `--json` output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String, // HH:MM:SS.mmm
    pub kind: LogKind,
}

impl LogEntry {
    /// Current timestamp as HH:MM:SS.mmm
    #[inline]
    fn now() -> String {
        chrono::Local::now().format("%H:%M:%S%.3f").to_string()
    }

    /// Create a system log entry
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            timestamp: Self::now(),
            kind: LogKind::System {
                message: message.into(),
            },
        }
    }

    /// Create a protocol log entry for an inbound frame
    pub fn protocol_in(message_name: impl Into<String>, size: usize) -> Self {
        Self {
            timestamp: Self::now(),
            kind: LogKind::Protocol {
                direction: Direction::In,
                message_name: message_name.into(),
                size,
            },
        }
    }

    /// Create a protocol log entry for an outbound frame
    pub fn protocol_out(message_name: impl Into<String>, size: usize) -> Self {
        Self {
            timestamp: Self::now(),
            kind: LogKind::Protocol {
                direction: Direction::Out,
                message_name: message_name.into(),
                size,
            },
        }
    }

    /// Single-line rendering for console output
    pub fn format_line(&self) -> String {
        match &self.kind {
            LogKind::Protocol {
                direction,
                message_name,
                size,
            } => {
                let arrow = match direction {
                    Direction::In => "<-",
                    Direction::Out => "->",
                };
                format!("{} {} {} ({} B)", self.timestamp, arrow, message_name, size)
            }
            LogKind::System { message } => format!("{} -- {}", self.timestamp, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        let entry = LogEntry::system("connected");
        // HH:MM:SS.mmm
        assert_eq!(entry.timestamp.len(), 12);
        assert_eq!(&entry.timestamp[2..3], ":");
        assert_eq!(&entry.timestamp[8..9], ".");
    }

    #[test]
    fn test_format_line() {
        let entry = LogEntry {
            timestamp: "12:00:00.000".into(),
            kind: LogKind::Protocol {
                direction: Direction::Out,
                message_name: "Roll".into(),
                size: 11,
            },
        };
        assert_eq!(entry.format_line(), "12:00:00.000 -> Roll (11 B)");
    }

    #[test]
    fn test_entry_serializes() {
        let entry = LogEntry::protocol_in("Collision", 22);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"Collision\""));
        assert!(json.contains("\"In\""));
    }
}
