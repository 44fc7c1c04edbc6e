//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use crate::codec::SensorMask;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// BLE protocol engine for Sphero V1 toys
#[derive(Parser, Debug)]
#[command(name = "toy-link")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: toy-link.toml if present)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive the built-in simulated toy through a short script
    Demo {
        /// Print every frame sent and received
        #[arg(long)]
        trace: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Decode one inbound frame given as hex
    Decode {
        /// Frame bytes, e.g. "FF FF 00 01 01 FD" (spaces optional)
        hex: String,

        /// Sensor mask in force, as 0x... or names like locatorAll,accelerometerFilteredAll
        #[arg(long)]
        mask: Option<SensorMask>,
    },
}

/// Parse hex text into bytes, ignoring whitespace, `:` and `0x` prefixes
pub fn parse_hex(text: &str) -> Result<Vec<u8>, String> {
    let digits: String = text
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .map(|chunk| chunk.trim_start_matches("0x").trim_start_matches("0X"))
        .collect();

    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("invalid hex digit '{}'", bad));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| format!("invalid hex '{}': {}", &digits[i..i + 2], e))
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
