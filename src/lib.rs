//! Toy Link - BLE protocol engine for Sphero V1 rolling robots
//!
//! The engine wakes and authenticates the toy over GATT, serializes
//! commands through a single-flight channel, correlates sync responses by
//! sequence id and fans asynchronous events out to registered listeners.
//!
//! - `codec`: frame layout, command payloads, event decoding
//! - `protocol`: handshake, sequencer, command channel, dispatch
//! - `link`: the session task and its lifecycle
//! - `toy`: the public `Toy` handle
//! - `transport`: the peripheral abstraction and a simulated toy

pub mod cli;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod toy;
pub mod transport;

pub use error::{LinkError, Result};
pub use link::{connect, start, Connecting, DeviceInfo};
pub use toy::Toy;
