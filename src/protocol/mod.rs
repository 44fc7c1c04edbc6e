//! Protocol state machines
//!
//! - **sequencer**: sequence ids and the pending request table
//! - **channel**: single-flight outbound queue on top of the sequencer
//! - **handshake**: GATT discovery and wake-up sequence
//! - **dispatcher**: listener sets for unsolicited events
//! - **free_fall**: free-fall detection derived from sensor frames
//!
//! None of these perform I/O or own a task; the link session drives them.

pub mod channel;
pub mod dispatcher;
pub mod free_fall;
pub mod handshake;
pub mod sequencer;

pub use channel::{CommandChannel, Outbound, WriteOutcome};
pub use dispatcher::{DeviceEvent, Dispatcher, FreeFallEvent, ListenerId, ListenerSet};
pub use free_fall::FreeFallDetector;
pub use handshake::{
    ConnectionHandshake, ConnectionState, DeviceSnapshot, HandshakeConfig, HandshakeStep,
};
pub use sequencer::{CommandSequencer, Routed};
