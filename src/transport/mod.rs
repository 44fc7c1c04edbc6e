//! BLE peripheral abstraction
//!
//! Separates the GATT plumbing from protocol logic:
//! - **Transport**: how requests reach the peripheral (a platform BLE stack,
//!   the built-in simulator, a test script)
//! - **Session**: what to ask for and how to interpret the answers
//!
//! The engine never touches a BLE stack directly. It sends
//! `PeripheralRequest`s and reacts to `PeripheralEvent`s; every request
//! produces exactly one completion event, in request order for writes.
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs`
//! 2. Implement the `Transport` trait
//! 3. Add `pub mod my_transport;` here

pub mod sim;

pub use sim::SimulatedToy;

use bytes::Bytes;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Operation the engine asks the peripheral to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralRequest {
    /// Answered by `ServicesDiscovered`
    DiscoverServices(Vec<Uuid>),
    /// Answered by `CharacteristicsDiscovered`
    DiscoverCharacteristics {
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    /// Answered by `WriteCompleted`
    Write {
        characteristic: Uuid,
        data: Bytes,
        with_response: bool,
    },
    /// Answered by `SubscriptionChanged`
    Subscribe { characteristic: Uuid },
    /// Drop the link; answered by `Disconnected`
    Disconnect,
}

/// Completion or notification reported by the peripheral
///
/// Failures carry the stack's reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    ServicesDiscovered(std::result::Result<Vec<Uuid>, String>),
    CharacteristicsDiscovered {
        service: Uuid,
        result: std::result::Result<Vec<Uuid>, String>,
    },
    WriteCompleted {
        characteristic: Uuid,
        result: std::result::Result<(), String>,
    },
    SubscriptionChanged {
        characteristic: Uuid,
        result: std::result::Result<(), String>,
    },
    /// One notification holds exactly one frame
    Notification { characteristic: Uuid, data: Bytes },
    Disconnected { reason: Option<String> },
}

/// Channels for bidirectional communication with a peripheral
///
/// The transport owns the underlying link and communicates via these
/// channels. When the transport stops (shutdown or link loss), it closes
/// the channels.
pub struct TransportChannels {
    /// Events from the peripheral
    ///
    /// Returns `None` when the transport has stopped.
    pub rx: mpsc::Receiver<PeripheralEvent>,

    /// Requests to the peripheral
    pub tx: mpsc::Sender<PeripheralRequest>,
}

/// Trait for spawnable peripherals
///
/// A transport handles:
/// - Connecting to one peripheral
/// - Executing GATT requests
/// - Its own threading model
///
/// A transport does NOT handle:
/// - Frame encoding or decoding (that's the codec's job)
/// - Command ordering or correlation (that's the session's job)
/// - Reconnection
///
/// # Lifecycle
///
/// 1. Create transport with configuration
/// 2. Call `spawn()` to start I/O in background
/// 3. Use returned channels for communication
/// 4. Transport runs until:
///    - `shutdown` flag is set, OR
///    - the link is lost, OR
///    - a `Disconnect` request is handled
/// 5. Transport closes channels when stopping
pub trait Transport: Send + 'static {
    /// Spawn the transport in background
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be initialized
    /// (e.g., adapter unavailable).
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels>;
}
