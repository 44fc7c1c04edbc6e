//! Fan-out of device-originated events to registered listeners
//!
//! Registration returns a `ListenerId`; removal takes it back. Emission
//! snapshots the listener list before calling anything, so a listener may
//! add or remove listeners (itself included) from inside its callback. A
//! listener removed during an emission round still receives that round.

use crate::codec::{ChargeState, CollisionEvent, PowerState, SensorFrame, VersionInfo};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Token identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered set of callbacks for one event type
pub struct ListenerSet<T> {
    listeners: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl<T> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not registered here
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener registered when emission starts
    pub fn emit(&self, event: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in &snapshot {
            callback(event);
        }
        snapshot.len()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Device-level notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceEvent {
    /// Versioning answer (handshake or explicit query)
    Version(VersionInfo),
    /// Power state answer
    PowerState(PowerState),
    /// Unsolicited charge state change
    PowerNotification(ChargeState),
    /// Device is about to sleep
    SleepWarning,
    /// Device went to sleep; the link is being torn down
    DidSleep,
}

/// Derived free-fall event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeFallEvent {
    /// Time since the last landed sample when free fall was declared
    pub since_landed: Duration,
}

/// All listener sets, shared between the session and the `Toy` handles
///
/// Callbacks run on the session task and must not block.
#[derive(Default)]
pub struct Dispatcher {
    pub collision: ListenerSet<CollisionEvent>,
    pub sensor: ListenerSet<SensorFrame>,
    pub device: ListenerSet<DeviceEvent>,
    pub free_fall: ListenerSet<FreeFallEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.collision.clear();
        self.sensor.clear();
        self.device.clear();
        self.free_fall.clear();
    }
}
