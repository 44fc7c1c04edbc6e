//! Link lifecycle
//!
//! `start` spawns the transport and the session task and hands back a
//! `Toy` handle right away, together with a `Connecting` future for the
//! handshake result. Commands issued on the handle before the handshake
//! finishes are held and sent, in order, once the toy is ready.
//!
//! ```ignore
//! let (toy, connecting) = link::start(SimulatedToy::new(sim), &config, None)?;
//! let info = connecting.wait().await?;
//! println!("firmware {}", info.version.app_version);
//! toy.roll(90.0, 128.0).await?;
//! ```

mod session;
pub mod stats;

pub(crate) use session::{Request, Session};
pub use stats::{LinkStats, StatsSnapshot};

use crate::codec::{ChargeState, VersionInfo};
use crate::config::{self, Config};
use crate::error::{LinkError, Result};
use crate::logging::LogEntry;
use crate::protocol::{DeviceSnapshot, Dispatcher};
use crate::toy::Toy;
use crate::transport::Transport;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Cached device facts, refreshed by the handshake and later answers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub version: Option<VersionInfo>,
    /// Volts
    pub battery_voltage: Option<f64>,
    pub charge_state: Option<ChargeState>,
}

/// State visible to both the session task and `Toy` handles
pub(crate) struct Shared {
    pub dispatcher: Dispatcher,
    pub stats: LinkStats,
    pub device: Mutex<DeviceInfo>,
    /// Set once the session has torn down
    pub closed: AtomicBool,
    /// Stops the transport and the session
    pub shutdown: Arc<AtomicBool>,
}

/// Pending handshake result
pub struct Connecting {
    rx: oneshot::Receiver<Result<DeviceSnapshot>>,
}

impl Connecting {
    /// Wait for the handshake to reach Ready or fail
    pub async fn wait(self) -> Result<DeviceSnapshot> {
        self.rx.await.unwrap_or(Err(LinkError::Disconnected))
    }
}

/// Spawn `transport` and a session for it
///
/// Must be called inside a tokio runtime. `log_tx` receives the protocol
/// trace if given.
pub fn start<T: Transport>(
    transport: T,
    config: &Config,
    log_tx: Option<mpsc::Sender<LogEntry>>,
) -> Result<(Toy, Connecting)> {
    config::validate(config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let channels = transport.spawn(shutdown.clone())?;

    let shared = Arc::new(Shared {
        dispatcher: Dispatcher::new(),
        stats: LinkStats::new(),
        device: Mutex::new(DeviceInfo::default()),
        closed: AtomicBool::new(false),
        shutdown: shutdown.clone(),
    });

    let (request_tx, request_rx) = mpsc::channel(config.link.channel_capacity);
    let (ready_tx, ready_rx) = oneshot::channel();

    let session = Session::new(
        channels,
        request_rx,
        shared.clone(),
        config.clone(),
        ready_tx,
        log_tx,
    );
    tokio::spawn(async move {
        session.run(shutdown).await;
        debug!("Session task ended");
    });

    let toy = Toy::new(request_tx, shared, config.sensors.interval_ms);
    Ok((toy, Connecting { rx: ready_rx }))
}

/// Start and wait for the handshake
pub async fn connect<T: Transport>(
    transport: T,
    config: &Config,
    log_tx: Option<mpsc::Sender<LogEntry>>,
) -> Result<Toy> {
    let (toy, connecting) = start(transport, config, log_tx)?;
    connecting.wait().await?;
    Ok(toy)
}
