//! Public capability surface
//!
//! `Toy` is a cheap, cloneable handle. Each call is marshaled to the
//! session task and awaits only the caller; numeric inputs are clamped or
//! wrapped into range, never rejected.

use crate::codec::{
    AppVersion, ChargeState, CollisionConfig, CollisionEvent, Color, Command, PowerState,
    SensorFrame, SensorMask, Stabilization, ToyModel, ToyOptions, VersionInfo,
};
use crate::error::{LinkError, Result};
use crate::link::{DeviceInfo, Request, Shared, StatsSnapshot};
use crate::protocol::{DeviceEvent, FreeFallEvent, ListenerId};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle to a connected (or connecting) toy
#[derive(Clone)]
pub struct Toy {
    requests: mpsc::Sender<Request>,
    shared: Arc<Shared>,
    sensor_interval_ms: u32,
}

impl Toy {
    pub(crate) fn new(
        requests: mpsc::Sender<Request>,
        shared: Arc<Shared>,
        sensor_interval_ms: u32,
    ) -> Self {
        Self {
            requests,
            shared,
            sensor_interval_ms,
        }
    }

    /// Send a command and wait for its response payload
    pub async fn send(&self, command: Command) -> Result<Bytes> {
        if !self.is_connected() {
            return Err(LinkError::Disconnected);
        }
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Command { command, reply })
            .await
            .map_err(|_| LinkError::Disconnected)?;
        rx.await.unwrap_or(Err(LinkError::Disconnected))
    }

    async fn send_unit(&self, command: Command) -> Result<()> {
        self.send(command).await.map(|_| ())
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// Roll toward `heading` degrees at `speed` (0..=255)
    pub async fn roll(&self, heading: f64, speed: f64) -> Result<()> {
        self.send_unit(Command::roll(heading, speed)).await
    }

    /// Stop, facing `heading`
    pub async fn stop_roll(&self, heading: f64) -> Result<()> {
        self.send_unit(Command::stop(heading)).await
    }

    pub async fn set_stabilization(&self, enabled: bool) -> Result<()> {
        let state = if enabled {
            Stabilization::On
        } else {
            Stabilization::Off
        };
        self.send_unit(Command::SetStabilization(state)).await
    }

    // =========================================================================
    // Lights and aiming
    // =========================================================================

    pub async fn set_main_led(&self, color: Color) -> Result<()> {
        self.send_unit(Command::SetMainLed(color)).await
    }

    /// Aiming LED brightness (0..=255)
    pub async fn set_back_led(&self, brightness: f64) -> Result<()> {
        self.send_unit(Command::back_led(brightness)).await
    }

    /// Light the aiming LED
    pub async fn start_aiming(&self) -> Result<()> {
        self.set_back_led(255.0).await
    }

    /// Turn the aiming LED off and make the current direction heading 0
    pub async fn stop_aiming(&self) -> Result<()> {
        self.set_back_led(0.0).await?;
        self.send_unit(Command::heading(0.0)).await
    }

    /// Rotate in place while aiming
    pub async fn rotate_aim(&self, heading: f64) -> Result<()> {
        self.send_unit(Command::heading(heading)).await
    }

    pub async fn set_toy_options(&self, options: ToyOptions) -> Result<()> {
        self.send_unit(Command::SetOptionsFlags(options)).await
    }

    // =========================================================================
    // Sensors
    // =========================================================================

    pub async fn set_collision_detection(&self, config: CollisionConfig) -> Result<()> {
        self.send_unit(Command::ConfigureCollisionDetection(config))
            .await
    }

    /// Stream `mask` at the configured interval
    pub async fn enable_sensors(&self, mask: SensorMask) -> Result<()> {
        self.enable_sensors_every(mask, self.sensor_interval_ms)
            .await
    }

    pub async fn enable_sensors_every(&self, mask: SensorMask, interval_ms: u32) -> Result<()> {
        self.send_unit(Command::sensor_streaming(mask, interval_ms))
            .await
    }

    pub async fn disable_sensors(&self) -> Result<()> {
        self.send_unit(Command::sensor_streaming(SensorMask::OFF, self.sensor_interval_ms))
            .await
    }

    /// Set the locator origin and heading reference
    pub async fn configure_locator(&self, x: f64, y: f64, yaw: f64) -> Result<()> {
        self.send_unit(Command::configure_locator(x, y, yaw)).await
    }

    pub async fn reset_locator(&self) -> Result<()> {
        self.send_unit(Command::locator_reset()).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn ping(&self) -> Result<()> {
        self.send_unit(Command::Ping).await
    }

    /// Query versioning and refresh the cache
    pub async fn versions(&self) -> Result<VersionInfo> {
        let payload = self.send(Command::Versioning).await?;
        let info = VersionInfo::decode(&payload)?;
        self.shared.device.lock().version = Some(info.clone());
        self.shared
            .dispatcher
            .device
            .emit(&DeviceEvent::Version(info.clone()));
        Ok(info)
    }

    /// Query power state and refresh the cache
    pub async fn power_state(&self) -> Result<PowerState> {
        let payload = self.send(Command::GetPowerState).await?;
        let state = PowerState::decode(&payload)?;
        {
            let mut device = self.shared.device.lock();
            device.battery_voltage = Some(state.battery_voltage);
            device.charge_state = Some(state.charge_state);
        }
        self.shared
            .dispatcher
            .device
            .emit(&DeviceEvent::PowerState(state));
        Ok(state)
    }

    // =========================================================================
    // Cached device info
    // =========================================================================

    pub fn device_info(&self) -> DeviceInfo {
        self.shared.device.lock().clone()
    }

    pub fn app_version(&self) -> Option<AppVersion> {
        self.shared
            .device
            .lock()
            .version
            .as_ref()
            .map(|v| v.app_version.clone())
    }

    pub fn model(&self) -> Option<ToyModel> {
        self.shared.device.lock().version.as_ref().map(|v| v.model)
    }

    pub fn battery_voltage(&self) -> Option<f64> {
        self.shared.device.lock().battery_voltage
    }

    pub fn charge_state(&self) -> Option<ChargeState> {
        self.shared.device.lock().charge_state
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    pub fn add_collision_listener(
        &self,
        listener: impl Fn(&CollisionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.dispatcher.collision.add(listener)
    }

    pub fn add_sensor_listener(
        &self,
        listener: impl Fn(&SensorFrame) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.dispatcher.sensor.add(listener)
    }

    pub fn add_device_listener(
        &self,
        listener: impl Fn(&DeviceEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.dispatcher.device.add(listener)
    }

    pub fn add_free_fall_listener(
        &self,
        listener: impl Fn(&FreeFallEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.dispatcher.free_fall.add(listener)
    }

    /// Unregister a listener of any kind; false if unknown
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let d = &self.shared.dispatcher;
        d.collision.remove(id) || d.sensor.remove(id) || d.device.remove(id) || d.free_fall.remove(id)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Tear the link down
    ///
    /// Every pending call fails with `Disconnected`; so does every later call.
    /// Registered listeners are dropped.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self.requests.send(Request::Disconnect { done }).await.is_ok() {
            let _ = rx.await;
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}
