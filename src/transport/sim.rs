//! Simulated toy peripheral
//!
//! Plays the device side of the GATT conversation in a background task so
//! the engine can run without a radio:
//! - answers discovery with the robot control and BLE services
//! - accepts the wake-up writes and the response subscription
//! - parses command frames and answers them with sync responses
//! - streams sensor samples and emits collisions when asked to
//!
//! Motion is dead reckoning from the last roll command. Accelerometer
//! channels report a toy resting on the floor (1 g on Z).

use super::{PeripheralEvent, PeripheralRequest, Transport, TransportChannels};
use crate::codec::command::{
    CID_CONFIGURE_COLLISION_DETECTION, CID_CONFIGURE_LOCATOR, CID_GET_POWER_STATE, CID_PING,
    CID_ROLL, CID_SET_BACK_LED, CID_SET_DATA_STREAMING, CID_SET_HEADING, CID_SET_OPTIONS_FLAGS,
    CID_SET_RGB_LED, CID_SET_STABILIZATION, CID_VERSIONING, DID_CORE, DID_SPHERO,
};
use crate::codec::{
    packet, CollisionAcceleration, CollisionAxis, CollisionEvent, CollisionPower, CommandFrame,
    SensorMask, ASYNC_COLLISION, ASYNC_SENSOR_DATA,
};
use crate::config::SimulatorConfig;
use crate::constants::{
    ANTI_DOS_CHARACTERISTIC, BLE_SERVICE, CHANNEL_CAPACITY, COMMANDS_CHARACTERISTIC,
    RESPONSE_CHARACTERISTIC, ROBOT_CONTROL_SERVICE, SENSOR_BASE_RATE_HZ, SESSION_TICK_MS,
    TX_POWER_CHARACTERISTIC, WAKE_CHARACTERISTIC,
};
use crate::error::{LinkError, Result};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};
use uuid::Uuid;

/// Response codes the simulated firmware uses
const RSP_OK: u8 = 0x00;
const RSP_BAD_COMMAND: u8 = 0x04;
const RSP_BAD_PARAM: u8 = 0x07;

/// Top speed at speed byte 255 (cm/s)
const TOP_SPEED_CM_S: f64 = 200.0;

/// One g in filtered accelerometer counts
const ONE_G: i16 = 4096;

/// In-process stand-in for a Sphero V1 peripheral
///
/// # Example
///
/// ```ignore
/// let toy = link::connect(SimulatedToy::new(config.simulator.clone()), &config, None).await?;
/// toy.enable_sensors(SensorMask::LOCATOR_ALL).await?;
/// ```
pub struct SimulatedToy {
    config: SimulatorConfig,
}

impl SimulatedToy {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

impl Transport for SimulatedToy {
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| LinkError::Runtime {
            source: std::io::Error::other(e),
        })?;

        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let device = Device::new(self.config, event_tx);
        runtime.spawn(device.run(request_rx, shutdown));

        Ok(TransportChannels {
            rx: event_rx,
            tx: request_tx,
        })
    }
}

/// Device-side state
struct Device {
    config: SimulatorConfig,
    events: mpsc::Sender<PeripheralEvent>,
    /// Response notifications enabled
    subscribed: bool,
    started: Instant,

    speed: u8,
    heading: u16,
    /// Locator position and the time it was last advanced (cm)
    position: (f64, f64),
    moved_at: Instant,

    mask: SensorMask,
    stream_period: Option<Duration>,
    next_sample: Option<Instant>,

    collisions: bool,
    next_collision: Option<Instant>,
}

impl Device {
    fn new(config: SimulatorConfig, events: mpsc::Sender<PeripheralEvent>) -> Self {
        let now = Instant::now();
        Self {
            config,
            events,
            subscribed: false,
            started: now,
            speed: 0,
            heading: 0,
            position: (0.0, 0.0),
            moved_at: now,
            mask: SensorMask::OFF,
            stream_period: None,
            next_sample: None,
            collisions: false,
            next_collision: None,
        }
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<PeripheralRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(SESSION_TICK_MS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = self.next_timer();

            tokio::select! {
                biased;

                _ = tick.tick() => {
                    if shutdown.load(Ordering::Relaxed) {
                        debug!("Simulated toy shutting down");
                        break;
                    }
                }

                request = requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    if !self.handle(request).await {
                        break;
                    }
                }

                _ = sleep_until_some(wake) => {
                    if !self.on_timer(Instant::now()).await {
                        break;
                    }
                }
            }
        }
    }

    fn next_timer(&self) -> Option<Instant> {
        match (self.next_sample, self.next_collision) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Returns false once the peer is gone or a disconnect was handled
    async fn handle(&mut self, request: PeripheralRequest) -> bool {
        let event = match request {
            PeripheralRequest::DiscoverServices(wanted) => {
                let found = wanted
                    .into_iter()
                    .filter(|s| *s == ROBOT_CONTROL_SERVICE || *s == BLE_SERVICE)
                    .collect();
                PeripheralEvent::ServicesDiscovered(Ok(found))
            }
            PeripheralRequest::DiscoverCharacteristics {
                service,
                characteristics,
            } => {
                let offered = offered_characteristics(service);
                let found = characteristics
                    .into_iter()
                    .filter(|c| offered.contains(c))
                    .collect();
                PeripheralEvent::CharacteristicsDiscovered {
                    service,
                    result: Ok(found),
                }
            }
            PeripheralRequest::Write {
                characteristic,
                data,
                ..
            } => return self.on_write(characteristic, data).await,
            PeripheralRequest::Subscribe { characteristic } => {
                let result = if characteristic == RESPONSE_CHARACTERISTIC {
                    self.subscribed = true;
                    Ok(())
                } else {
                    Err(format!("characteristic {} does not notify", characteristic))
                };
                PeripheralEvent::SubscriptionChanged {
                    characteristic,
                    result,
                }
            }
            PeripheralRequest::Disconnect => {
                let _ = self
                    .events
                    .send(PeripheralEvent::Disconnected {
                        reason: Some("disconnect requested".into()),
                    })
                    .await;
                return false;
            }
        };
        self.emit(event).await
    }

    async fn on_write(&mut self, characteristic: Uuid, data: Bytes) -> bool {
        let known = [
            COMMANDS_CHARACTERISTIC,
            ANTI_DOS_CHARACTERISTIC,
            TX_POWER_CHARACTERISTIC,
            WAKE_CHARACTERISTIC,
        ];
        let result = if known.contains(&characteristic) {
            Ok(())
        } else {
            Err(format!("characteristic {} is not writable", characteristic))
        };
        let accepted = result.is_ok();

        let completed = PeripheralEvent::WriteCompleted {
            characteristic,
            result,
        };
        if !self.emit(completed).await {
            return false;
        }

        if accepted && characteristic == COMMANDS_CHARACTERISTIC {
            return self.on_command_bytes(&data).await;
        }
        true
    }

    async fn on_command_bytes(&mut self, data: &[u8]) -> bool {
        let (frame, wants_answer) = match packet::decode_command(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Firmware drops frames it cannot parse
                debug!("Simulated toy ignoring bad frame: {}", e);
                return true;
            }
        };

        let sequence = frame.sequence;
        let (code, answer) = self.execute(&frame);
        trace!(
            "Simulated toy ran {:02X}:{:02X} seq {} -> 0x{:02X}",
            frame.opcode.device,
            frame.opcode.command,
            sequence,
            code
        );

        if !wants_answer {
            return true;
        }
        self.notify(packet::encode_sync_response(code, sequence, &answer))
            .await
    }

    /// Apply one command; returns the response code and data
    fn execute(&mut self, frame: &CommandFrame) -> (u8, Vec<u8>) {
        let p = &frame.payload;
        let needs = |len: usize| p.len() >= len;

        match (frame.opcode.device, frame.opcode.command) {
            (DID_CORE, CID_PING) => (RSP_OK, Vec::new()),
            (DID_CORE, CID_VERSIONING) => (RSP_OK, self.versioning()),
            (DID_CORE, CID_GET_POWER_STATE) => (RSP_OK, self.power_state()),
            (DID_SPHERO, CID_ROLL) if needs(4) => {
                self.advance(Instant::now());
                self.heading = u16::from_be_bytes([p[1], p[2]]) % 360;
                self.speed = if p[3] == 0 { 0 } else { p[0] };
                (RSP_OK, Vec::new())
            }
            // Moves the heading reference only
            (DID_SPHERO, CID_SET_HEADING) if needs(2) => (RSP_OK, Vec::new()),
            (DID_SPHERO, CID_SET_DATA_STREAMING) if needs(13) => {
                let divisor = u16::from_be_bytes([p[0], p[1]]);
                let low = u32::from_be_bytes([p[4], p[5], p[6], p[7]]);
                let high = u32::from_be_bytes([p[9], p[10], p[11], p[12]]);
                let mask = SensorMask::from_bits(u64::from(high) << 32 | u64::from(low));
                self.set_streaming(divisor, mask);
                (RSP_OK, Vec::new())
            }
            (DID_SPHERO, CID_CONFIGURE_COLLISION_DETECTION) if needs(6) => {
                self.set_collisions(p[0] != 0);
                (RSP_OK, Vec::new())
            }
            (DID_SPHERO, CID_CONFIGURE_LOCATOR) if needs(7) => {
                let x = i16::from_be_bytes([p[1], p[2]]);
                let y = i16::from_be_bytes([p[3], p[4]]);
                self.position = (f64::from(x), f64::from(y));
                self.moved_at = Instant::now();
                (RSP_OK, Vec::new())
            }
            (DID_SPHERO, CID_SET_STABILIZATION)
            | (DID_SPHERO, CID_SET_RGB_LED)
            | (DID_SPHERO, CID_SET_BACK_LED)
            | (DID_SPHERO, CID_SET_OPTIONS_FLAGS) => (RSP_OK, Vec::new()),
            (DID_SPHERO, CID_ROLL)
            | (DID_SPHERO, CID_SET_HEADING)
            | (DID_SPHERO, CID_SET_DATA_STREAMING)
            | (DID_SPHERO, CID_CONFIGURE_COLLISION_DETECTION)
            | (DID_SPHERO, CID_CONFIGURE_LOCATOR) => (RSP_BAD_PARAM, Vec::new()),
            _ => (RSP_BAD_COMMAND, Vec::new()),
        }
    }

    fn versioning(&self) -> Vec<u8> {
        let c = &self.config;
        vec![
            0x02,
            c.model,
            c.hardware,
            c.firmware_major,
            c.firmware_minor,
            0x00,
            0x00,
            0x00,
        ]
    }

    fn power_state(&self) -> Vec<u8> {
        let [hi, lo] = self.config.battery_voltage_centivolts.to_be_bytes();
        // Record version, charging state "OK", voltage, charge count, seconds awake
        vec![0x01, 0x02, hi, lo, 0x00, 0x05, 0x00, 0x3C]
    }

    fn set_streaming(&mut self, divisor: u16, mask: SensorMask) {
        self.mask = mask;
        if divisor == 0 || mask.is_off() {
            debug!("Simulated toy stopped streaming");
            self.stream_period = None;
            self.next_sample = None;
            return;
        }
        let period =
            Duration::from_micros(u64::from(divisor) * 1_000_000 / u64::from(SENSOR_BASE_RATE_HZ));
        debug!("Simulated toy streaming {} every {:?}", mask, period);
        self.stream_period = Some(period);
        self.next_sample = Some(Instant::now() + period);
    }

    fn set_collisions(&mut self, enabled: bool) {
        self.collisions = enabled;
        self.next_collision = match (enabled, self.config.collision_interval_ms) {
            (true, ms) if ms > 0 => Some(Instant::now() + Duration::from_millis(ms)),
            _ => None,
        };
    }

    async fn on_timer(&mut self, now: Instant) -> bool {
        if let (Some(at), Some(period)) = (self.next_sample, self.stream_period) {
            if at <= now {
                self.next_sample = Some(at + period);
                self.advance(now);
                let sample = self.sample();
                if !self.notify(packet::encode_async(ASYNC_SENSOR_DATA, &sample)).await {
                    return false;
                }
            }
        }

        if let Some(at) = self.next_collision.filter(|_| self.collisions) {
            if at <= now {
                self.next_collision =
                    Some(at + Duration::from_millis(self.config.collision_interval_ms));
                let event = self.collision(now);
                if !self.notify(packet::encode_async(ASYNC_COLLISION, &event.encode())).await {
                    return false;
                }
            }
        }
        true
    }

    /// Velocity from the current roll (cm/s)
    fn velocity(&self) -> (f64, f64) {
        let v = f64::from(self.speed) / 255.0 * TOP_SPEED_CM_S;
        let rad = f64::from(self.heading).to_radians();
        (v * rad.sin(), v * rad.cos())
    }

    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.moved_at).as_secs_f64();
        let (vx, vy) = self.velocity();
        self.position.0 += vx * dt;
        self.position.1 += vy * dt;
        self.moved_at = now;
    }

    /// One streamed frame for the current mask
    fn sample(&self) -> Vec<u8> {
        let (vx, vy) = self.velocity();
        let yaw = if self.heading > 180 {
            i32::from(self.heading) - 360
        } else {
            i32::from(self.heading)
        };

        let mut out = Vec::with_capacity(self.mask.channel_count() * 2);
        for bit in self.mask.stream_order() {
            let value: i16 = match bit {
                13 | 25 => ONE_G,
                16 => yaw as i16,
                59 => saturate(self.position.0),
                58 => saturate(self.position.1),
                56 => saturate(vx),
                55 => saturate(vy),
                _ => 0,
            };
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }

    fn collision(&self, now: Instant) -> CollisionEvent {
        let rad = f64::from(self.heading).to_radians();
        let elapsed = now.saturating_duration_since(self.started);
        CollisionEvent {
            impact_acceleration: CollisionAcceleration {
                x: -0.5 * rad.sin(),
                y: -0.5 * rad.cos(),
                z: 0.0,
            },
            impact_axis: CollisionAxis { x: true, y: true },
            impact_power: CollisionPower { x: 120.0, y: 80.0 },
            impact_speed: f64::from(self.speed) / 255.0,
            timestamp: elapsed.as_millis() as f64 / 1000.0,
        }
    }

    async fn notify(&self, data: Bytes) -> bool {
        if !self.subscribed {
            trace!("Simulated toy not subscribed, dropping {} bytes", data.len());
            return true;
        }
        self.emit(PeripheralEvent::Notification {
            characteristic: RESPONSE_CHARACTERISTIC,
            data,
        })
        .await
    }

    async fn emit(&self, event: PeripheralEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

fn offered_characteristics(service: Uuid) -> Vec<Uuid> {
    if service == ROBOT_CONTROL_SERVICE {
        vec![COMMANDS_CHARACTERISTIC, RESPONSE_CHARACTERISTIC]
    } else if service == BLE_SERVICE {
        vec![
            ANTI_DOS_CHARACTERISTIC,
            TX_POWER_CHARACTERISTIC,
            WAKE_CHARACTERISTIC,
        ]
    } else {
        Vec::new()
    }
}

fn saturate(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Command, FrameKind, Opcode, SensorFrame};

    fn channels(config: SimulatorConfig) -> TransportChannels {
        SimulatedToy::new(config)
            .spawn(Arc::new(AtomicBool::new(false)))
            .unwrap()
    }

    async fn subscribe(ch: &mut TransportChannels) {
        ch.tx
            .send(PeripheralRequest::Subscribe {
                characteristic: RESPONSE_CHARACTERISTIC,
            })
            .await
            .unwrap();
        let event = ch.rx.recv().await.unwrap();
        assert!(matches!(
            event,
            PeripheralEvent::SubscriptionChanged { result: Ok(()), .. }
        ));
    }

    async fn write_command(ch: &mut TransportChannels, sequence: u8, command: &Command) {
        let frame = CommandFrame {
            sequence,
            opcode: command.opcode(),
            payload: command.payload(),
        };
        ch.tx
            .send(PeripheralRequest::Write {
                characteristic: COMMANDS_CHARACTERISTIC,
                data: packet::encode_command(&frame),
                with_response: true,
            })
            .await
            .unwrap();
        let event = ch.rx.recv().await.unwrap();
        assert!(matches!(
            event,
            PeripheralEvent::WriteCompleted { result: Ok(()), .. }
        ));
    }

    async fn next_frame(ch: &mut TransportChannels) -> crate::codec::ResponseFrame {
        match ch.rx.recv().await.unwrap() {
            PeripheralEvent::Notification { data, .. } => packet::decode_frame(&data).unwrap(),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    #[tokio::test]
    async fn test_discovery_reports_known_services_only() {
        let mut ch = channels(SimulatorConfig::default());
        let unknown = Uuid::from_u128(1);
        ch.tx
            .send(PeripheralRequest::DiscoverServices(vec![
                ROBOT_CONTROL_SERVICE,
                unknown,
                BLE_SERVICE,
            ]))
            .await
            .unwrap();

        let event = ch.rx.recv().await.unwrap();
        assert_eq!(
            event,
            PeripheralEvent::ServicesDiscovered(Ok(vec![ROBOT_CONTROL_SERVICE, BLE_SERVICE]))
        );
    }

    #[tokio::test]
    async fn test_characteristic_discovery() {
        let mut ch = channels(SimulatorConfig::default());
        ch.tx
            .send(PeripheralRequest::DiscoverCharacteristics {
                service: BLE_SERVICE,
                characteristics: vec![WAKE_CHARACTERISTIC, COMMANDS_CHARACTERISTIC],
            })
            .await
            .unwrap();

        match ch.rx.recv().await.unwrap() {
            PeripheralEvent::CharacteristicsDiscovered { service, result } => {
                assert_eq!(service, BLE_SERVICE);
                assert_eq!(result, Ok(vec![WAKE_CHARACTERISTIC]));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    #[tokio::test]
    async fn test_versioning_answer() {
        let mut ch = channels(SimulatorConfig::default());
        subscribe(&mut ch).await;
        write_command(&mut ch, 9, &Command::Versioning).await;

        let frame = next_frame(&mut ch).await;
        assert_eq!(
            frame.kind,
            FrameKind::SyncAck {
                code: 0,
                sequence: 9
            }
        );
        assert_eq!(frame.payload[1], crate::constants::MODEL_SPRK_PLUS);
        assert_eq!(&frame.payload[3..5], &[3, 59]);
    }

    #[tokio::test]
    async fn test_power_state_answer() {
        let mut ch = channels(SimulatorConfig::default());
        subscribe(&mut ch).await;
        write_command(&mut ch, 1, &Command::GetPowerState).await;

        let frame = next_frame(&mut ch).await;
        let state = crate::codec::PowerState::decode(&frame.payload).unwrap();
        assert!((state.battery_voltage - 7.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_command_rejected() {
        let mut ch = channels(SimulatorConfig::default());
        subscribe(&mut ch).await;

        let frame = CommandFrame {
            sequence: 4,
            opcode: Opcode {
                device: 0x7F,
                command: 0x7F,
            },
            payload: Bytes::new(),
        };
        ch.tx
            .send(PeripheralRequest::Write {
                characteristic: COMMANDS_CHARACTERISTIC,
                data: packet::encode_command(&frame),
                with_response: true,
            })
            .await
            .unwrap();
        ch.rx.recv().await.unwrap();

        let answer = next_frame(&mut ch).await;
        assert_eq!(
            answer.kind,
            FrameKind::SyncAck {
                code: RSP_BAD_COMMAND,
                sequence: 4
            }
        );
    }

    #[tokio::test]
    async fn test_no_notifications_before_subscribe() {
        let mut ch = channels(SimulatorConfig::default());
        write_command(&mut ch, 0, &Command::Ping).await;

        let quiet = tokio::time::timeout(Duration::from_millis(50), ch.rx.recv()).await;
        assert!(quiet.is_err());
    }

    // =========================================================================
    // Streams
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_sensor_stream_matches_mask() {
        let mut ch = channels(SimulatorConfig::default());
        subscribe(&mut ch).await;

        let mask = SensorMask::ACCELEROMETER_FILTERED_ALL | SensorMask::LOCATOR_ALL;
        write_command(&mut ch, 0, &Command::sensor_streaming(mask, 100)).await;
        next_frame(&mut ch).await;

        let frame = next_frame(&mut ch).await;
        assert_eq!(
            frame.kind,
            FrameKind::AsyncEvent(crate::codec::AsyncEventType::SensorData)
        );
        let samples = SensorFrame::decode(mask, &frame.payload).unwrap();
        assert_eq!(samples.len(), 1);
        let accel = samples[0].filtered_acceleration().unwrap();
        assert_eq!(accel.z, Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collisions_on_interval() {
        let config = SimulatorConfig {
            collision_interval_ms: 500,
            ..Default::default()
        };
        let mut ch = channels(config);
        subscribe(&mut ch).await;

        let enable = Command::ConfigureCollisionDetection(crate::codec::CollisionConfig::enabled());
        write_command(&mut ch, 0, &enable).await;
        next_frame(&mut ch).await;

        let frame = next_frame(&mut ch).await;
        let event = CollisionEvent::decode(&frame.payload).unwrap();
        assert!(event.impact_axis.x);
        assert!(event.timestamp >= 0.5);
    }

    #[tokio::test]
    async fn test_disconnect_ends_device() {
        let mut ch = channels(SimulatorConfig::default());
        ch.tx.send(PeripheralRequest::Disconnect).await.unwrap();

        assert!(matches!(
            ch.rx.recv().await,
            Some(PeripheralEvent::Disconnected { .. })
        ));
        assert!(ch.rx.recv().await.is_none());
    }

    #[test]
    fn test_saturate() {
        assert_eq!(saturate(1e9), i16::MAX);
        assert_eq!(saturate(-1e9), i16::MIN);
        assert_eq!(saturate(2.6), 3);
    }
}
