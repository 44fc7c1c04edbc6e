//! Link session - the single task owning all protocol state
//!
//! The session handles:
//! - Driving the connection handshake
//! - Single-flight command writes and response correlation
//! - Decoding and dispatching unsolicited frames
//! - Per-command timeouts, sleep handling and teardown
//!
//! The session does NOT handle:
//! - GATT I/O (the transport's job)
//! - Reconnection; a torn-down session stays down
//!
//! Every transport event and every `Toy` request is processed on this one
//! task, so the state below needs no locks. Only the listener sets, stats
//! and device cache in `Shared` are visible to other tasks.

use super::{DeviceInfo, Shared};
use crate::codec::{
    packet, AsyncEventType, CollisionEvent, Command, DeviceInfoType, FrameKind, PowerState,
    ResponseFrame, SensorFrame, SensorMask,
};
use crate::config::Config;
use crate::constants::{COMMANDS_CHARACTERISTIC, RESPONSE_CHARACTERISTIC, SESSION_TICK_MS};
use crate::error::{LinkError, Result};
use crate::logging::{self, LogEntry};
use crate::protocol::{
    CommandChannel, ConnectionHandshake, DeviceEvent, DeviceSnapshot, FreeFallDetector,
    HandshakeConfig, HandshakeStep, Outbound, Routed, WriteOutcome,
};
use crate::transport::{PeripheralEvent, PeripheralRequest, TransportChannels};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Reply slot for one caller
pub(crate) type Reply = oneshot::Sender<Result<Bytes>>;

/// Message from a `Toy` handle to the session
pub(crate) enum Request {
    Command { command: Command, reply: Reply },
    Disconnect { done: oneshot::Sender<()> },
}

/// Who is waiting for a command's response
pub(crate) enum Waiter {
    /// A `Toy` caller
    Caller(Reply),
    /// The handshake's versioning or power state query
    Handshake,
    /// Ping sent in answer to a sleep warning
    KeepAlive,
}

pub(crate) struct Session {
    transport: TransportChannels,
    requests: mpsc::Receiver<Request>,
    shared: Arc<Shared>,
    config: Config,
    handshake: ConnectionHandshake,
    channel: CommandChannel<Waiter>,
    /// Caller commands received before Ready
    deferred: VecDeque<(Command, Reply)>,
    ready_tx: Option<oneshot::Sender<Result<DeviceSnapshot>>>,
    /// Mask the device is streaming with
    mask: SensorMask,
    /// Mask carried by the in-flight SetDataStreaming write
    mask_in_flight: Option<SensorMask>,
    free_fall: FreeFallDetector,
    log_tx: Option<mpsc::Sender<LogEntry>>,
    finished: bool,
    peripheral_gone: bool,
}

impl Session {
    pub(crate) fn new(
        transport: TransportChannels,
        requests: mpsc::Receiver<Request>,
        shared: Arc<Shared>,
        config: Config,
        ready_tx: oneshot::Sender<Result<DeviceSnapshot>>,
        log_tx: Option<mpsc::Sender<LogEntry>>,
    ) -> Self {
        let handshake = ConnectionHandshake::new(HandshakeConfig {
            auth_token: Bytes::from(config.link.auth_token.clone().into_bytes()),
            tx_power_level: config.link.tx_power_level,
        });
        let free_fall = FreeFallDetector::new(&config.free_fall);

        Self {
            transport,
            requests,
            shared,
            config,
            handshake,
            channel: CommandChannel::new(),
            deferred: VecDeque::new(),
            ready_tx: Some(ready_tx),
            mask: SensorMask::OFF,
            mask_in_flight: None,
            free_fall,
            log_tx,
            finished: false,
            peripheral_gone: false,
        }
    }

    /// Run until disconnect, handshake failure, or shutdown
    pub(crate) async fn run(mut self, shutdown: Arc<AtomicBool>) {
        logging::try_log(&self.log_tx, LogEntry::system("Connecting"), "system");
        let steps = self.handshake.start();
        self.apply_steps(steps);

        let mut tick = tokio::time::interval(Duration::from_millis(SESSION_TICK_MS));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.finished {
            tokio::select! {
                biased;

                // Periodic shutdown check and timeout sweep
                _ = tick.tick() => {
                    if shutdown.load(Ordering::Relaxed) {
                        debug!("Session shutdown requested");
                        break;
                    }
                    self.expire(Instant::now());
                }

                event = self.transport.rx.recv() => {
                    match event {
                        Some(event) => self.on_event(event),
                        None => {
                            // Channel closed = transport stopped
                            self.peripheral_gone = true;
                            break;
                        }
                    }
                }

                request = self.requests.recv() => {
                    match request {
                        Some(request) => self.on_request(request),
                        None => {
                            // Every Toy handle is gone
                            break;
                        }
                    }
                }
            }
        }

        self.teardown();
        self.reject_remaining_requests();
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    fn on_request(&mut self, request: Request) {
        match request {
            Request::Command { command, reply } => {
                if self.finished || self.channel.is_closed() {
                    let _ = reply.send(Err(LinkError::Disconnected));
                } else if self.handshake.is_ready() {
                    self.submit(command, Waiter::Caller(reply));
                    self.pump();
                } else {
                    debug!("Deferring {} until ready", command.name());
                    self.deferred.push_back((command, reply));
                }
            }
            Request::Disconnect { done } => {
                info!("Disconnect requested");
                self.teardown();
                let _ = done.send(());
            }
        }
    }

    fn on_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::ServicesDiscovered(result) => {
                let steps = self.handshake.on_services_discovered(result);
                self.apply_steps(steps);
            }
            PeripheralEvent::CharacteristicsDiscovered { service, result } => {
                let steps = self.handshake.on_characteristics_discovered(service, result);
                self.apply_steps(steps);
            }
            PeripheralEvent::WriteCompleted {
                characteristic,
                result,
            } => {
                if characteristic == COMMANDS_CHARACTERISTIC {
                    self.on_command_written(result);
                } else {
                    let steps = self.handshake.on_write_complete(characteristic, result);
                    self.apply_steps(steps);
                }
            }
            PeripheralEvent::SubscriptionChanged {
                characteristic,
                result,
            } => {
                let steps = self.handshake.on_subscription(characteristic, result);
                self.apply_steps(steps);
            }
            PeripheralEvent::Notification {
                characteristic,
                data,
            } => {
                if characteristic == RESPONSE_CHARACTERISTIC {
                    self.on_notification(data);
                } else {
                    debug!("Ignoring notification from {}", characteristic);
                }
            }
            PeripheralEvent::Disconnected { reason } => {
                info!(
                    "Peripheral disconnected: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.peripheral_gone = true;
                self.teardown();
            }
        }
    }

    fn on_command_written(&mut self, result: std::result::Result<(), String>) {
        self.complete_write(result);
        self.pump();
    }

    /// Settle the in-flight write without pumping the queue
    fn complete_write(&mut self, result: std::result::Result<(), String>) {
        let reason = result.as_ref().err().cloned();
        let mask = self.mask_in_flight.take();

        match self.channel.on_write_complete(result) {
            WriteOutcome::Sent { sequence } => {
                debug!("Command {} written", sequence);
                if let Some(mask) = mask {
                    self.apply_mask(mask);
                }
            }
            WriteOutcome::Failed { sequence, waiter } => {
                let reason = reason.unwrap_or_default();
                warn!("Write of command {} failed: {}", sequence, reason);
                self.resolve(waiter, Err(LinkError::transport("command write", reason)));
            }
            WriteOutcome::FailedOrphan { sequence } => {
                debug!("Write failed for already-resolved command {}", sequence);
            }
            WriteOutcome::Spurious => {
                debug!("Write completion with nothing in flight");
            }
        }
    }

    fn on_notification(&mut self, data: Bytes) {
        self.shared.stats.add_rx(data.len());

        let frame = match packet::decode_frame(&data) {
            Ok(frame) => frame,
            Err(e) => {
                self.malformed("frame", e.to_string());
                return;
            }
        };

        match self.channel.on_response(frame) {
            Routed::Matched {
                sequence,
                name,
                code,
                payload,
                waiter,
            } => {
                logging::try_log(
                    &self.log_tx,
                    LogEntry::protocol_in(name, data.len()),
                    "protocol_in",
                );
                let result = if code == 0 {
                    Ok(payload)
                } else {
                    debug!("Command {} ({}) rejected with 0x{:02X}", sequence, name, code);
                    Err(LinkError::CommandRejected { code })
                };
                self.resolve(waiter, result);
            }
            Routed::Unmatched { sequence } => {
                self.shared.stats.add_unmatched();
                let err = LinkError::UnmatchedResponse { sequence };
                debug!("{}", err);
                logging::try_log(&self.log_tx, LogEntry::system(err.to_string()), "system");
            }
            Routed::Unsolicited(frame) => {
                self.on_unsolicited(frame, data.len());
            }
        }

        // A response may have freed the id the queue was stalled on
        self.pump();
    }

    fn on_unsolicited(&mut self, frame: ResponseFrame, size: usize) {
        match frame.kind {
            FrameKind::AsyncEvent(AsyncEventType::Collision) => {
                match CollisionEvent::decode(&frame.payload) {
                    Ok(event) => {
                        logging::try_log(
                            &self.log_tx,
                            LogEntry::protocol_in("Collision", size),
                            "protocol_in",
                        );
                        self.shared.dispatcher.collision.emit(&event);
                    }
                    Err(e) => self.malformed("collision", e.to_string()),
                }
            }
            FrameKind::AsyncEvent(AsyncEventType::SensorData) => {
                match SensorFrame::decode(self.mask, &frame.payload) {
                    Ok(frames) => {
                        logging::try_log(
                            &self.log_tx,
                            LogEntry::protocol_in("SensorData", size),
                            "protocol_in",
                        );
                        let now = Instant::now();
                        for sample in &frames {
                            self.shared.dispatcher.sensor.emit(sample);
                            if let Some(event) = self.free_fall.observe(sample, now) {
                                debug!("Free fall after {:?}", event.since_landed);
                                self.shared.dispatcher.free_fall.emit(&event);
                            }
                        }
                    }
                    Err(e) => self.malformed("sensor", e.to_string()),
                }
            }
            FrameKind::AsyncEvent(AsyncEventType::SleepWarning) => {
                info!("Toy is about to sleep");
                logging::try_log(
                    &self.log_tx,
                    LogEntry::protocol_in("SleepWarning", size),
                    "protocol_in",
                );
                self.shared.dispatcher.device.emit(&DeviceEvent::SleepWarning);
                if self.config.link.keep_awake && self.handshake.is_ready() {
                    self.submit(Command::Ping, Waiter::KeepAlive);
                    self.pump();
                }
            }
            FrameKind::AsyncEvent(AsyncEventType::DidSleep) => {
                info!("Toy went to sleep");
                logging::try_log(
                    &self.log_tx,
                    LogEntry::protocol_in("DidSleep", size),
                    "protocol_in",
                );
                self.shared.dispatcher.device.emit(&DeviceEvent::DidSleep);
                self.teardown();
            }
            FrameKind::AsyncEvent(AsyncEventType::Other(id)) => {
                debug!("Ignoring async packet 0x{:02X} ({} bytes)", id, frame.payload.len());
            }
            FrameKind::DeviceInfo(DeviceInfoType::PowerNotification) => {
                match PowerState::decode_notification(&frame.payload) {
                    Ok(state) => {
                        logging::try_log(
                            &self.log_tx,
                            LogEntry::protocol_in("PowerNotification", size),
                            "protocol_in",
                        );
                        self.shared.device.lock().charge_state = Some(state);
                        self.shared
                            .dispatcher
                            .device
                            .emit(&DeviceEvent::PowerNotification(state));
                    }
                    Err(e) => self.malformed("power notification", e.to_string()),
                }
            }
            FrameKind::SyncAck { .. } => {
                // Routed by the sequencer, never unsolicited
            }
        }
    }

    fn malformed(&self, what: &str, reason: String) {
        self.shared.stats.add_malformed();
        let err = LinkError::MalformedFrame { reason };
        warn!("Dropping {}: {}", what, err);
        logging::try_log(
            &self.log_tx,
            LogEntry::system(format!("Dropped {}: {}", what, err)),
            "system",
        );
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    fn apply_steps(&mut self, steps: Vec<HandshakeStep>) {
        for step in steps {
            match step {
                HandshakeStep::Request(request) => {
                    if !self.send_peripheral(request) {
                        let steps = self.handshake.on_disconnect();
                        self.apply_steps(steps);
                    }
                }
                HandshakeStep::SendCommand(command) => {
                    self.submit(command, Waiter::Handshake);
                    self.pump();
                }
                HandshakeStep::Complete(Ok(snapshot)) => self.on_ready(snapshot),
                HandshakeStep::Complete(Err(failure)) => {
                    warn!("Handshake failed: {}", failure);
                    logging::try_log(
                        &self.log_tx,
                        LogEntry::system(format!("Handshake failed: {}", failure)),
                        "system",
                    );
                    if let Some(tx) = self.ready_tx.take() {
                        let _ = tx.send(Err(LinkError::HandshakeFailed {
                            reason: failure.clone(),
                        }));
                    }
                    for (_, reply) in self.deferred.drain(..) {
                        let _ = reply.send(Err(LinkError::HandshakeFailed {
                            reason: failure.clone(),
                        }));
                    }
                    self.teardown();
                }
            }
        }
    }

    fn on_ready(&mut self, snapshot: DeviceSnapshot) {
        info!(
            "Connected: model {:?}, firmware {}, {:.2} V",
            snapshot.version.model, snapshot.version.app_version, snapshot.power.battery_voltage
        );
        logging::try_log(&self.log_tx, LogEntry::system("Ready"), "system");

        *self.shared.device.lock() = DeviceInfo {
            version: Some(snapshot.version.clone()),
            battery_voltage: Some(snapshot.power.battery_voltage),
            charge_state: Some(snapshot.power.charge_state),
        };
        let dispatcher = &self.shared.dispatcher;
        dispatcher.device.emit(&DeviceEvent::Version(snapshot.version.clone()));
        dispatcher.device.emit(&DeviceEvent::PowerState(snapshot.power));

        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(Ok(snapshot));
        }

        while let Some((command, reply)) = self.deferred.pop_front() {
            self.submit(command, Waiter::Caller(reply));
        }
        self.pump();
    }

    // =========================================================================
    // Command channel
    // =========================================================================

    fn submit(&mut self, command: Command, waiter: Waiter) {
        let deadline = self
            .config
            .link
            .command_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));
        if let Err(waiter) = self.channel.submit(command, waiter, deadline) {
            self.resolve(waiter, Err(LinkError::Disconnected));
        }
    }

    /// Write queued frames while the write slot is free
    fn pump(&mut self) {
        while let Some(outbound) = self.channel.pump() {
            let Outbound {
                sequence,
                command,
                bytes,
            } = outbound;

            if let Command::SetDataStreaming { mask, .. } = command {
                self.mask_in_flight = Some(mask);
            }
            self.shared.stats.add_tx(bytes.len());
            logging::try_log(
                &self.log_tx,
                LogEntry::protocol_out(command.name(), bytes.len()),
                "protocol_out",
            );
            debug!("Writing {} as sequence {}", command.name(), sequence);

            let sent = self.send_peripheral(PeripheralRequest::Write {
                characteristic: COMMANDS_CHARACTERISTIC,
                data: bytes,
                with_response: true,
            });
            if sent {
                return;
            }
            if self.peripheral_gone {
                info!("Peripheral request channel closed");
                self.teardown();
                return;
            }
            // No completion will ever arrive for this write
            self.complete_write(Err("transport unavailable".into()));
        }
    }

    fn apply_mask(&mut self, mask: SensorMask) {
        if mask != self.mask {
            debug!("Sensor mask now {}", mask);
            self.free_fall.reset();
        }
        self.mask = mask;
    }

    fn resolve(&mut self, waiter: Waiter, result: Result<Bytes>) {
        match waiter {
            Waiter::Caller(reply) => {
                let _ = reply.send(result);
            }
            Waiter::Handshake => {
                let steps = self.handshake.on_command_response(result);
                self.apply_steps(steps);
            }
            Waiter::KeepAlive => match result {
                Ok(_) => debug!("Keep-alive ping answered"),
                Err(e) => debug!("Keep-alive ping failed: {}", e),
            },
        }
    }

    fn expire(&mut self, now: Instant) {
        for (sequence, waiter) in self.channel.expire(now) {
            self.shared.stats.add_timeout();
            warn!("Command {:?} timed out", sequence);
            self.resolve(waiter, Err(LinkError::Timeout { sequence }));
        }
        self.pump();
    }

    fn send_peripheral(&mut self, request: PeripheralRequest) -> bool {
        if self.peripheral_gone {
            return false;
        }
        match self.transport.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Peripheral request channel full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.peripheral_gone = true;
                false
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Resolve everything with `Disconnected` and stop; idempotent
    fn teardown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.shared.closed.store(true, Ordering::SeqCst);

        let waiters = self.channel.teardown();
        let count = waiters.len() + self.deferred.len();
        for waiter in waiters {
            self.resolve(waiter, Err(LinkError::Disconnected));
        }

        let steps = self.handshake.on_disconnect();
        self.apply_steps(steps);

        for (_, reply) in self.deferred.drain(..) {
            let _ = reply.send(Err(LinkError::Disconnected));
        }
        if let Some(tx) = self.ready_tx.take() {
            let _ = tx.send(Err(LinkError::Disconnected));
        }

        if !self.peripheral_gone {
            let _ = self.transport.tx.try_send(PeripheralRequest::Disconnect);
        }

        self.shared.dispatcher.clear();

        info!("Session closed ({} pending calls cancelled)", count);
        logging::try_log(&self.log_tx, LogEntry::system("Disconnected"), "system");
    }

    fn reject_remaining_requests(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Command { reply, .. } => {
                    let _ = reply.send(Err(LinkError::Disconnected));
                }
                Request::Disconnect { done } => {
                    let _ = done.send(());
                }
            }
        }
    }
}
