//! Connection handshake state machine
//!
//! ```text
//! Discovering ──► CharacteristicsFound ──► Authenticating ──► AwaitingVersion
//!                                          (anti-DoS, TX power,       │
//!                                           wake, subscribe)          ▼
//!                                     Ready ◄── AwaitingPowerState ◄──┘
//! ```
//!
//! Pure: every input returns the steps the session must carry out. Once the
//! machine reaches `Ready` or `Failed` it ignores all further input, so the
//! completion step is produced exactly once.

use crate::codec::{Command, PowerState, VersionInfo};
use crate::constants::{
    ANTI_DOS_CHARACTERISTIC, BLE_SERVICE, COMMANDS_CHARACTERISTIC, RESPONSE_CHARACTERISTIC,
    ROBOT_CONTROL_SERVICE, TX_POWER_CHARACTERISTIC, WAKE_CHARACTERISTIC, WAKE_ENABLE,
};
use crate::error::{HandshakeFailure, LinkError};
use crate::transport::PeripheralRequest;
use bytes::Bytes;
use std::collections::HashSet;
use uuid::Uuid;

/// Handshake progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Discovering,
    /// Every required characteristic present; anti-DoS write outstanding
    CharacteristicsFound,
    /// TX power, wake and subscribe in progress
    Authenticating,
    AwaitingVersion,
    AwaitingPowerState,
    Ready,
    Failed(HandshakeFailure),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

/// Device facts collected while connecting
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub version: VersionInfo,
    pub power: PowerState,
}

/// Action requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeStep {
    /// Issue a GATT request
    Request(PeripheralRequest),
    /// Send a command through the command channel, reporting its answer
    /// back with `on_command_response`
    SendCommand(Command),
    /// Handshake finished; emitted once
    Complete(std::result::Result<DeviceSnapshot, HandshakeFailure>),
}

/// Authentication writes in order; the first one is issued on `CharacteristicsFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStep {
    AntiDos,
    TxPower,
    Wake,
    Subscribe,
}

impl AuthStep {
    fn name(self) -> &'static str {
        match self {
            Self::AntiDos => "anti-DoS write",
            Self::TxPower => "TX power write",
            Self::Wake => "wake write",
            Self::Subscribe => "response subscription",
        }
    }

    fn characteristic(self) -> Uuid {
        match self {
            Self::AntiDos => ANTI_DOS_CHARACTERISTIC,
            Self::TxPower => TX_POWER_CHARACTERISTIC,
            Self::Wake => WAKE_CHARACTERISTIC,
            Self::Subscribe => RESPONSE_CHARACTERISTIC,
        }
    }
}

/// Characteristics that must all be present, with their names
const REQUIRED: [(Uuid, Uuid, &str); 5] = [
    (ROBOT_CONTROL_SERVICE, COMMANDS_CHARACTERISTIC, "commands"),
    (ROBOT_CONTROL_SERVICE, RESPONSE_CHARACTERISTIC, "response"),
    (BLE_SERVICE, ANTI_DOS_CHARACTERISTIC, "anti-DoS"),
    (BLE_SERVICE, TX_POWER_CHARACTERISTIC, "TX power"),
    (BLE_SERVICE, WAKE_CHARACTERISTIC, "wake"),
];

fn characteristics_of(service: Uuid) -> Vec<Uuid> {
    REQUIRED
        .iter()
        .filter(|(s, _, _)| *s == service)
        .map(|(_, c, _)| *c)
        .collect()
}

/// Handshake inputs that are configurable
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub auth_token: Bytes,
    pub tx_power_level: u8,
}

pub struct ConnectionHandshake {
    config: HandshakeConfig,
    state: ConnectionState,
    auth_step: AuthStep,
    awaiting_services: HashSet<Uuid>,
    found: HashSet<Uuid>,
    version: Option<VersionInfo>,
}

impl ConnectionHandshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Discovering,
            auth_step: AuthStep::AntiDos,
            awaiting_services: HashSet::new(),
            found: HashSet::new(),
            version: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Kick off service discovery
    pub fn start(&mut self) -> Vec<HandshakeStep> {
        if self.state != ConnectionState::Discovering || !self.awaiting_services.is_empty() {
            return Vec::new();
        }
        vec![HandshakeStep::Request(PeripheralRequest::DiscoverServices(
            vec![ROBOT_CONTROL_SERVICE, BLE_SERVICE],
        ))]
    }

    pub fn on_services_discovered(
        &mut self,
        result: std::result::Result<Vec<Uuid>, String>,
    ) -> Vec<HandshakeStep> {
        if self.state != ConnectionState::Discovering {
            return Vec::new();
        }
        let services = match result {
            Ok(services) => services,
            Err(reason) => {
                return self.fail(HandshakeFailure::Transport {
                    step: "service discovery",
                    reason,
                })
            }
        };

        let present: Vec<Uuid> = [ROBOT_CONTROL_SERVICE, BLE_SERVICE]
            .into_iter()
            .filter(|s| services.contains(s))
            .collect();
        if present.len() < 2 {
            return self.check_characteristics();
        }

        self.awaiting_services = present.iter().copied().collect();
        present
            .into_iter()
            .map(|service| {
                HandshakeStep::Request(PeripheralRequest::DiscoverCharacteristics {
                    service,
                    characteristics: characteristics_of(service),
                })
            })
            .collect()
    }

    pub fn on_characteristics_discovered(
        &mut self,
        service: Uuid,
        result: std::result::Result<Vec<Uuid>, String>,
    ) -> Vec<HandshakeStep> {
        if self.state != ConnectionState::Discovering || !self.awaiting_services.remove(&service) {
            return Vec::new();
        }
        match result {
            Ok(found) => self.found.extend(found),
            Err(reason) => {
                return self.fail(HandshakeFailure::Transport {
                    step: "characteristic discovery",
                    reason,
                })
            }
        }
        if !self.awaiting_services.is_empty() {
            return Vec::new();
        }
        self.check_characteristics()
    }

    fn check_characteristics(&mut self) -> Vec<HandshakeStep> {
        if let Some((_, _, name)) = REQUIRED.iter().find(|(_, c, _)| !self.found.contains(c)) {
            return self.fail(HandshakeFailure::MissingCharacteristic(*name));
        }

        self.state = ConnectionState::CharacteristicsFound;
        self.auth_step = AuthStep::AntiDos;
        vec![self.write(ANTI_DOS_CHARACTERISTIC, self.config.auth_token.clone())]
    }

    fn write(&self, characteristic: Uuid, data: Bytes) -> HandshakeStep {
        HandshakeStep::Request(PeripheralRequest::Write {
            characteristic,
            data,
            with_response: true,
        })
    }

    pub fn on_write_complete(
        &mut self,
        characteristic: Uuid,
        result: std::result::Result<(), String>,
    ) -> Vec<HandshakeStep> {
        let expected = match self.state {
            ConnectionState::CharacteristicsFound => self.auth_step == AuthStep::AntiDos,
            ConnectionState::Authenticating => {
                self.auth_step != AuthStep::AntiDos && self.auth_step != AuthStep::Subscribe
            }
            _ => false,
        };
        if !expected || characteristic != self.auth_step.characteristic()
        {
            return Vec::new();
        }
        if let Err(reason) = result {
            return self.fail(HandshakeFailure::Transport {
                step: self.auth_step.name(),
                reason,
            });
        }

        match self.auth_step {
            AuthStep::AntiDos => {
                self.state = ConnectionState::Authenticating;
                self.auth_step = AuthStep::TxPower;
                vec![self.write(
                    TX_POWER_CHARACTERISTIC,
                    Bytes::copy_from_slice(&[self.config.tx_power_level]),
                )]
            }
            AuthStep::TxPower => {
                self.auth_step = AuthStep::Wake;
                vec![self.write(WAKE_CHARACTERISTIC, Bytes::from_static(&[WAKE_ENABLE]))]
            }
            AuthStep::Wake => {
                self.auth_step = AuthStep::Subscribe;
                vec![HandshakeStep::Request(PeripheralRequest::Subscribe {
                    characteristic: RESPONSE_CHARACTERISTIC,
                })]
            }
            AuthStep::Subscribe => Vec::new(),
        }
    }

    pub fn on_subscription(
        &mut self,
        characteristic: Uuid,
        result: std::result::Result<(), String>,
    ) -> Vec<HandshakeStep> {
        if self.state != ConnectionState::Authenticating
            || self.auth_step != AuthStep::Subscribe
            || characteristic != RESPONSE_CHARACTERISTIC
        {
            return Vec::new();
        }
        if let Err(reason) = result {
            return self.fail(HandshakeFailure::Transport {
                step: AuthStep::Subscribe.name(),
                reason,
            });
        }
        self.state = ConnectionState::AwaitingVersion;
        vec![HandshakeStep::SendCommand(Command::Versioning)]
    }

    /// Answer to the command from the last `SendCommand` step
    pub fn on_command_response(
        &mut self,
        result: std::result::Result<Bytes, LinkError>,
    ) -> Vec<HandshakeStep> {
        let step = match self.state {
            ConnectionState::AwaitingVersion => "versioning",
            ConnectionState::AwaitingPowerState => "power state",
            _ => return Vec::new(),
        };
        let payload = match result {
            Ok(payload) => payload,
            Err(LinkError::Disconnected) => return self.fail(HandshakeFailure::Disconnected),
            Err(LinkError::Transport { reason, .. }) => {
                return self.fail(HandshakeFailure::Transport { step, reason })
            }
            Err(e) => {
                return self.fail(HandshakeFailure::BadResponse {
                    step,
                    reason: e.to_string(),
                })
            }
        };

        if self.state == ConnectionState::AwaitingVersion {
            match VersionInfo::decode(&payload) {
                Ok(version) => {
                    self.version = Some(version);
                    self.state = ConnectionState::AwaitingPowerState;
                    vec![HandshakeStep::SendCommand(Command::GetPowerState)]
                }
                Err(e) => self.fail(HandshakeFailure::BadResponse {
                    step,
                    reason: e.to_string(),
                }),
            }
        } else {
            let power = match PowerState::decode(&payload) {
                Ok(power) => power,
                Err(e) => {
                    return self.fail(HandshakeFailure::BadResponse {
                        step,
                        reason: e.to_string(),
                    })
                }
            };
            let Some(version) = self.version.take() else {
                return self.fail(HandshakeFailure::BadResponse {
                    step: "versioning",
                    reason: "missing".into(),
                });
            };
            self.state = ConnectionState::Ready;
            vec![HandshakeStep::Complete(Ok(DeviceSnapshot { version, power }))]
        }
    }

    /// Link lost before completion
    pub fn on_disconnect(&mut self) -> Vec<HandshakeStep> {
        self.fail(HandshakeFailure::Disconnected)
    }

    fn fail(&mut self, failure: HandshakeFailure) -> Vec<HandshakeStep> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = ConnectionState::Failed(failure.clone());
        vec![HandshakeStep::Complete(Err(failure))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ChargeState, ToyModel};
    use crate::constants::{DEFAULT_AUTH_TOKEN, DEFAULT_TX_POWER_LEVEL};

    fn handshake() -> ConnectionHandshake {
        ConnectionHandshake::new(HandshakeConfig {
            auth_token: Bytes::from_static(DEFAULT_AUTH_TOKEN.as_bytes()),
            tx_power_level: DEFAULT_TX_POWER_LEVEL,
        })
    }

    fn all_services() -> Vec<Uuid> {
        vec![ROBOT_CONTROL_SERVICE, BLE_SERVICE]
    }

    fn discover(hs: &mut ConnectionHandshake) -> Vec<HandshakeStep> {
        hs.start();
        hs.on_services_discovered(Ok(all_services()));
        hs.on_characteristics_discovered(
            ROBOT_CONTROL_SERVICE,
            Ok(characteristics_of(ROBOT_CONTROL_SERVICE)),
        );
        hs.on_characteristics_discovered(BLE_SERVICE, Ok(characteristics_of(BLE_SERVICE)))
    }

    fn authenticate(hs: &mut ConnectionHandshake) -> Vec<HandshakeStep> {
        discover(hs);
        hs.on_write_complete(ANTI_DOS_CHARACTERISTIC, Ok(()));
        hs.on_write_complete(TX_POWER_CHARACTERISTIC, Ok(()));
        hs.on_write_complete(WAKE_CHARACTERISTIC, Ok(()));
        hs.on_subscription(RESPONSE_CHARACTERISTIC, Ok(()))
    }

    const VERSION: &[u8] = &[0x02, 50, 0x07, 3, 59];
    const POWER: &[u8] = &[0x01, 0x02, 0x03, 0x18];

    #[test]
    fn test_full_sequence() {
        let mut hs = handshake();
        assert_eq!(
            hs.start(),
            vec![HandshakeStep::Request(PeripheralRequest::DiscoverServices(all_services()))]
        );

        let steps = hs.on_services_discovered(Ok(all_services()));
        assert_eq!(steps.len(), 2);
        assert_eq!(*hs.state(), ConnectionState::Discovering);

        assert!(hs
            .on_characteristics_discovered(
                ROBOT_CONTROL_SERVICE,
                Ok(characteristics_of(ROBOT_CONTROL_SERVICE))
            )
            .is_empty());
        let steps =
            hs.on_characteristics_discovered(BLE_SERVICE, Ok(characteristics_of(BLE_SERVICE)));
        assert_eq!(*hs.state(), ConnectionState::CharacteristicsFound);
        assert_eq!(
            steps,
            vec![HandshakeStep::Request(PeripheralRequest::Write {
                characteristic: ANTI_DOS_CHARACTERISTIC,
                data: Bytes::from_static(b"011i3"),
                with_response: true,
            })]
        );

        let steps = hs.on_write_complete(ANTI_DOS_CHARACTERISTIC, Ok(()));
        assert_eq!(*hs.state(), ConnectionState::Authenticating);
        assert_eq!(
            steps,
            vec![HandshakeStep::Request(PeripheralRequest::Write {
                characteristic: TX_POWER_CHARACTERISTIC,
                data: Bytes::from_static(&[7]),
                with_response: true,
            })]
        );
        let steps = hs.on_write_complete(TX_POWER_CHARACTERISTIC, Ok(()));
        assert_eq!(
            steps,
            vec![HandshakeStep::Request(PeripheralRequest::Write {
                characteristic: WAKE_CHARACTERISTIC,
                data: Bytes::from_static(&[1]),
                with_response: true,
            })]
        );
        let steps = hs.on_write_complete(WAKE_CHARACTERISTIC, Ok(()));
        assert_eq!(
            steps,
            vec![HandshakeStep::Request(PeripheralRequest::Subscribe {
                characteristic: RESPONSE_CHARACTERISTIC
            })]
        );

        let steps = hs.on_subscription(RESPONSE_CHARACTERISTIC, Ok(()));
        assert_eq!(steps, vec![HandshakeStep::SendCommand(Command::Versioning)]);
        assert_eq!(*hs.state(), ConnectionState::AwaitingVersion);

        let steps = hs.on_command_response(Ok(Bytes::from_static(VERSION)));
        assert_eq!(steps, vec![HandshakeStep::SendCommand(Command::GetPowerState)]);
        assert_eq!(*hs.state(), ConnectionState::AwaitingPowerState);

        let steps = hs.on_command_response(Ok(Bytes::from_static(POWER)));
        assert!(hs.is_ready());
        match &steps[..] {
            [HandshakeStep::Complete(Ok(snapshot))] => {
                assert_eq!(snapshot.version.model, ToyModel::SprkPlus);
                assert_eq!(snapshot.power.charge_state, ChargeState::Ok);
            }
            other => panic!("unexpected steps: {:?}", other),
        }
    }

    #[test]
    fn test_missing_characteristic_fails() {
        let mut hs = handshake();
        hs.start();
        hs.on_services_discovered(Ok(all_services()));
        hs.on_characteristics_discovered(
            ROBOT_CONTROL_SERVICE,
            Ok(characteristics_of(ROBOT_CONTROL_SERVICE)),
        );
        let steps = hs.on_characteristics_discovered(
            BLE_SERVICE,
            Ok(vec![ANTI_DOS_CHARACTERISTIC, TX_POWER_CHARACTERISTIC]),
        );
        assert_eq!(
            steps,
            vec![HandshakeStep::Complete(Err(
                HandshakeFailure::MissingCharacteristic("wake")
            ))]
        );
    }

    #[test]
    fn test_missing_service_fails() {
        let mut hs = handshake();
        hs.start();
        let steps = hs.on_services_discovered(Ok(vec![BLE_SERVICE]));
        assert_eq!(
            steps,
            vec![HandshakeStep::Complete(Err(
                HandshakeFailure::MissingCharacteristic("commands")
            ))]
        );
    }

    #[test]
    fn test_write_failure_is_terminal() {
        let mut hs = handshake();
        discover(&mut hs);
        let steps = hs.on_write_complete(ANTI_DOS_CHARACTERISTIC, Err("rejected".into()));
        assert!(matches!(
            &steps[..],
            [HandshakeStep::Complete(Err(HandshakeFailure::Transport { step: "anti-DoS write", .. }))]
        ));
        assert!(matches!(hs.state(), ConnectionState::Failed(_)));
    }

    #[test]
    fn test_completion_is_idempotent() {
        let mut hs = handshake();
        discover(&mut hs);
        assert_eq!(hs.on_disconnect().len(), 1);
        // Everything after the first completion is ignored
        assert!(hs.on_disconnect().is_empty());
        assert!(hs.on_write_complete(ANTI_DOS_CHARACTERISTIC, Ok(())).is_empty());
        assert!(hs
            .on_command_response(Ok(Bytes::from_static(VERSION)))
            .is_empty());
    }

    #[test]
    fn test_ready_ignores_disconnect() {
        let mut hs = handshake();
        authenticate(&mut hs);
        hs.on_command_response(Ok(Bytes::from_static(VERSION)));
        hs.on_command_response(Ok(Bytes::from_static(POWER)));
        assert!(hs.on_disconnect().is_empty());
        assert!(hs.is_ready());
    }

    #[test]
    fn test_out_of_order_ack_ignored() {
        let mut hs = handshake();
        discover(&mut hs);
        // Wake ack before the anti-DoS ack is not ours
        assert!(hs.on_write_complete(WAKE_CHARACTERISTIC, Ok(())).is_empty());
        assert_eq!(*hs.state(), ConnectionState::CharacteristicsFound);
    }

    #[test]
    fn test_bad_version_response() {
        let mut hs = handshake();
        authenticate(&mut hs);
        let steps = hs.on_command_response(Ok(Bytes::from_static(&[0x02])));
        assert!(matches!(
            &steps[..],
            [HandshakeStep::Complete(Err(HandshakeFailure::BadResponse { step: "versioning", .. }))]
        ));
    }

    #[test]
    fn test_rejected_power_state() {
        let mut hs = handshake();
        authenticate(&mut hs);
        hs.on_command_response(Ok(Bytes::from_static(VERSION)));
        let steps = hs.on_command_response(Err(LinkError::CommandRejected { code: 0x01 }));
        assert!(matches!(
            &steps[..],
            [HandshakeStep::Complete(Err(HandshakeFailure::BadResponse { step: "power state", .. }))]
        ));
    }

    #[test]
    fn test_discovery_error() {
        let mut hs = handshake();
        hs.start();
        let steps = hs.on_services_discovered(Err("adapter off".into()));
        assert!(matches!(
            &steps[..],
            [HandshakeStep::Complete(Err(HandshakeFailure::Transport { step: "service discovery", .. }))]
        ));
    }
}
