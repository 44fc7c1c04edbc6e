//! Toy Link command-line tool
//!
//! Usage:
//!   toy-link demo [--trace] [--json]        Drive the simulated toy
//!   toy-link decode <HEX> [--mask MASK]     Decode one inbound frame

use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use toy_link::cli::{self, Cli, Command};
use toy_link::codec::{
    packet, AsyncEventType, CollisionConfig, CollisionEvent, Color, DeviceInfoType, FrameKind,
    PowerState, SensorFrame, SensorMask,
};
use toy_link::config::{self, Config};
use toy_link::constants::CHANNEL_CAPACITY;
use toy_link::logging::{self, LogEntry};
use toy_link::transport::SimulatedToy;
use toy_link::{LinkError, Result, Toy};

/// Collision cadence for the demo when the config leaves it off
const DEMO_COLLISION_INTERVAL_MS: u64 = 900;

/// Time spent on each leg of the demo drive
const DEMO_LEG: Duration = Duration::from_millis(1200);

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_strict(path)?,
        None => config::load(Path::new(config::DEFAULT_CONFIG_FILE)),
    };

    match cli.command {
        Command::Decode { hex, mask } => decode(&hex, mask),
        Command::Demo { trace, json } => {
            let rt = tokio::runtime::Runtime::new()
                .map_err(|e| LinkError::Runtime { source: e })?;
            rt.block_on(demo(config, trace, json))
        }
    }
}

// ============================================================================
// decode
// ============================================================================

fn decode(hex: &str, mask: Option<SensorMask>) -> Result<()> {
    let bytes = cli::parse_hex(hex).map_err(|reason| LinkError::MalformedFrame { reason })?;
    let frame = packet::decode_frame(&bytes)?;
    let payload = &frame.payload;

    let value = match frame.kind {
        FrameKind::SyncAck { sequence, code } => json!({
            "kind": "response",
            "sequence": sequence,
            "code": code,
            "data": payload.iter().map(|b| format!("{:02X}", b)).collect::<String>(),
        }),
        FrameKind::AsyncEvent(AsyncEventType::Collision) => json!({
            "kind": "collision",
            "event": CollisionEvent::decode(payload)?,
        }),
        FrameKind::AsyncEvent(AsyncEventType::SensorData) => {
            let mask = mask.ok_or_else(|| LinkError::MalformedFrame {
                reason: "sensor frame needs --mask".into(),
            })?;
            json!({
                "kind": "sensor",
                "mask": mask.to_string(),
                "frames": SensorFrame::decode(mask, payload)?,
            })
        }
        FrameKind::AsyncEvent(AsyncEventType::SleepWarning) => json!({ "kind": "sleep_warning" }),
        FrameKind::AsyncEvent(AsyncEventType::DidSleep) => json!({ "kind": "did_sleep" }),
        FrameKind::AsyncEvent(AsyncEventType::Other(id)) => json!({
            "kind": "async",
            "id": id,
            "length": payload.len(),
        }),
        FrameKind::DeviceInfo(DeviceInfoType::PowerNotification) => json!({
            "kind": "power_notification",
            "charge_state": PowerState::decode_notification(payload)?,
        }),
    };

    println!("{}", value);
    Ok(())
}

// ============================================================================
// demo
// ============================================================================

async fn demo(mut config: Config, trace: bool, json: bool) -> Result<()> {
    if config.simulator.collision_interval_ms == 0 {
        config.simulator.collision_interval_ms = DEMO_COLLISION_INTERVAL_MS;
    }

    let log_tx = if trace {
        let (tx, mut rx) = mpsc::channel::<LogEntry>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if json {
                    print_json("trace", &entry);
                } else {
                    println!("{}", entry.format_line());
                }
            }
        });
        Some(tx)
    } else {
        None
    };

    let transport = SimulatedToy::new(config.simulator.clone());
    let (toy, connecting) = toy_link::start(transport, &config, log_tx)?;

    toy.add_collision_listener(move |event| {
        if json {
            print_json("collision", event);
        } else {
            println!(
                "collision: angle {:.0} deg, speed {:.2}",
                event.impact_angle(),
                event.impact_speed
            );
        }
    });
    toy.add_sensor_listener(move |frame| {
        if json {
            print_json("sensor", frame);
        } else if let Some(position) = frame.locator.and_then(|l| l.position) {
            println!(
                "position: x {:.0} cm, y {:.0} cm",
                position.x.unwrap_or_default(),
                position.y.unwrap_or_default()
            );
        }
    });
    toy.add_device_listener(move |event| {
        if json {
            print_json("device", event);
        } else {
            println!("device: {:?}", event);
        }
    });
    toy.add_free_fall_listener(move |event| {
        if json {
            print_json("free_fall", event);
        } else {
            println!("free fall after {:?}", event.since_landed);
        }
    });

    let snapshot = connecting.wait().await?;
    if !json {
        println!(
            "connected: {:?} firmware {} battery {:.2} V",
            snapshot.version.model, snapshot.version.app_version, snapshot.power.battery_voltage
        );
    }

    let outcome = tokio::select! {
        result = script(&toy) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            Ok(())
        }
    };

    let stats = toy.stats();
    toy.disconnect().await;
    if json {
        print_json("stats", &stats);
    } else {
        println!(
            "stats: {} frames out, {} in, {} malformed",
            stats.frames_tx, stats.frames_rx, stats.malformed
        );
    }
    outcome
}

async fn script(toy: &Toy) -> Result<()> {
    toy.set_main_led(Color::BLUE).await?;

    toy.start_aiming().await?;
    toy.rotate_aim(45.0).await?;
    toy.stop_aiming().await?;

    toy.set_collision_detection(CollisionConfig::enabled())
        .await?;
    toy.reset_locator().await?;
    toy.enable_sensors(SensorMask::LOCATOR_ALL | SensorMask::ACCELEROMETER_FILTERED_ALL)
        .await?;

    toy.roll(0.0, 128.0).await?;
    tokio::time::sleep(DEMO_LEG).await;
    toy.roll(90.0, 128.0).await?;
    tokio::time::sleep(DEMO_LEG).await;
    toy.stop_roll(90.0).await?;

    toy.power_state().await?;
    toy.disable_sensors().await?;
    toy.set_main_led(Color::GREEN).await
}

fn print_json<T: Serialize>(kind: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(value) => println!("{}", json!({ "type": kind, "value": value })),
        Err(e) => eprintln!("Failed to encode {}: {}", kind, e),
    }
}
