//! # UAV Companion
//!
//! Companion-computer coordinator for MAVLink autopilots.
//!
//! Bring-up wires the core components together around the telemetry bus,
//! optionally uploads the configured mission, then runs a short supervised
//! flight: arm, take off, hold while logging attitude, land, disarm.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration (first CLI argument, default `config/default.toml`)
//!    - Set up logging with tracing subscriber (file appender when configured)
//!    - Open the MAVLink link and start the receive loop
//!    - Attach the state aggregator, flight recorder and command interface
//!    - Arm the battery fail-safe
//!
//! 2. **Mission upload** (when waypoints are configured)
//!    - Must complete before arming; any upload failure aborts bring-up
//!
//! 3. **Flight sequence**
//!    - Arm, take off, log attitude once per status interval
//!    - Ctrl+C cuts the hold short
//!
//! 4. **Shutdown**
//!    - Land, wait, disarm, then stop every component in order
//!
//! # Errors
//!
//! Startup failures (unreadable config, link that will not open, rejected
//! mission) abort bring-up entirely; there is no partial-degraded mode.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::interval;
use tracing::info;

use uav_companion::bus::TelemetryBus;
use uav_companion::commands::CommandInterface;
use uav_companion::config::{Config, LoggingConfig, MissionConfig};
use uav_companion::link::TransportListener;
use uav_companion::mission::{Mission, MissionUploader, Waypoint};
use uav_companion::recorder::DataRecorder;
use uav_companion::safety::SafetyMonitor;
use uav_companion::telemetry::VehicleState;

/// Pause between the land command and disarm
const LANDING_GRACE: Duration = Duration::from_secs(10);

fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if config.dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    } else {
        let appender = tracing_appender::rolling::daily(&config.dir, "uav-companion.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    }
}

/// Turn configured waypoints into a mission, assigning contiguous sequences
fn build_mission(config: &MissionConfig) -> Result<Mission> {
    let items = config
        .waypoints
        .iter()
        .enumerate()
        .map(|(index, wp)| {
            let seq = index as u16;
            match wp.kind.as_str() {
                "takeoff" => Waypoint::takeoff(seq, wp.alt),
                "land" => Waypoint::land(seq, wp.lat, wp.lon),
                "return" => Waypoint::return_to_launch(seq),
                _ => Waypoint::nav(seq, wp.lat, wp.lon, wp.alt, wp.hold_s),
            }
        })
        .collect();
    Ok(Mission::new(items)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    let _log_guard = init_logging(&config.logging);
    info!("uav-companion v{} starting", env!("CARGO_PKG_VERSION"));

    let bus = Arc::new(TelemetryBus::new());
    let mut listener = TransportListener::new(config.link.clone(), Arc::clone(&bus));
    let link = listener.start().context("failed to open MAVLink link")?;

    let state = VehicleState::attach(&bus);
    let recorder = if config.recorder.enabled {
        Some(DataRecorder::attach(&bus, Path::new(&config.recorder.log_dir))?)
    } else {
        None
    };

    let commands = Arc::new(CommandInterface::new(
        Arc::clone(&link),
        config.link.target_system,
        config.link.target_component,
    ));
    commands.attach(&bus);

    let mut safety = SafetyMonitor::start(&bus, Arc::clone(&commands), &config.safety);

    if !config.mission.waypoints.is_empty() {
        let mission = build_mission(&config.mission)?;
        info!("uploading mission with {} waypoints", mission.len());
        let uploader = MissionUploader::new(
            Arc::clone(&link),
            Arc::clone(&bus),
            &config.link,
            &config.mission,
        );
        uploader
            .upload(&mission)
            .await
            .context("mission upload failed")?;
    }

    commands.arm().context("failed to arm")?;
    info!("armed the vehicle");

    commands.takeoff(config.flight.takeoff_altitude)?;
    info!(
        "initiated takeoff to {} meters",
        config.flight.takeoff_altitude
    );

    let mut status = interval(Duration::from_millis(config.flight.status_interval_ms));
    let hold = tokio::time::sleep(Duration::from_secs(config.flight.monitor_duration_s));
    tokio::pin!(hold);

    loop {
        tokio::select! {
            _ = &mut hold => {
                info!("hold period complete");
                break;
            }
            _ = status.tick() => {
                if let Some(attitude) = state.attitude() {
                    info!(
                        "attitude - roll: {:.2}, pitch: {:.2}, yaw: {:.2}",
                        attitude.roll, attitude.pitch, attitude.yaw
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, landing early");
                break;
            }
        }
    }

    commands.land()?;
    info!("initiated landing");
    tokio::time::sleep(LANDING_GRACE).await;

    commands.disarm()?;
    info!("disarmed the vehicle");

    safety.stop(&bus).await;
    listener.stop().await;
    commands.detach(&bus);
    state.detach(&bus);
    if let Some(recorder) = recorder {
        recorder.close(&bus);
    }

    info!("uav-companion finished");
    Ok(())
}
