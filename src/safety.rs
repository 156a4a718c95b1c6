//! # Safety Supervisor
//!
//! Battery watchdog with an autonomous fail-safe.
//!
//! The supervisor caches battery telemetry from SYS_STATUS and polls it on a
//! fixed interval. The first reading below the configured threshold triggers
//! a single return-to-launch command, after which the loop terminates: the
//! fail-safe is one-shot by design and does not keep monitoring a vehicle
//! that is already flying home.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mavlink::common::MavMessage;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::{SubscriptionToken, TelemetryBus};
use crate::commands::CommandInterface;
use crate::config::SafetyConfig;

/// Last-write-wins battery reading from SYS_STATUS
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStatus {
    /// Battery voltage in volts
    pub voltage: f32,
    /// Current draw in amperes
    pub current: f32,
    /// Remaining capacity in percent; -1 means the autopilot does not know
    pub remaining_percent: i8,
}

/// Background battery monitor
pub struct SafetyMonitor {
    battery: Arc<Mutex<Option<BatteryStatus>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    token: Option<SubscriptionToken>,
}

impl SafetyMonitor {
    /// Subscribe to battery telemetry and spawn the poll loop
    pub fn start(
        bus: &Arc<TelemetryBus>,
        commands: Arc<CommandInterface>,
        config: &SafetyConfig,
    ) -> Self {
        let battery = Arc::new(Mutex::new(None));

        let cache = Arc::clone(&battery);
        let token = bus.subscribe(
            "SYS_STATUS",
            Arc::new(move |msg| {
                if let MavMessage::SYS_STATUS(data) = &msg.message {
                    *cache.lock().unwrap() = Some(BatteryStatus {
                        voltage: data.voltage_battery as f32 / 1000.0,
                        current: data.current_battery as f32 / 100.0,
                        remaining_percent: data.battery_remaining,
                    });
                }
            }),
        );

        let running = Arc::new(AtomicBool::new(true));
        let worker = tokio::spawn(monitor_loop(
            Arc::clone(&battery),
            commands,
            config.battery_threshold_percent,
            Duration::from_millis(config.poll_interval_ms),
            Arc::clone(&running),
        ));
        info!(
            "battery fail-safe armed at {}%",
            config.battery_threshold_percent
        );

        Self {
            battery,
            running,
            worker: Some(worker),
            token: Some(token),
        }
    }

    /// Latest cached battery reading
    pub fn battery(&self) -> Option<BatteryStatus> {
        *self.battery.lock().unwrap()
    }

    /// Whether the poll loop is still watching
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Unsubscribe, stop the poll loop and wait for it to exit
    pub async fn stop(&mut self, bus: &TelemetryBus) {
        if let Some(token) = self.token.take() {
            bus.unsubscribe(token);
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!("battery fail-safe stopped");
    }
}

async fn monitor_loop(
    battery: Arc<Mutex<Option<BatteryStatus>>>,
    commands: Arc<CommandInterface>,
    threshold_percent: u8,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        let reading = *battery.lock().unwrap();
        if let Some(status) = reading {
            // -1 is "unknown", not an empty battery
            if status.remaining_percent >= 0
                && (status.remaining_percent as u8) < threshold_percent
            {
                warn!(
                    "battery at {}%, below {}% threshold; returning to launch",
                    status.remaining_percent, threshold_percent
                );
                if let Err(e) = commands.return_to_launch() {
                    error!("failed to send return-to-launch: {e}");
                }
                break;
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
    running.store(false, Ordering::SeqCst);
}
