//! # Vehicle State Aggregator
//!
//! Retains the most recent message of every type, plus denormalized
//! heartbeat and attitude snapshots, for synchronous reads by other
//! components.
//!
//! The aggregator is a passive bus subscriber: it never blocks the publisher
//! beyond a short lock to swap the cached value, and readers may observe
//! state that is at most one publish behind the link.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mavlink::common::{MavAutopilot, MavMessage, MavModeFlag, MavState, MavType};
use mavlink::Message;

use crate::bus::{RoutedMessage, SubscriptionToken, TelemetryBus, ALL_MESSAGES};

/// Denormalized heartbeat fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemStatus {
    pub vehicle_type: MavType,
    pub autopilot: MavAutopilot,
    pub base_mode: MavModeFlag,
    pub custom_mode: u32,
    pub system_status: MavState,
}

/// Denormalized attitude fields, angles in radians
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

/// Last-known vehicle state, fed by bus subscriptions
pub struct VehicleState {
    latest: Mutex<HashMap<String, RoutedMessage>>,
    system_status: Mutex<Option<SystemStatus>>,
    attitude: Mutex<Option<Attitude>>,
    tokens: Mutex<Vec<SubscriptionToken>>,
}

impl VehicleState {
    fn new() -> Self {
        Self {
            latest: Mutex::new(HashMap::new()),
            system_status: Mutex::new(None),
            attitude: Mutex::new(None),
            tokens: Mutex::new(Vec::new()),
        }
    }

    /// Create an aggregator and wire its subscriptions onto `bus`
    pub fn attach(bus: &Arc<TelemetryBus>) -> Arc<Self> {
        let state = Arc::new(Self::new());
        let mut tokens = Vec::new();

        let sink = Arc::clone(&state);
        tokens.push(bus.subscribe(
            ALL_MESSAGES,
            Arc::new(move |msg| sink.record(msg)),
        ));

        let sink = Arc::clone(&state);
        tokens.push(bus.subscribe(
            "HEARTBEAT",
            Arc::new(move |msg| sink.record_heartbeat(msg)),
        ));

        let sink = Arc::clone(&state);
        tokens.push(bus.subscribe(
            "ATTITUDE",
            Arc::new(move |msg| sink.record_attitude(msg)),
        ));

        *state.tokens.lock().unwrap() = tokens;
        state
    }

    /// Remove this aggregator's subscriptions from `bus`
    pub fn detach(&self, bus: &TelemetryBus) {
        for token in self.tokens.lock().unwrap().drain(..) {
            bus.unsubscribe(token);
        }
    }

    fn record(&self, msg: &RoutedMessage) {
        let tag = msg.message.message_name().to_string();
        self.latest.lock().unwrap().insert(tag, msg.clone());
    }

    fn record_heartbeat(&self, msg: &RoutedMessage) {
        if let MavMessage::HEARTBEAT(data) = &msg.message {
            *self.system_status.lock().unwrap() = Some(SystemStatus {
                vehicle_type: data.mavtype,
                autopilot: data.autopilot,
                base_mode: data.base_mode,
                custom_mode: data.custom_mode,
                system_status: data.system_status,
            });
        }
    }

    fn record_attitude(&self, msg: &RoutedMessage) {
        if let MavMessage::ATTITUDE(data) = &msg.message {
            *self.attitude.lock().unwrap() = Some(Attitude {
                roll: data.roll,
                pitch: data.pitch,
                yaw: data.yaw,
                rollspeed: data.rollspeed,
                pitchspeed: data.pitchspeed,
                yawspeed: data.yawspeed,
            });
        }
    }

    /// Most recent message of the given type, if any has arrived
    pub fn message(&self, tag: &str) -> Option<RoutedMessage> {
        self.latest.lock().unwrap().get(tag).cloned()
    }

    /// Last heartbeat summary
    pub fn system_status(&self) -> Option<SystemStatus> {
        *self.system_status.lock().unwrap()
    }

    /// Last attitude snapshot
    pub fn attitude(&self) -> Option<Attitude> {
        *self.attitude.lock().unwrap()
    }
}
