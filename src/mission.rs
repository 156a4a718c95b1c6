//! # Mission Upload
//!
//! Waypoint transfer from the companion to the autopilot.
//!
//! Upload follows the MAVLink mission protocol from the ground side:
//!
//! 1. Send MISSION_CLEAR_ALL and let the autopilot settle
//! 2. Announce the item count with MISSION_COUNT
//! 3. Answer each MISSION_REQUEST with the requested MISSION_ITEM
//! 4. Wait for MISSION_ACK and require MAV_MISSION_ACCEPTED
//!
//! Every wait is bounded. An abort surfaces a distinct reason (timeout,
//! invalid sequence, rejection) and nothing is retried silently; the caller
//! must not arm or start the mission unless upload reported success.

use std::sync::Arc;
use std::time::Duration;

use mavlink::common::{
    MavCmd, MavFrame, MavMessage, MavMissionResult, MISSION_CLEAR_ALL_DATA, MISSION_COUNT_DATA,
    MISSION_ITEM_DATA,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::bus::TelemetryBus;
use crate::config::{LinkConfig, MissionConfig};
use crate::link::{Link, LinkError};

/// Mission upload failure reasons
#[derive(Debug, Error)]
pub enum MissionError {
    /// A bounded wait expired
    #[error("timed out waiting for {phase}")]
    Timeout { phase: &'static str },

    /// The autopilot requested an item outside the mission
    #[error("autopilot requested waypoint {seq} outside mission of {count} items")]
    InvalidSequence { seq: u16, count: u16 },

    /// The autopilot refused the mission
    #[error("mission rejected by autopilot: {0:?}")]
    Rejected(MavMissionResult),

    /// Waypoint sequence numbers are not contiguous from zero
    #[error("waypoint at position {index} has sequence {seq}, expected {index}")]
    NonContiguous { index: usize, seq: u16 },

    /// A command could not be written to the link
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// One mission item, sequence numbers assigned by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub seq: u16,
    pub frame: MavFrame,
    pub command: MavCmd,
    pub current: u8,
    pub autocontinue: u8,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Waypoint {
    fn base(seq: u16, command: MavCmd) -> Self {
        Self {
            seq,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
            command,
            current: 0,
            autocontinue: 1,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }

    /// Takeoff to `alt` meters
    pub fn takeoff(seq: u16, alt: f32) -> Self {
        Self {
            z: alt,
            ..Self::base(seq, MavCmd::MAV_CMD_NAV_TAKEOFF)
        }
    }

    /// Fly to a position and optionally hold there
    pub fn nav(seq: u16, lat: f64, lon: f64, alt: f32, hold_s: f32) -> Self {
        Self {
            param1: hold_s,
            x: lat as f32,
            y: lon as f32,
            z: alt,
            ..Self::base(seq, MavCmd::MAV_CMD_NAV_WAYPOINT)
        }
    }

    /// Land at a position (zeros mean the current position)
    pub fn land(seq: u16, lat: f64, lon: f64) -> Self {
        Self {
            x: lat as f32,
            y: lon as f32,
            ..Self::base(seq, MavCmd::MAV_CMD_NAV_LAND)
        }
    }

    /// Return to the launch point
    pub fn return_to_launch(seq: u16) -> Self {
        Self::base(seq, MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH)
    }

    fn to_message(&self, target_system: u8, target_component: u8) -> MavMessage {
        MavMessage::MISSION_ITEM(MISSION_ITEM_DATA {
            param1: self.param1,
            param2: self.param2,
            param3: self.param3,
            param4: self.param4,
            x: self.x,
            y: self.y,
            z: self.z,
            seq: self.seq,
            command: self.command,
            target_system,
            target_component,
            frame: self.frame,
            current: self.current,
            autocontinue: self.autocontinue,
            ..Default::default()
        })
    }
}

/// An ordered waypoint sequence, immutable once constructed
#[derive(Debug, Clone)]
pub struct Mission {
    items: Vec<Waypoint>,
}

impl Mission {
    /// Build a mission, verifying sequence numbers are contiguous from zero
    ///
    /// The uploader never renumbers items; a mission that fails this check
    /// would be refused by the autopilot anyway.
    pub fn new(items: Vec<Waypoint>) -> Result<Self, MissionError> {
        for (index, item) in items.iter().enumerate() {
            if item.seq as usize != index {
                return Err(MissionError::NonContiguous {
                    index,
                    seq: item.seq,
                });
            }
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item count as carried in MISSION_COUNT
    pub fn count(&self) -> u16 {
        self.items.len() as u16
    }

    fn get(&self, seq: u16) -> Option<&Waypoint> {
        self.items.get(seq as usize)
    }
}

/// Drives the upload handshake for one mission at a time
pub struct MissionUploader {
    link: Arc<dyn Link>,
    bus: Arc<TelemetryBus>,
    target_system: u8,
    target_component: u8,
    clear_settle: Duration,
    request_timeout: Duration,
    ack_timeout: Duration,
}

impl MissionUploader {
    pub fn new(
        link: Arc<dyn Link>,
        bus: Arc<TelemetryBus>,
        link_config: &LinkConfig,
        mission_config: &MissionConfig,
    ) -> Self {
        Self {
            link,
            bus,
            target_system: link_config.target_system,
            target_component: link_config.target_component,
            clear_settle: Duration::from_millis(mission_config.clear_settle_ms),
            request_timeout: Duration::from_millis(mission_config.request_timeout_ms),
            ack_timeout: Duration::from_millis(mission_config.ack_timeout_ms),
        }
    }

    /// Run the full handshake for `mission`
    ///
    /// # Errors
    ///
    /// Returns a [`MissionError`] naming the phase and reason on any abort;
    /// the transfer is never retried from inside.
    pub async fn upload(&self, mission: &Mission) -> Result<(), MissionError> {
        // Subscribe before the first command so no early request is lost.
        let (request_tx, mut request_rx) = mpsc::unbounded_channel();
        let request_token = self.bus.subscribe(
            "MISSION_REQUEST",
            Arc::new(move |msg| {
                if let MavMessage::MISSION_REQUEST(data) = &msg.message {
                    let _ = request_tx.send(data.seq);
                }
            }),
        );

        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let ack_token = self.bus.subscribe(
            "MISSION_ACK",
            Arc::new(move |msg| {
                if let MavMessage::MISSION_ACK(data) = &msg.message {
                    let _ = ack_tx.send(data.mavtype);
                }
            }),
        );

        let result = self
            .run_handshake(mission, &mut request_rx, &mut ack_rx)
            .await;

        self.bus.unsubscribe(request_token);
        self.bus.unsubscribe(ack_token);
        result
    }

    async fn run_handshake(
        &self,
        mission: &Mission,
        request_rx: &mut mpsc::UnboundedReceiver<u16>,
        ack_rx: &mut mpsc::UnboundedReceiver<MavMissionResult>,
    ) -> Result<(), MissionError> {
        let count = mission.count();

        info!("clearing existing mission");
        self.link
            .send(&MavMessage::MISSION_CLEAR_ALL(MISSION_CLEAR_ALL_DATA {
                target_system: self.target_system,
                target_component: self.target_component,
                ..Default::default()
            }))?;
        // TODO: wait for the MISSION_ACK current firmwares emit after
        // MISSION_CLEAR_ALL instead of assuming the clear settles in time.
        tokio::time::sleep(self.clear_settle).await;

        info!("announcing mission of {count} waypoints");
        self.link
            .send(&MavMessage::MISSION_COUNT(MISSION_COUNT_DATA {
                target_system: self.target_system,
                target_component: self.target_component,
                count,
                ..Default::default()
            }))?;

        for _ in 0..count {
            let seq = timeout(self.request_timeout, request_rx.recv())
                .await
                .map_err(|_| MissionError::Timeout {
                    phase: "waypoint request",
                })?
                .ok_or(MissionError::Timeout {
                    phase: "waypoint request",
                })?;

            let item = mission
                .get(seq)
                .ok_or(MissionError::InvalidSequence { seq, count })?;

            debug!("sending waypoint {seq}/{count}");
            self.link
                .send(&item.to_message(self.target_system, self.target_component))?;
        }

        let ack = timeout(self.ack_timeout, ack_rx.recv())
            .await
            .map_err(|_| MissionError::Timeout {
                phase: "mission acknowledgment",
            })?
            .ok_or(MissionError::Timeout {
                phase: "mission acknowledgment",
            })?;

        if ack == MavMissionResult::MAV_MISSION_ACCEPTED {
            info!("mission of {count} waypoints accepted");
            Ok(())
        } else {
            Err(MissionError::Rejected(ack))
        }
    }
}
