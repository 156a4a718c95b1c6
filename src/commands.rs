//! # Command Interface
//!
//! Stateless request façade encoding outbound commands for the autopilot.
//!
//! Every operation builds one message and hands it to the link's send
//! primitive; nothing here waits for acknowledgments. The only state kept is
//! the derived `landed` flag, updated from position telemetry and from
//! `disarm`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mavlink::common::{
    MavCmd, MavFrame, MavMessage, PositionTargetTypemask, COMMAND_LONG_DATA,
    SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use tracing::{debug, info};

use crate::bus::{SubscriptionToken, TelemetryBus};
use crate::link::{Link, LinkError};

/// Relative altitude below which the vehicle is considered landed
const LANDED_ALTITUDE_M: f32 = 0.5;

/// Velocity-only type mask for SET_POSITION_TARGET_LOCAL_NED: position,
/// acceleration, force and yaw fields are all ignored
const VELOCITY_ONLY_TYPE_MASK: u16 = 0b0000_1111_1100_0111;

/// ArduCopter flight modes used by this application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Stabilize,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Land,
}

impl FlightMode {
    /// ArduCopter custom mode number
    pub fn custom_mode(self) -> u32 {
        match self {
            FlightMode::Stabilize => 0,
            FlightMode::Auto => 3,
            FlightMode::Guided => 4,
            FlightMode::Loiter => 5,
            FlightMode::Rtl => 6,
            FlightMode::Land => 9,
        }
    }

    /// Parse a mode name as written in configuration
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "STABILIZE" => Some(FlightMode::Stabilize),
            "AUTO" => Some(FlightMode::Auto),
            "GUIDED" => Some(FlightMode::Guided),
            "LOITER" => Some(FlightMode::Loiter),
            "RTL" => Some(FlightMode::Rtl),
            "LAND" => Some(FlightMode::Land),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Rtl => "RTL",
            FlightMode::Land => "LAND",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encodes and sends vehicle commands through the transport link
pub struct CommandInterface {
    link: Arc<dyn Link>,
    target_system: u8,
    target_component: u8,
    landed: AtomicBool,
    token: Mutex<Option<SubscriptionToken>>,
}

impl CommandInterface {
    pub fn new(link: Arc<dyn Link>, target_system: u8, target_component: u8) -> Self {
        Self {
            link,
            target_system,
            target_component,
            landed: AtomicBool::new(false),
            token: Mutex::new(None),
        }
    }

    /// Subscribe to position telemetry so the landed flag tracks altitude
    pub fn attach(self: &Arc<Self>, bus: &Arc<TelemetryBus>) {
        let this = Arc::clone(self);
        let token = bus.subscribe(
            "GLOBAL_POSITION_INT",
            Arc::new(move |msg| {
                if let MavMessage::GLOBAL_POSITION_INT(data) = &msg.message {
                    let altitude = data.relative_alt as f32 / 1000.0;
                    if altitude < LANDED_ALTITUDE_M {
                        this.landed.store(true, Ordering::SeqCst);
                    }
                }
            }),
        );
        *self.token.lock().unwrap() = Some(token);
    }

    /// Remove the position subscription added by [`attach`](Self::attach)
    pub fn detach(&self, bus: &TelemetryBus) {
        if let Some(token) = self.token.lock().unwrap().take() {
            bus.unsubscribe(token);
        }
    }

    fn command_long(&self, command: MavCmd, params: [f32; 7]) -> Result<(), LinkError> {
        self.link.send(&MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1: params[0],
            param2: params[1],
            param3: params[2],
            param4: params[3],
            param5: params[4],
            param6: params[5],
            param7: params[6],
            command,
            target_system: self.target_system,
            target_component: self.target_component,
            confirmation: 0,
        }))
    }

    /// Arm the motors
    pub fn arm(&self) -> Result<(), LinkError> {
        info!("sending ARM command");
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Disarm the motors; a disarmed vehicle is treated as landed
    pub fn disarm(&self) -> Result<(), LinkError> {
        info!("sending DISARM command");
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )?;
        self.landed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Climb to `altitude` meters above the current position
    pub fn takeoff(&self, altitude: f32) -> Result<(), LinkError> {
        info!("sending TAKEOFF command to {altitude} m");
        self.command_long(
            MavCmd::MAV_CMD_NAV_TAKEOFF,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude],
        )
    }

    /// Land at the current position
    pub fn land(&self) -> Result<(), LinkError> {
        info!("sending LAND command");
        self.command_long(
            MavCmd::MAV_CMD_NAV_LAND,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Fly back to the launch point
    pub fn return_to_launch(&self) -> Result<(), LinkError> {
        info!("sending RETURN_TO_LAUNCH command");
        self.command_long(
            MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Switch the autopilot to `mode`
    pub fn set_mode(&self, mode: FlightMode) -> Result<(), LinkError> {
        info!("setting mode to {mode}");
        // param1 = MAV_MODE_FLAG_CUSTOM_MODE_ENABLED, param2 = custom mode
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            [1.0, mode.custom_mode() as f32, 0.0, 0.0, 0.0, 0.0, 0.0],
        )
    }

    /// Command body-frame velocities in m/s, leaving position control to the
    /// autopilot on the ignored axes
    pub fn send_velocity(&self, vx: f32, vy: f32, vz: f32) -> Result<(), LinkError> {
        debug!("sending velocity command: vx={vx:.2} vy={vy:.2} vz={vz:.2}");
        self.link.send(&MavMessage::SET_POSITION_TARGET_LOCAL_NED(
            SET_POSITION_TARGET_LOCAL_NED_DATA {
                time_boot_ms: 0,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                vx,
                vy,
                vz,
                afx: 0.0,
                afy: 0.0,
                afz: 0.0,
                yaw: 0.0,
                yaw_rate: 0.0,
                type_mask: PositionTargetTypemask::from_bits_truncate(VELOCITY_ONLY_TYPE_MASK),
                target_system: self.target_system,
                target_component: self.target_component,
                coordinate_frame: MavFrame::MAV_FRAME_BODY_NED,
            },
        ))
    }

    /// Whether the vehicle has been observed on the ground
    pub fn is_landed(&self) -> bool {
        self.landed.load(Ordering::SeqCst)
    }
}
