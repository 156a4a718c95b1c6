//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub link: LinkConfig,
    pub flight: FlightConfig,
    pub safety: SafetyConfig,
    pub landing: LandingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub mission: MissionConfig,
}

/// MAVLink link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Serial device path, or a full connection string such as
    /// `udpin:0.0.0.0:14550` / `tcpout:127.0.0.1:5760`
    #[serde(default = "default_port")]
    pub port: String,

    /// Baud rate, used only when `port` is a serial device
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// System id of the autopilot we command
    #[serde(default = "default_target_system")]
    pub target_system: u8,

    /// Component id of the autopilot we command
    #[serde(default = "default_target_component")]
    pub target_component: u8,

    /// Our own system id on the link
    #[serde(default = "default_system_id")]
    pub system_id: u8,

    /// Our own component id on the link
    #[serde(default = "default_component_id")]
    pub component_id: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud_rate: default_baud_rate(),
            target_system: default_target_system(),
            target_component: default_target_component(),
            system_id: default_system_id(),
            component_id: default_component_id(),
        }
    }
}

impl LinkConfig {
    /// Connection address in the codec's `proto:host:port` form
    ///
    /// A bare device path is combined with `baud_rate` into a serial address;
    /// anything already containing a protocol prefix is passed through.
    pub fn address(&self) -> String {
        if self.port.contains(':') {
            self.port.clone()
        } else {
            format!("serial:{}:{}", self.port, self.baud_rate)
        }
    }
}

/// Flight sequence configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FlightConfig {
    /// Altitude to climb to after arming, in meters
    #[serde(default = "default_takeoff_altitude")]
    pub takeoff_altitude: f32,

    /// How long to hold and monitor after takeoff, in seconds
    #[serde(default = "default_monitor_duration_s")]
    pub monitor_duration_s: u64,

    /// Interval between attitude status log lines, in milliseconds
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
}

/// Battery fail-safe configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    /// Remaining-capacity percentage below which return-to-launch fires
    #[serde(default = "default_battery_threshold")]
    pub battery_threshold_percent: u8,

    /// Battery poll interval, in milliseconds
    #[serde(default = "default_safety_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Precision landing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LandingConfig {
    /// Flight mode used for vision-guided corrections
    #[serde(default = "default_landing_mode")]
    pub mode: String,

    /// Settle time after the mode switch, in milliseconds
    #[serde(default = "default_mode_settle_ms")]
    pub mode_settle_ms: u64,

    /// Normalized offset below which an axis counts as centered
    #[serde(default = "default_center_threshold")]
    pub center_threshold: f32,

    /// Minimum detected target radius (pixels) before landing is allowed
    #[serde(default = "default_min_radius")]
    pub min_radius: f32,

    /// Video poll interval, in milliseconds
    #[serde(default = "default_landing_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub pid: PidConfig,
}

/// Gains and output bound shared by both lateral PID controllers
#[derive(Debug, Deserialize, Clone)]
pub struct PidConfig {
    #[serde(default = "default_kp")]
    pub kp: f32,

    #[serde(default = "default_ki")]
    pub ki: f32,

    #[serde(default = "default_kd")]
    pub kd: f32,

    /// Symmetric output bound: commands are clamped to [-max_output, max_output]
    #[serde(default = "default_max_output")]
    pub max_output: f32,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
            max_output: default_max_output(),
        }
    }
}

/// Application log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily-rotated log files; empty logs to stdout
    #[serde(default)]
    pub dir: String,
}

/// Flight data recorder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecorderConfig {
    #[serde(default = "default_recorder_enabled")]
    pub enabled: bool,

    /// Directory flight logs are written into
    #[serde(default = "default_recorder_dir")]
    pub log_dir: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: default_recorder_enabled(),
            log_dir: default_recorder_dir(),
        }
    }
}

/// Mission upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MissionConfig {
    /// Settle time after the clear-all command, in milliseconds
    #[serde(default = "default_clear_settle_ms")]
    pub clear_settle_ms: u64,

    /// Bound on the wait for each waypoint request, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bound on the wait for the final acknowledgment, in milliseconds
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Waypoints uploaded at startup; empty skips the upload
    #[serde(default)]
    pub waypoints: Vec<WaypointConfig>,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            clear_settle_ms: default_clear_settle_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            waypoints: Vec::new(),
        }
    }
}

/// One configured mission item
#[derive(Debug, Deserialize, Clone)]
pub struct WaypointConfig {
    /// One of `takeoff`, `waypoint`, `land`, `return`
    pub kind: String,

    #[serde(default)]
    pub lat: f64,

    #[serde(default)]
    pub lon: f64,

    #[serde(default)]
    pub alt: f32,

    /// Hold time at the waypoint, in seconds
    #[serde(default)]
    pub hold_s: f32,
}

// Default value functions
fn default_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 57600 }
fn default_target_system() -> u8 { 1 }
fn default_target_component() -> u8 { 1 }
fn default_system_id() -> u8 { 255 }
fn default_component_id() -> u8 { 190 }

fn default_takeoff_altitude() -> f32 { 10.0 }
fn default_monitor_duration_s() -> u64 { 30 }
fn default_status_interval_ms() -> u64 { 1000 }

fn default_battery_threshold() -> u8 { 20 }
fn default_safety_poll_interval_ms() -> u64 { 1000 }

fn default_landing_mode() -> String { "GUIDED".to_string() }
fn default_mode_settle_ms() -> u64 { 2000 }
fn default_center_threshold() -> f32 { 0.05 }
fn default_min_radius() -> f32 { 50.0 }
fn default_landing_poll_interval_ms() -> u64 { 100 }

fn default_kp() -> f32 { 0.5 }
fn default_ki() -> f32 { 0.0 }
fn default_kd() -> f32 { 0.1 }
fn default_max_output() -> f32 { 1.0 }

fn default_recorder_enabled() -> bool { true }
fn default_recorder_dir() -> String { "./logs".to_string() }

fn default_clear_settle_ms() -> u64 { 1000 }
fn default_request_timeout_ms() -> u64 { 5000 }
fn default_ack_timeout_ms() -> u64 { 5000 }

const WAYPOINT_KINDS: &[&str] = &["takeoff", "waypoint", "land", "return"];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.link.port.is_empty() {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("link port cannot be empty"),
            ));
        }

        if self.link.baud_rate == 0 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("baud_rate must be greater than 0"),
            ));
        }

        if self.flight.takeoff_altitude <= 0.0 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("takeoff_altitude must be greater than 0"),
            ));
        }

        if self.flight.status_interval_ms == 0 || self.flight.status_interval_ms > 60000 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("status_interval_ms must be between 1 and 60000"),
            ));
        }

        if self.safety.battery_threshold_percent > 100 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("battery_threshold_percent must be between 0 and 100"),
            ));
        }

        if self.safety.poll_interval_ms == 0 || self.safety.poll_interval_ms > 60000 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("safety poll_interval_ms must be between 1 and 60000"),
            ));
        }

        if crate::commands::FlightMode::from_name(&self.landing.mode).is_none() {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom(format!("unknown landing mode: {}", self.landing.mode)),
            ));
        }

        if self.landing.center_threshold <= 0.0 || self.landing.center_threshold >= 1.0 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("center_threshold must be between 0.0 and 1.0 exclusive"),
            ));
        }

        if self.landing.min_radius <= 0.0 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("min_radius must be greater than 0"),
            ));
        }

        if self.landing.poll_interval_ms == 0 || self.landing.poll_interval_ms > 60000 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("landing poll_interval_ms must be between 1 and 60000"),
            ));
        }

        if self.landing.pid.max_output <= 0.0 {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("pid max_output must be greater than 0"),
            ));
        }

        if self.recorder.enabled && self.recorder.log_dir.is_empty() {
            return Err(crate::error::CompanionError::Config(
                toml::de::Error::custom("recorder log_dir cannot be empty when enabled"),
            ));
        }

        for bound in [
            self.mission.request_timeout_ms,
            self.mission.ack_timeout_ms,
        ] {
            if bound == 0 || bound > 60000 {
                return Err(crate::error::CompanionError::Config(
                    toml::de::Error::custom("mission timeouts must be between 1 and 60000"),
                ));
            }
        }

        for (index, waypoint) in self.mission.waypoints.iter().enumerate() {
            if !WAYPOINT_KINDS.contains(&waypoint.kind.as_str()) {
                return Err(crate::error::CompanionError::Config(
                    toml::de::Error::custom(format!(
                        "waypoint {} has unknown kind '{}' (expected one of {:?})",
                        index, waypoint.kind, WAYPOINT_KINDS
                    )),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn create_valid_config() -> Config {
        toml::from_str(
            r#"
            [link]
            port = "udpin:0.0.0.0:14550"

            [flight]

            [safety]

            [landing]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = create_valid_config();
        assert!(config.validate().is_ok());

        assert_eq!(config.link.baud_rate, 57600);
        assert_eq!(config.link.system_id, 255);
        assert_eq!(config.flight.takeoff_altitude, 10.0);
        assert_eq!(config.safety.battery_threshold_percent, 20);
        assert_eq!(config.landing.mode, "GUIDED");
        assert_eq!(config.landing.center_threshold, 0.05);
        assert_eq!(config.landing.pid.kp, 0.5);
        assert!(config.recorder.enabled);
        assert!(config.mission.waypoints.is_empty());
    }

    #[test]
    fn test_serial_port_becomes_serial_address() {
        let mut config = create_valid_config();
        config.link.port = "/dev/ttyUSB0".to_string();
        config.link.baud_rate = 115200;
        assert_eq!(config.link.address(), "serial:/dev/ttyUSB0:115200");
    }

    #[test]
    fn test_network_port_passes_through() {
        let config = create_valid_config();
        assert_eq!(config.link.address(), "udpin:0.0.0.0:14550");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [link]
            port = "/dev/ttyACM0"
            baud_rate = 921600

            [flight]
            takeoff_altitude = 15.0

            [safety]
            battery_threshold_percent = 25

            [landing]
            center_threshold = 0.1

            [landing.pid]
            kp = 0.8

            [[mission.waypoints]]
            kind = "takeoff"
            alt = 15.0

            [[mission.waypoints]]
            kind = "waypoint"
            lat = 47.397742
            lon = 8.545594
            alt = 15.0
            hold_s = 2.0
            "#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.link.baud_rate, 921600);
        assert_eq!(config.flight.takeoff_altitude, 15.0);
        assert_eq!(config.safety.battery_threshold_percent, 25);
        assert_eq!(config.landing.pid.kp, 0.8);
        assert_eq!(config.landing.pid.ki, 0.0);
        assert_eq!(config.mission.waypoints.len(), 2);
        assert_eq!(config.mission.waypoints[1].kind, "waypoint");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Config::load("/nonexistent/config.toml").is_err());
    }

    #[test]
    fn test_empty_port_fails() {
        let mut config = create_valid_config();
        config.link.port = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_takeoff_altitude_fails() {
        let mut config = create_valid_config();
        config.flight.takeoff_altitude = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_battery_threshold_over_100_fails() {
        let mut config = create_valid_config();
        config.safety.battery_threshold_percent = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_landing_mode_fails() {
        let mut config = create_valid_config();
        config.landing.mode = "FREEFALL".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_center_threshold_bounds() {
        let mut config = create_valid_config();
        config.landing.center_threshold = 0.0;
        assert!(config.validate().is_err());
        config.landing.center_threshold = 1.0;
        assert!(config.validate().is_err());
        config.landing.center_threshold = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_mission_timeout_fails() {
        let mut config = create_valid_config();
        config.mission.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_waypoint_kind_fails() {
        let mut config = create_valid_config();
        config.mission.waypoints.push(WaypointConfig {
            kind: "hover".to_string(),
            lat: 0.0,
            lon: 0.0,
            alt: 0.0,
            hold_s: 0.0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_recorder_enabled_without_dir_fails() {
        let mut config = create_valid_config();
        config.recorder.log_dir = String::new();
        assert!(config.validate().is_err());
    }
}
