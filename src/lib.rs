//! # UAV Companion
//!
//! Companion-computer coordinator for MAVLink autopilots.
//!
//! This library provides the pieces that sit between a flight controller and
//! higher-level mission logic: a telemetry bus that fans incoming messages
//! out to subscribers, a transport listener that owns the MAVLink link, a
//! mission uploader implementing the waypoint transfer handshake, a battery
//! fail-safe supervisor and a vision-guided precision-landing controller.

pub mod bus;
pub mod commands;
pub mod config;
pub mod error;
pub mod landing;
pub mod link;
pub mod mission;
pub mod recorder;
pub mod safety;
pub mod telemetry;
