//! # Error Types
//!
//! Custom error types for UAV Companion using `thiserror`.

use thiserror::Error;

use crate::link::LinkError;
use crate::mission::MissionError;

/// Main error type for UAV Companion
#[derive(Debug, Error)]
pub enum CompanionError {
    /// Link open/send/receive errors
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// Mission upload failures
    #[error("mission upload failed: {0}")]
    Mission(#[from] MissionError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for UAV Companion
pub type Result<T> = std::result::Result<T, CompanionError>;
