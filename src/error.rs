//! # Error Types
//!
//! Custom error types for Battery Monitor using `thiserror`.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Battery Monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Link-level failures (port cannot be opened, write/read failed)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Sensor answered, but the payload could not be decoded
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A channel read did not finish within its budget
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Snapshot (de)serialization errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reader list and store disagree on the number of channels
    #[error("Channel count mismatch: {readers} readers for {channels} channels")]
    ChannelCountMismatch { readers: usize, channels: usize },
}

/// Result type alias for Battery Monitor
pub type Result<T> = std::result::Result<T, MonitorError>;
