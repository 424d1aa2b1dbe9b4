//! # Telemetry Types
//!
//! Sample and row definitions shared by readers, the store and snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw temperature at or below this value means the probe is disconnected
pub const TEMPERATURE_SENSOR_DISCONNECTED: f64 = -50.0;

/// One successful channel read, exactly as reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Time the sample was taken
    pub timestamp: DateTime<Utc>,

    /// Temperature in °C, possibly the disconnected sentinel
    pub temperature: f64,

    /// Pack voltage in volts
    pub voltage: f64,

    /// Pack current in amps
    pub current: f64,
}

impl RawSample {
    /// Creates a sample stamped with the current time.
    #[must_use]
    pub fn now(temperature: f64, voltage: f64, current: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            temperature,
            voltage,
            current,
        }
    }
}

/// A raw sample plus the quantities derived from it
///
/// `temperature` is `None` when the probe reported the disconnected sentinel,
/// unless a later in-cycle back-fill supplied another channel's reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub timestamp: DateTime<Utc>,

    pub temperature: Option<f64>,

    pub voltage: f64,

    pub current: f64,

    /// Reference line for the temperature chart (always 25 °C)
    pub ideal_temperature: f64,

    /// Temperature-compensated charge ceiling in volts
    pub max_charging_voltage: f64,

    /// Estimated state of charge, 0-100
    pub capacity_percent: u8,
}
