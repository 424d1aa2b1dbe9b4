//! # Derivation
//!
//! Turns a [`RawSample`] into an [`EnrichedRow`].
//!
//! ## Temperature
//!
//! Readings at or below -50 °C are the probe's "disconnected" sentinel and
//! become `None`.
//!
//! ## Max charging voltage
//!
//! `15.4 - 0.03 * t`, where `t` is the temperature when it is known and above
//! -40 °C, and `0` otherwise.
//!
//! ## Capacity
//!
//! | Voltage | Capacity |
//! |---------|----------|
//! | >= 13.0 | 100 |
//! | <= 11.6 | 0 |
//! | between | `round(66.67 * (v - 11.5))` |
//!
//! Rounding is half away from zero (`f64::round`).
//!
//! ## Usage
//!
//! ```
//! use battery_monitor::telemetry::derive::{capacity_percent, derive};
//! use battery_monitor::telemetry::RawSample;
//!
//! assert_eq!(capacity_percent(12.5), 67);
//!
//! let row = derive(&RawSample::now(-50.0, 12.8, 1.5));
//! assert_eq!(row.temperature, None);
//! assert_eq!(row.max_charging_voltage, 15.4);
//! ```

use super::types::{EnrichedRow, RawSample, TEMPERATURE_SENSOR_DISCONNECTED};

/// Reference temperature drawn alongside every temperature series
pub const IDEAL_TEMPERATURE: f64 = 25.0;

/// Charge ceiling at 0 °C
const CHARGE_CEILING_BASE: f64 = 15.4;

/// Ceiling drop per °C
const CHARGE_CEILING_SLOPE: f64 = 0.03;

/// At or below this temperature the ceiling uses 0 °C
const CHARGE_COMPENSATION_FLOOR: f64 = -40.0;

/// Voltage at which the pack counts as full
pub const CAPACITY_FULL_VOLTAGE: f64 = 13.0;

/// Voltage at which the pack counts as empty
pub const CAPACITY_EMPTY_VOLTAGE: f64 = 11.6;

const CAPACITY_SLOPE: f64 = 66.67;
const CAPACITY_OFFSET: f64 = 11.5;

/// Derive an enriched row from a raw sample.
///
/// Pure and total: the same input always yields the same output.
#[must_use]
pub fn derive(raw: &RawSample) -> EnrichedRow {
    let temperature = normalize_temperature(raw.temperature);

    EnrichedRow {
        timestamp: raw.timestamp,
        temperature,
        voltage: raw.voltage,
        current: raw.current,
        ideal_temperature: IDEAL_TEMPERATURE,
        max_charging_voltage: max_charging_voltage(temperature),
        capacity_percent: capacity_percent(raw.voltage),
    }
}

/// Map the disconnected sentinel to `None`.
#[must_use]
pub fn normalize_temperature(raw: f64) -> Option<f64> {
    if raw <= TEMPERATURE_SENSOR_DISCONNECTED {
        None
    } else {
        Some(raw)
    }
}

/// Temperature-compensated charge ceiling.
#[must_use]
pub fn max_charging_voltage(temperature: Option<f64>) -> f64 {
    let effective = match temperature {
        Some(t) if t > CHARGE_COMPENSATION_FLOOR => t,
        _ => 0.0,
    };
    CHARGE_CEILING_BASE - CHARGE_CEILING_SLOPE * effective
}

/// Estimated state of charge from pack voltage.
#[must_use]
pub fn capacity_percent(voltage: f64) -> u8 {
    if voltage >= CAPACITY_FULL_VOLTAGE {
        return 100;
    }
    if voltage <= CAPACITY_EMPTY_VOLTAGE || voltage.is_nan() {
        return 0;
    }
    (CAPACITY_SLOPE * (voltage - CAPACITY_OFFSET)).round().clamp(0.0, 100.0) as u8
}
