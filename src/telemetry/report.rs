//! # Threshold Report
//!
//! Flags the latest reading of each channel against the `[report]` limits.
//! Flags are informational only; nothing here raises alerts.

use std::fmt;

use super::snapshot::StoreSnapshot;
use super::types::EnrichedRow;
use crate::config::ReportConfig;

/// A single out-of-range condition on a channel's latest row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    OverVoltage,
    UnderVoltage,
    OverTemperature,
    UnderTemperature,
    /// Voltage above the temperature-compensated charge ceiling
    AboveChargeCeiling,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Flag::OverVoltage => "over-voltage",
            Flag::UnderVoltage => "under-voltage",
            Flag::OverTemperature => "over-temperature",
            Flag::UnderTemperature => "under-temperature",
            Flag::AboveChargeCeiling => "above-charge-ceiling",
        };
        f.write_str(label)
    }
}

/// Latest row of one channel and the flags it raised
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatus {
    pub channel: usize,
    pub latest: Option<EnrichedRow>,
    pub flags: Vec<Flag>,
}

/// Fleet-wide result of [`assess`]
#[derive(Debug, Clone, PartialEq)]
pub struct FleetReport {
    pub channels: Vec<ChannelStatus>,

    /// Highest minus lowest latest voltage, when at least two channels reported
    pub voltage_spread: Option<f64>,

    /// Spread exceeded `max_voltage_diff`
    pub spread_exceeded: bool,
}

/// Flags for a single row.
pub fn flag_row(row: &EnrichedRow, limits: &ReportConfig) -> Vec<Flag> {
    let mut flags = Vec::new();

    if row.voltage > limits.max_voltage {
        flags.push(Flag::OverVoltage);
    }
    if row.voltage < limits.min_voltage {
        flags.push(Flag::UnderVoltage);
    }
    if let Some(t) = row.temperature {
        if t > limits.max_temperature {
            flags.push(Flag::OverTemperature);
        }
        if t < limits.min_temperature {
            flags.push(Flag::UnderTemperature);
        }
    }
    if row.voltage > row.max_charging_voltage {
        flags.push(Flag::AboveChargeCeiling);
    }

    flags
}

/// Evaluate every channel's latest row in a snapshot.
pub fn assess(snapshot: &StoreSnapshot, limits: &ReportConfig) -> FleetReport {
    let channels: Vec<ChannelStatus> = (0..snapshot.channel_count())
        .map(|channel| {
            let latest = snapshot.latest(channel).cloned();
            let flags = latest
                .as_ref()
                .map(|row| flag_row(row, limits))
                .unwrap_or_default();
            ChannelStatus { channel, latest, flags }
        })
        .collect();

    let voltages: Vec<f64> = channels
        .iter()
        .filter_map(|status| status.latest.as_ref().map(|row| row.voltage))
        .collect();

    let voltage_spread = if voltages.len() < 2 {
        None
    } else {
        let max = voltages.iter().copied().fold(f64::MIN, f64::max);
        let min = voltages.iter().copied().fold(f64::MAX, f64::min);
        Some(max - min)
    };

    FleetReport {
        spread_exceeded: voltage_spread.is_some_and(|spread| spread > limits.max_voltage_diff),
        channels,
        voltage_spread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::derive::derive;
    use crate::telemetry::RawSample;
    use chrono::Utc;

    fn row(temperature: f64, voltage: f64) -> EnrichedRow {
        derive(&RawSample::now(temperature, voltage, 1.0))
    }

    #[test]
    fn test_nominal_row_has_no_flags() {
        assert!(flag_row(&row(25.0, 13.2), &ReportConfig::default()).is_empty());
    }

    #[test]
    fn test_voltage_flags() {
        let limits = ReportConfig::default();
        assert_eq!(flag_row(&row(20.0, 11.5), &limits), vec![Flag::UnderVoltage]);

        // 15.6 V is over the limit and over the 14.8 V ceiling at 20 °C
        assert_eq!(
            flag_row(&row(20.0, 15.6), &limits),
            vec![Flag::OverVoltage, Flag::AboveChargeCeiling]
        );
    }

    #[test]
    fn test_temperature_flags() {
        let limits = ReportConfig::default();
        assert_eq!(flag_row(&row(45.0, 12.5), &limits), vec![Flag::OverTemperature]);
        assert_eq!(flag_row(&row(2.0, 12.5), &limits), vec![Flag::UnderTemperature]);
    }

    #[test]
    fn test_unknown_temperature_is_not_flagged() {
        assert!(flag_row(&row(-50.0, 12.5), &ReportConfig::default()).is_empty());
    }

    #[test]
    fn test_assess_reports_spread() {
        let series = vec![vec![row(20.0, 12.40)], vec![], vec![row(20.0, 12.90)]];
        let snapshot = StoreSnapshot::new(1, Utc::now(), series);

        let report = assess(&snapshot, &ReportConfig::default());
        assert_eq!(report.channels.len(), 3);
        assert!(report.channels[1].latest.is_none());
        assert!((report.voltage_spread.unwrap() - 0.5).abs() < 1e-9);
        assert!(report.spread_exceeded);
    }

    #[test]
    fn test_assess_single_channel_has_no_spread() {
        let snapshot = StoreSnapshot::new(1, Utc::now(), vec![vec![row(20.0, 12.4)], vec![]]);
        let report = assess(&snapshot, &ReportConfig::default());
        assert_eq!(report.voltage_spread, None);
        assert!(!report.spread_exceeded);
    }

    #[test]
    fn test_flag_display() {
        assert_eq!(Flag::AboveChargeCeiling.to_string(), "above-charge-ceiling");
        assert_eq!(Flag::UnderVoltage.to_string(), "under-voltage");
    }
}
