//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::info;

use crate::error::{MonitorError, Result};

/// Largest fleet the dashboard is laid out for
pub const MAX_CHANNELS: usize = 9;

/// Longest polling period: one day
pub const MAX_PERIOD_S: f64 = 86_400.0;

/// Longest window or retention horizon: ten years
pub const MAX_HISTORY_HOURS: f64 = 87_600.0;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which Channel Reader implementation to build
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReaderMode {
    /// Live readers when any address is configured, simulated otherwise
    Auto,
    Live,
    Simulated,
}

/// Polling loop configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SamplingConfig {
    #[serde(default = "default_channel_count")]
    pub channel_count: usize,

    #[serde(default = "default_period_s")]
    pub period_s: f64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_reader_mode")]
    pub mode: ReaderMode,
}

/// Sensor link configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransportConfig {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Device path per channel, in channel order. Empty string means no address.
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Snapshot and retention configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_window_hours")]
    pub window_hours: f64,

    #[serde(default = "default_retention_hours")]
    pub retention_hours: f64,
}

/// Thresholds used to flag the latest readings
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ReportConfig {
    #[serde(default = "default_max_voltage")]
    pub max_voltage: f64,

    #[serde(default = "default_min_voltage")]
    pub min_voltage: f64,

    #[serde(default = "default_max_voltage_diff")]
    pub max_voltage_diff: f64,

    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    #[serde(default = "default_min_temperature")]
    pub min_temperature: f64,
}

/// Log output configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_channel_count() -> usize { MAX_CHANNELS }
fn default_period_s() -> f64 { 60.0 }
fn default_read_timeout_ms() -> u64 { 10_000 }
fn default_reader_mode() -> ReaderMode { ReaderMode::Auto }

fn default_baud_rate() -> u32 { 9600 }
fn default_settle_ms() -> u64 { 3000 }

fn default_data_dir() -> String { "./data".to_string() }
fn default_window_hours() -> f64 { 12.0 }
fn default_retention_hours() -> f64 { 24.0 }

fn default_max_voltage() -> f64 { 15.5 }
fn default_min_voltage() -> f64 { 11.9 }
fn default_max_voltage_diff() -> f64 { 0.35 }
fn default_max_temperature() -> f64 { 42.5 }
fn default_min_temperature() -> f64 { 5.0 }

fn default_log_dir() -> String { "./logs".to_string() }
fn default_log_level() -> String { "info".to_string() }

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            channel_count: default_channel_count(),
            period_s: default_period_s(),
            read_timeout_ms: default_read_timeout_ms(),
            mode: default_reader_mode(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            settle_ms: default_settle_ms(),
            addresses: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            window_hours: default_window_hours(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_voltage: default_max_voltage(),
            min_voltage: default_min_voltage(),
            max_voltage_diff: default_max_voltage_diff(),
            max_temperature: default_max_temperature(),
            min_temperature: default_min_temperature(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            level: default_log_level(),
        }
    }
}

fn hours(value: f64) -> TimeDelta {
    TimeDelta::milliseconds((value * 3_600_000.0) as i64)
}

fn invalid(msg: impl std::fmt::Display) -> MonitorError {
    MonitorError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use battery_monitor::config::Config;
    ///
    /// let config = Config::load("config/battery-monitor.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, writing a default file first if none exists
    ///
    /// A fresh install gets an editable file with every address slot blank,
    /// which runs the dashboard on simulated data.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Config::default();
            config.write(path)?;
            info!("Wrote default configuration to {}", path.display());
            return Ok(config);
        }
        Self::load(path)
    }

    /// Serialize this configuration to `path`, creating parent directories
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut config = self.clone();
        if config.transport.addresses.is_empty() {
            config.transport.addresses = vec![String::new(); config.sampling.channel_count];
        }
        let contents = toml::to_string_pretty(&config).map_err(invalid)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Endpoint address for a 0-based channel index, if one is configured
    pub fn address(&self, channel: usize) -> Option<String> {
        self.transport
            .addresses
            .get(channel)
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(str::to_string)
    }

    /// Whether any channel has an endpoint address
    pub fn has_addresses(&self) -> bool {
        (0..self.sampling.channel_count).any(|i| self.address(i).is_some())
    }

    /// Polling period
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.sampling.period_s)
    }

    /// Wall-clock budget for a single channel read
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.sampling.read_timeout_ms)
    }

    /// Delay between sending the request and reading the answer
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.transport.settle_ms)
    }

    /// Trailing window exposed to the presentation layer
    pub fn window(&self) -> TimeDelta {
        hours(self.storage.window_hours)
    }

    /// In-memory retention horizon, `None` when pruning is disabled
    pub fn retention(&self) -> Option<TimeDelta> {
        if self.storage.retention_hours == 0.0 {
            None
        } else {
            Some(hours(self.storage.retention_hours))
        }
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let sampling = &self.sampling;
        if sampling.channel_count == 0 || sampling.channel_count > MAX_CHANNELS {
            return Err(invalid(format!("channel_count must be between 1 and {}", MAX_CHANNELS)));
        }

        if !sampling.period_s.is_finite() || sampling.period_s <= 0.0 || sampling.period_s > MAX_PERIOD_S {
            return Err(invalid(format!("period_s must be greater than 0 and at most {}", MAX_PERIOD_S)));
        }

        if sampling.read_timeout_ms == 0 || sampling.read_timeout_ms > 60_000 {
            return Err(invalid("read_timeout_ms must be between 1 and 60000"));
        }

        // The settle delay is part of every live read
        if self.transport.settle_ms >= sampling.read_timeout_ms {
            return Err(invalid("settle_ms must be less than read_timeout_ms"));
        }

        if self.transport.baud_rate == 0 {
            return Err(invalid("baud_rate must be greater than 0"));
        }

        if self.transport.addresses.len() > sampling.channel_count {
            return Err(invalid(format!(
                "{} addresses configured for {} channels",
                self.transport.addresses.len(),
                sampling.channel_count
            )));
        }

        if sampling.mode == ReaderMode::Live && !self.has_addresses() {
            return Err(invalid("mode 'live' requires at least one channel address"));
        }

        let storage = &self.storage;
        if storage.data_dir.is_empty() {
            return Err(invalid("data_dir cannot be empty"));
        }

        if !storage.window_hours.is_finite()
            || storage.window_hours <= 0.0
            || storage.window_hours > MAX_HISTORY_HOURS
        {
            return Err(invalid(format!("window_hours must be greater than 0 and at most {}", MAX_HISTORY_HOURS)));
        }

        if !storage.retention_hours.is_finite()
            || storage.retention_hours < 0.0
            || storage.retention_hours > MAX_HISTORY_HOURS
            || (storage.retention_hours > 0.0 && storage.retention_hours < storage.window_hours)
        {
            return Err(invalid(format!(
                "retention_hours must be 0 (keep all) or between window_hours and {}",
                MAX_HISTORY_HOURS
            )));
        }

        let report = &self.report;
        let thresholds = [
            ("max_voltage", report.max_voltage),
            ("min_voltage", report.min_voltage),
            ("max_voltage_diff", report.max_voltage_diff),
            ("max_temperature", report.max_temperature),
            ("min_temperature", report.min_temperature),
        ];
        if let Some((name, _)) = thresholds.iter().find(|(_, value)| !value.is_finite()) {
            return Err(invalid(format!("{} must be a finite number", name)));
        }

        if report.min_voltage >= report.max_voltage {
            return Err(invalid("min_voltage must be less than max_voltage"));
        }

        if report.min_temperature >= report.max_temperature {
            return Err(invalid("min_temperature must be less than max_temperature"));
        }

        if report.max_voltage_diff <= 0.0 {
            return Err(invalid("max_voltage_diff must be greater than 0"));
        }

        if self.logging.log_dir.is_empty() {
            return Err(invalid("log_dir cannot be empty"));
        }

        Ok(())
    }
}
