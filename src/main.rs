//! # Battery Monitor
//!
//! Poll battery-pack sensors over their wireless serial links and keep a
//! rolling telemetry window per pack.
//!
//! This binary runs the sampling pipeline headless: each completed cycle is
//! rendered as one log line per channel.

use anyhow::Result;
use chrono::TimeDelta;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use battery_monitor::config::{Config, LoggingConfig, ReportConfig};
use battery_monitor::reader::{build_readers, resolve_mode};
use battery_monitor::scheduler::{CycleScheduler, SchedulerSettings};
use battery_monitor::telemetry::persist::SnapshotDir;
use battery_monitor::telemetry::report::assess;
use battery_monitor::telemetry::StoreSnapshot;

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/battery-monitor.toml";

/// Daily log files are named `<prefix>.YYYY-MM-DD`
const LOG_FILE_PREFIX: &str = "battery-monitor.log";

/// Main entry point for Battery Monitor
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load (or create) the configuration file
///    - Set up console and daily-rolling file logging
///    - Restore per-channel history from the snapshot directory
///    - Build live or simulated channel readers
///
/// 2. **Main Loop**
///    - The scheduler polls every channel once per period on a background task
///    - Each published snapshot is rendered with threshold flags
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Stop the scheduler after its current read
///    - Log the number of completed cycles
///
/// # Examples
///
/// ```bash
/// cargo run --release -- config/battery-monitor.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO battery_monitor: Battery Monitor v0.1.0 starting...
/// INFO battery_monitor::reader: Building 9 Simulated channel readers
/// INFO battery_monitor::scheduler: Cycle 1: 9 samples, 0 failed, 0 back-filled (fallback Some(19.2)), 0 pruned, 0.001s
/// INFO battery_monitor: #1  12.43 V  10.52 A   19.2 °C   62% ceiling 14.82 V [1 pts]
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_create(&config_path)?;

    let _log_guard = init_logging(&config.logging)?;
    info!("Battery Monitor v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration {}: {} channels, {:?} readers",
        config_path,
        config.sampling.channel_count,
        resolve_mode(&config)
    );

    let store = SnapshotDir::new(&config.storage.data_dir)
        .load(config.sampling.channel_count)
        .with_retention(config.retention());
    let readers = build_readers(&config);

    let (scheduler, mut handle) =
        CycleScheduler::new(readers, store, SchedulerSettings::from_config(&config))?;
    render(&handle.snapshot(), handle.window(), &config.report);

    let task = scheduler.spawn();
    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            changed = handle.changed() => {
                if !changed {
                    warn!("Scheduler stopped unexpectedly");
                    break;
                }
                render(&handle.snapshot(), handle.window(), &config.report);
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                handle.stop();
                break;
            }
        }
    }

    let scheduler = task.await?;
    info!("Total cycles completed: {}", scheduler.cycles());

    Ok(())
}

/// Console and daily-rolling file output, filtered by `RUST_LOG` or the configured level
fn init_logging(logging: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&logging.log_dir)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_PREFIX));

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    Ok(guard)
}

/// Log the latest state of every channel
fn render(snapshot: &StoreSnapshot, window: TimeDelta, limits: &ReportConfig) {
    let report = assess(snapshot, limits);
    let windows = snapshot.windows(window);

    for status in &report.channels {
        let points = windows.get(status.channel).map_or(0, Vec::len);
        let Some(row) = &status.latest else {
            info!("#{} no data", status.channel + 1);
            continue;
        };

        let temperature = row
            .temperature
            .map_or_else(|| "  --.-".to_string(), |t| format!("{:>6.1}", t));
        let flags: Vec<String> = status.flags.iter().map(ToString::to_string).collect();

        info!(
            "#{} {:>6.2} V {:>6.2} A {} °C {:>4}% ceiling {:.2} V [{} pts] {}",
            status.channel + 1,
            row.voltage,
            row.current,
            temperature,
            row.capacity_percent,
            row.max_charging_voltage,
            points,
            flags.join(" ")
        );
    }

    if report.spread_exceeded {
        if let Some(spread) = report.voltage_spread {
            warn!(
                "Voltage spread {:.2} V exceeds {:.2} V",
                spread, limits.max_voltage_diff
            );
        }
    }
}
