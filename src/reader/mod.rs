//! # Channel Reader Module
//!
//! One reader per monitored battery pack.
//!
//! This module handles:
//! - The [`ChannelReader`] capability used by the cycle scheduler
//! - Encoding the `get_data` request and decoding sensor responses
//! - Live reads over the serial device of each channel's wireless link
//! - Synthetic readings when no hardware is configured
//! - Building the reader list from configuration

pub mod port_trait;
pub mod protocol;
pub mod serial;
pub mod simulated;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::config::{Config, ReaderMode};
use crate::error::Result;
use crate::telemetry::RawSample;

pub use serial::SerialReader;
pub use simulated::SimulatedReader;

/// Source of raw samples for a single channel
///
/// Each call is one blocking read attempt. `Ok(None)` means the channel had
/// nothing to report (for example, no address is assigned); errors are local to
/// the channel and never abort a polling cycle.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelReader: Send {
    /// Attempt one read
    async fn read(&mut self) -> Result<Option<RawSample>>;

    /// Current endpoint address
    fn address(&self) -> Option<String>;

    /// Replace the endpoint address; takes effect on the next read
    fn set_address(&mut self, address: Option<String>);
}

/// Resolve `auto` to the concrete reader kind for this configuration
pub fn resolve_mode(config: &Config) -> ReaderMode {
    match config.sampling.mode {
        ReaderMode::Auto if config.has_addresses() => ReaderMode::Live,
        ReaderMode::Auto => ReaderMode::Simulated,
        mode => mode,
    }
}

/// Build one reader per configured channel, in channel order
///
/// # Examples
///
/// ```
/// use battery_monitor::config::Config;
/// use battery_monitor::reader::build_readers;
///
/// let readers = build_readers(&Config::default());
/// assert_eq!(readers.len(), 9);
/// ```
pub fn build_readers(config: &Config) -> Vec<Box<dyn ChannelReader>> {
    let mode = resolve_mode(config);
    info!(
        "Building {} {:?} channel readers",
        config.sampling.channel_count, mode
    );

    (0..config.sampling.channel_count)
        .map(|channel| -> Box<dyn ChannelReader> {
            let address = config.address(channel);
            match mode {
                ReaderMode::Simulated => {
                    let mut reader = SimulatedReader::new();
                    reader.set_address(address);
                    Box::new(reader)
                }
                _ => Box::new(SerialReader::new(
                    channel,
                    address,
                    config.transport.baud_rate,
                    config.settle(),
                )),
            }
        })
        .collect()
}
