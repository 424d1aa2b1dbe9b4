//! # Serial Link Reader
//!
//! Reads a battery sensor through the serial device of its wireless link
//! (for example an RFCOMM binding at `/dev/rfcomm0`).
//!
//! One read:
//! - Opens the port (8N1 at the configured baud rate)
//! - Sends `get_data` and flushes
//! - Waits the settle delay while the sensor prepares its answer
//! - Reads a single chunk of up to 1024 bytes and decodes it
//! - Closes the port

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use super::port_trait::{SerialPortIO, TokioSerialPort};
use super::protocol::{decode_response, escape, GET_DATA_REQUEST, MAX_RESPONSE_SIZE};
use super::ChannelReader;
use crate::error::{MonitorError, Result};
use crate::telemetry::RawSample;

/// Channel Reader backed by a serial device path
pub struct SerialReader {
    /// 0-based channel index, for logging
    channel: usize,
    /// Device path, `None` disables the channel
    address: Option<String>,
    baud_rate: u32,
    settle: Duration,
}

impl std::fmt::Debug for SerialReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialReader")
            .field("channel", &self.channel)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl SerialReader {
    /// Create a reader for a channel
    ///
    /// # Arguments
    ///
    /// * `channel` - 0-based channel index
    /// * `address` - Serial device path, or `None` for an unassigned channel
    /// * `baud_rate` - Link baud rate
    /// * `settle` - Delay between request and response read
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use battery_monitor::reader::serial::SerialReader;
    ///
    /// let reader = SerialReader::new(0, Some("/dev/rfcomm0".into()), 9600, Duration::from_secs(3));
    /// ```
    pub fn new(channel: usize, address: Option<String>, baud_rate: u32, settle: Duration) -> Self {
        Self {
            channel,
            address,
            baud_rate,
            settle,
        }
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<TokioSerialPort> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| MonitorError::Transport(format!("Failed to open {}: {}", path, e)))?;

        Ok(TokioSerialPort::new(port))
    }
}

#[async_trait]
impl ChannelReader for SerialReader {
    async fn read(&mut self) -> Result<Option<RawSample>> {
        let Some(path) = self.address.clone() else {
            return Ok(None);
        };

        debug!("Channel {}: opening {}", self.channel + 1, path);
        let mut port = Self::open_port(&path, self.baud_rate)?;
        let sample = exchange(&mut port, self.settle).await?;
        Ok(Some(sample))
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }

    fn set_address(&mut self, address: Option<String>) {
        self.address = address;
    }
}

/// Run one request/response exchange on an open port
///
/// # Errors
///
/// Returns [`MonitorError::Transport`] on I/O failure or an empty answer, and
/// [`MonitorError::MalformedResponse`] if the answer cannot be decoded.
pub async fn exchange<P>(port: &mut P, settle: Duration) -> Result<RawSample>
where
    P: SerialPortIO + ?Sized,
{
    port.write_all(GET_DATA_REQUEST)
        .await
        .map_err(|e| MonitorError::Transport(format!("Failed to write request: {}", e)))?;

    port.flush()
        .await
        .map_err(|e| MonitorError::Transport(format!("Failed to flush serial port: {}", e)))?;

    tokio::time::sleep(settle).await;

    let mut buf = BytesMut::with_capacity(MAX_RESPONSE_SIZE);
    let received = port
        .read_buf(&mut buf)
        .await
        .map_err(|e| MonitorError::Transport(format!("Failed to read response: {}", e)))?;

    if received == 0 {
        return Err(MonitorError::Transport("Link closed without a response".to_string()));
    }

    debug!("Data received: {}", escape(&String::from_utf8_lossy(&buf)));
    decode_response(&buf, Utc::now())
}
