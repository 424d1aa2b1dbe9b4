//! Synthetic Channel Reader used when no sensor addresses are configured.

use async_trait::async_trait;

use super::ChannelReader;
use crate::error::Result;
use crate::telemetry::RawSample;

/// Produces plausible readings without touching any hardware
#[derive(Debug, Default)]
pub struct SimulatedReader {
    address: Option<String>,
}

impl SimulatedReader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelReader for SimulatedReader {
    async fn read(&mut self) -> Result<Option<RawSample>> {
        Ok(Some(RawSample::now(
            rand::random::<f64>() * 3.0 + 18.0,
            rand::random::<f64>() + 12.0,
            rand::random::<f64>() + 10.0,
        )))
    }

    fn address(&self) -> Option<String> {
        self.address.clone()
    }

    // Remembered for display only
    fn set_address(&mut self, address: Option<String>) {
        self.address = address;
    }
}
