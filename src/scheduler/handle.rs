//! # Dashboard Handle
//!
//! The presentation side's view of a running scheduler.
//!
//! The scheduler publishes an immutable [`StoreSnapshot`] after each cycle
//! through a `tokio::sync::watch` channel. Readers of the handle therefore see
//! either the previous completed cycle or the new one, never a cycle in
//! progress. Commands flow the other way through an unbounded queue and are
//! applied before the next cycle's reads.

use std::sync::Arc;

use chrono::TimeDelta;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::telemetry::{EnrichedRow, StoreSnapshot};

/// Requests from the presentation side to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Change a channel's endpoint address (0-based channel)
    SetAddress { channel: usize, address: Option<String> },
}

/// Cloneable handle for consumers of cycle results
#[derive(Debug, Clone)]
pub struct DashboardHandle {
    snapshots: watch::Receiver<Arc<StoreSnapshot>>,
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    shutdown: Arc<watch::Sender<bool>>,
    window: TimeDelta,
    detail: Option<usize>,
}

impl DashboardHandle {
    pub(crate) fn new(
        snapshots: watch::Receiver<Arc<StoreSnapshot>>,
        commands: mpsc::UnboundedSender<SchedulerCommand>,
        shutdown: Arc<watch::Sender<bool>>,
        window: TimeDelta,
    ) -> Self {
        Self {
            snapshots,
            commands,
            shutdown,
            window,
            detail: None,
        }
    }

    /// Wait until a new snapshot is published
    ///
    /// Returns `false` once the scheduler is gone and no further data will come.
    pub async fn changed(&mut self) -> bool {
        self.snapshots.changed().await.is_ok()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Trailing window used for chart queries
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Window query for every channel against the latest snapshot
    pub fn windows(&self) -> Vec<Vec<EnrichedRow>> {
        self.snapshot().windows(self.window)
    }

    /// Select a channel for the detail view, or clear the selection
    pub fn select_detail(&mut self, channel: Option<usize>) {
        debug!("Detail view channel: {:?}", channel.map(|c| c + 1));
        self.detail = channel;
    }

    pub fn detail_channel(&self) -> Option<usize> {
        self.detail
    }

    /// Focused window query for the selected detail channel
    pub fn detail(&self) -> Option<(usize, Vec<EnrichedRow>)> {
        let channel = self.detail?;
        Some((channel, self.snapshot().window(channel, self.window)))
    }

    /// Queue an address change for a channel
    ///
    /// Returns `false` if the scheduler has already stopped.
    pub fn set_address(&self, channel: usize, address: Option<String>) -> bool {
        self.commands
            .send(SchedulerCommand::SetAddress { channel, address })
            .is_ok()
    }

    /// Ask the scheduler to stop after its current read
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}
