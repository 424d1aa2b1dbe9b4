//! # Store Snapshot
//!
//! Immutable copy of every channel's series, taken after a cycle completes.
//! The presentation side only ever queries snapshots, so it never observes a
//! half-applied cycle.

use chrono::{DateTime, TimeDelta, Utc};

use super::store::{cutoff, rows_within};
use super::types::EnrichedRow;

/// Post-cycle view of the channel store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    cycle: u64,
    taken_at: Option<DateTime<Utc>>,
    series: Vec<Vec<EnrichedRow>>,
}

impl StoreSnapshot {
    pub fn new(cycle: u64, taken_at: DateTime<Utc>, series: Vec<Vec<EnrichedRow>>) -> Self {
        Self {
            cycle,
            taken_at: Some(taken_at),
            series,
        }
    }

    /// Snapshot with `channel_count` empty series, published before the first cycle
    pub fn empty(channel_count: usize) -> Self {
        Self {
            series: vec![Vec::new(); channel_count],
            ..Self::default()
        }
    }

    /// Number of completed cycles when this snapshot was taken (0 = none yet)
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        self.taken_at
    }

    pub fn channel_count(&self) -> usize {
        self.series.len()
    }

    /// Full series of a channel; empty for an unknown channel
    pub fn series(&self, channel: usize) -> &[EnrichedRow] {
        self.series.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_series(&self) -> &[Vec<EnrichedRow>] {
        &self.series
    }

    /// Most recent row of a channel
    pub fn latest(&self, channel: usize) -> Option<&EnrichedRow> {
        self.series(channel).last()
    }

    /// Rows newer than `now - duration`, in insertion order
    pub fn window(&self, channel: usize, duration: TimeDelta) -> Vec<EnrichedRow> {
        self.window_at(channel, duration, Utc::now())
    }

    pub fn window_at(&self, channel: usize, duration: TimeDelta, now: DateTime<Utc>) -> Vec<EnrichedRow> {
        rows_within(self.series(channel), cutoff(now, duration))
    }

    /// Window query for every channel, indexed by channel
    pub fn windows(&self, duration: TimeDelta) -> Vec<Vec<EnrichedRow>> {
        let now = Utc::now();
        (0..self.channel_count())
            .map(|channel| self.window_at(channel, duration, now))
            .collect()
    }
}
