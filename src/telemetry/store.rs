//! # Channel Store
//!
//! Owns one insertion-ordered [`EnrichedRow`] series per channel.
//!
//! Mutations are bracketed by [`ChannelStore::begin_cycle`] and
//! [`ChannelStore::end_cycle`]. Within a cycle the first known temperature
//! appended (in call order) is remembered; at the end of the cycle it is
//! written into the row of every channel that was appended this cycle with an
//! unknown temperature. Channels that received nothing this cycle are never
//! touched.
//!
//! ## Usage
//!
//! ```
//! use battery_monitor::telemetry::{ChannelStore, RawSample};
//!
//! let mut store = ChannelStore::new(2);
//! store.begin_cycle();
//! store.append(0, RawSample::now(21.5, 12.6, 3.0));
//! store.append(1, RawSample::now(-50.0, 12.7, 3.1));
//! let summary = store.end_cycle();
//!
//! assert_eq!(summary.backfilled, 1);
//! assert_eq!(store.series(1)[0].temperature, Some(21.5));
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::derive::derive;
use super::snapshot::StoreSnapshot;
use super::types::{EnrichedRow, RawSample};

/// Cycle-scoped bookkeeping, reset by `begin_cycle`
#[derive(Debug, Default)]
struct CycleState {
    /// First known temperature seen this cycle
    fallback_temperature: Option<f64>,

    /// Which channels received a row this cycle
    appended: Vec<bool>,

    started_at: Option<DateTime<Utc>>,
}

/// What `end_cycle` did
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CycleSummary {
    /// Channels that received a row this cycle
    pub appended: usize,

    /// Rows whose unknown temperature was replaced by the fallback
    pub backfilled: usize,

    /// Temperature used for back-filling, if any channel had one
    pub fallback_temperature: Option<f64>,

    /// Rows dropped by retention
    pub pruned: usize,
}

/// Per-channel rolling series with cycle-scoped temperature fallback
#[derive(Debug)]
pub struct ChannelStore {
    series: Vec<Vec<EnrichedRow>>,
    cycle: CycleState,
    retention: Option<TimeDelta>,
}

impl ChannelStore {
    /// Creates a store with `channel_count` empty series and no retention limit.
    #[must_use]
    pub fn new(channel_count: usize) -> Self {
        Self::from_series(vec![Vec::new(); channel_count])
    }

    /// Creates a store from previously restored series.
    #[must_use]
    pub fn from_series(series: Vec<Vec<EnrichedRow>>) -> Self {
        let channel_count = series.len();
        Self {
            series,
            cycle: CycleState {
                appended: vec![false; channel_count],
                ..CycleState::default()
            },
            retention: None,
        }
    }

    /// Drop rows older than `retention` at the end of every cycle.
    ///
    /// `None` keeps the full history in memory.
    #[must_use]
    pub fn with_retention(mut self, retention: Option<TimeDelta>) -> Self {
        self.retention = retention;
        self
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.series.len()
    }

    /// Full series for a channel, in insertion order
    ///
    /// # Panics
    ///
    /// Panics if `channel` is out of range.
    pub fn series(&self, channel: usize) -> &[EnrichedRow] {
        &self.series[channel]
    }

    /// All series, indexed by channel
    pub fn all_series(&self) -> &[Vec<EnrichedRow>] {
        &self.series
    }

    /// Start a new polling cycle, forgetting the previous cycle's fallback.
    pub fn begin_cycle(&mut self) {
        self.cycle.fallback_temperature = None;
        self.cycle.appended.iter_mut().for_each(|flag| *flag = false);
        self.cycle.started_at = Some(Utc::now());
    }

    /// Derive and append one sample to a channel's series.
    ///
    /// An out-of-range channel is a programming error: it asserts in debug
    /// builds and is logged and ignored otherwise.
    pub fn append(&mut self, channel: usize, raw: RawSample) {
        debug_assert!(
            channel < self.series.len(),
            "channel {} out of range ({} channels)",
            channel,
            self.series.len()
        );
        let Some(series) = self.series.get_mut(channel) else {
            warn!("Ignoring sample for unknown channel {}", channel);
            return;
        };

        let row = derive(&raw);
        if let Some(temperature) = row.temperature {
            Self::record_cycle_temperature(&mut self.cycle, temperature);
        }
        debug!(
            "Channel {}: {:.2} V, {:.2} A, temperature {:?}, capacity {}%",
            channel + 1,
            row.voltage,
            row.current,
            row.temperature,
            row.capacity_percent
        );
        series.push(row);
        self.cycle.appended[channel] = true;
    }

    /// First known temperature of the cycle wins.
    fn record_cycle_temperature(cycle: &mut CycleState, temperature: f64) {
        if cycle.fallback_temperature.is_none() {
            cycle.fallback_temperature = Some(temperature);
        }
    }

    /// Finish the cycle: back-fill unknown temperatures, then apply retention.
    pub fn end_cycle(&mut self) -> CycleSummary {
        let mut summary = CycleSummary {
            fallback_temperature: self.cycle.fallback_temperature,
            ..CycleSummary::default()
        };

        for (series, &appended) in self.series.iter_mut().zip(&self.cycle.appended) {
            if !appended {
                continue;
            }
            summary.appended += 1;

            let Some(fallback) = self.cycle.fallback_temperature else {
                continue;
            };
            if let Some(last) = series.last_mut() {
                if last.temperature.is_none() {
                    last.temperature = Some(fallback);
                    summary.backfilled += 1;
                }
            }
        }

        if let Some(retention) = self.retention {
            let now = self.cycle.started_at.unwrap_or_else(Utc::now);
            summary.pruned = self.prune_older_than(cutoff(now, retention));
        }

        summary
    }

    /// Remove rows at or before `cutoff`, returning how many were removed.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        self.series
            .iter_mut()
            .map(|series| {
                let before = series.len();
                series.retain(|row| row.timestamp > cutoff);
                before - series.len()
            })
            .sum()
    }

    /// Rows of a channel newer than `now - duration`, in insertion order.
    ///
    /// Returns an empty vector for an unknown channel.
    pub fn window(&self, channel: usize, duration: TimeDelta) -> Vec<EnrichedRow> {
        self.window_at(channel, duration, Utc::now())
    }

    /// [`ChannelStore::window`] against an explicit "now".
    pub fn window_at(&self, channel: usize, duration: TimeDelta, now: DateTime<Utc>) -> Vec<EnrichedRow> {
        self.series
            .get(channel)
            .map(|rows| rows_within(rows, cutoff(now, duration)))
            .unwrap_or_default()
    }

    /// Copy the current series into an immutable snapshot.
    pub fn snapshot(&self, cycle: u64) -> StoreSnapshot {
        StoreSnapshot::new(cycle, Utc::now(), self.series.clone())
    }
}

/// `now - duration`, clamped to the earliest representable instant
pub(crate) fn cutoff(now: DateTime<Utc>, duration: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(duration).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Rows strictly newer than `cutoff`, original order preserved.
pub(crate) fn rows_within(rows: &[EnrichedRow], cutoff: DateTime<Utc>) -> Vec<EnrichedRow> {
    rows.iter().filter(|row| row.timestamp > cutoff).cloned().collect()
}
