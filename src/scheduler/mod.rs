//! # Cycle Scheduler Module
//!
//! Drives the polling loop.
//!
//! Every period the scheduler:
//! 1. Applies queued commands (address changes)
//! 2. Opens a cycle on the channel store
//! 3. Reads every channel in ascending index order, each within a fixed
//!    time budget; failures and timeouts only cost that channel its sample
//! 4. Closes the cycle (temperature back-fill, retention) and saves snapshots
//!    on the blocking pool
//! 5. Publishes an immutable snapshot to the presentation side
//!
//! The next cycle starts `period - elapsed` after the previous one started, or
//! immediately if the cycle overran its period.

pub mod handle;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::reader::ChannelReader;
use crate::telemetry::persist::SnapshotDir;
use crate::telemetry::{ChannelStore, CycleSummary, StoreSnapshot};

pub use handle::{DashboardHandle, SchedulerCommand};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Timing and persistence settings
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub period: Duration,
    pub read_timeout: Duration,
    pub window: TimeDelta,
    /// Where to save snapshots after each cycle; `None` disables saving
    pub snapshot_dir: Option<PathBuf>,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            period: config.period(),
            read_timeout: config.read_timeout(),
            window: config.window(),
            snapshot_dir: Some(PathBuf::from(&config.storage.data_dir)),
        }
    }
}

/// Outcome of one polling cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// 1-based cycle number
    pub cycle: u64,
    /// Channels whose read failed or timed out
    pub failed: Vec<usize>,
    pub summary: CycleSummary,
    pub elapsed: Duration,
}

/// Delay before the next cycle, given how long the last one took
pub fn next_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Polling loop over all channel readers
pub struct CycleScheduler {
    readers: Vec<Box<dyn ChannelReader>>,
    store: ChannelStore,
    settings: SchedulerSettings,
    snapshots: Option<SnapshotDir>,
    state: SchedulerState,
    cycle: u64,
    publisher: watch::Sender<Arc<StoreSnapshot>>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for CycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleScheduler")
            .field("channels", &self.readers.len())
            .field("state", &self.state)
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

impl CycleScheduler {
    /// Create an idle scheduler and the handle used to observe it
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::ChannelCountMismatch`] if the number of readers
    /// differs from the number of channels in `store`.
    pub fn new(
        readers: Vec<Box<dyn ChannelReader>>,
        store: ChannelStore,
        settings: SchedulerSettings,
    ) -> Result<(Self, DashboardHandle)> {
        if readers.len() != store.channel_count() {
            return Err(MonitorError::ChannelCountMismatch {
                readers: readers.len(),
                channels: store.channel_count(),
            });
        }

        // Restored history is visible before the first cycle completes
        let (publisher, snapshot_rx) = watch::channel(Arc::new(store.snapshot(0)));
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let handle = DashboardHandle::new(snapshot_rx, command_tx, Arc::new(shutdown_tx), settings.window);
        let scheduler = Self {
            readers,
            store,
            snapshots: settings.snapshot_dir.as_ref().map(SnapshotDir::new),
            settings,
            state: SchedulerState::Idle,
            cycle: 0,
            publisher,
            commands,
            shutdown,
        };
        Ok((scheduler, handle))
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn store(&self) -> &ChannelStore {
        &self.store
    }

    /// Run the loop on a background task, returning the scheduler when it stops
    pub fn spawn(mut self) -> JoinHandle<Self> {
        tokio::spawn(async move {
            self.run().await;
            self
        })
    }

    /// Run cycles until stopped through a [`DashboardHandle`]
    ///
    /// The stop flag is checked before each cycle and interrupts the idle wait
    /// between cycles. A read in progress is never interrupted; it finishes or
    /// runs into its time budget first.
    pub async fn run(&mut self) {
        self.state = SchedulerState::Running;
        info!(
            "Polling {} channels every {:?} (read budget {:?})",
            self.readers.len(),
            self.settings.period,
            self.settings.read_timeout
        );

        loop {
            let stop_requested = *self.shutdown.borrow();
            if stop_requested {
                break;
            }

            let started = Instant::now();
            self.run_cycle().await;

            let delay = next_delay(self.settings.period, started.elapsed());
            if delay.is_zero() {
                // No idle wait follows, so look for dropped handles here
                if self.shutdown.has_changed().is_err() {
                    break;
                }
                warn!("Cycle overran its {:?} period, starting next cycle immediately", self.settings.period);
                continue;
            }

            tokio::select! {
                _ = sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    // Every handle dropped: nobody can observe or stop us any more
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state = SchedulerState::Idle;
        info!("Scheduler stopped after {} cycles", self.cycle);
    }

    /// Execute exactly one polling cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.apply_commands();

        let started = Instant::now();
        let cycle = self.cycle + 1;
        debug!("Cycle {}: start read", cycle);

        self.store.begin_cycle();
        let mut failed = Vec::new();
        for (channel, reader) in self.readers.iter_mut().enumerate() {
            match timeout(self.settings.read_timeout, reader.read()).await {
                Ok(Ok(Some(raw))) => self.store.append(channel, raw),
                Ok(Ok(None)) => debug!("Channel {}: no data", channel + 1),
                Ok(Err(e)) => {
                    warn!("Channel {}: read failed: {}", channel + 1, e);
                    failed.push(channel);
                }
                Err(_) => {
                    let e = MonitorError::ReadTimeout(self.settings.read_timeout);
                    warn!("Channel {}: {}", channel + 1, e);
                    failed.push(channel);
                }
            }
        }
        let summary = self.store.end_cycle();
        let snapshot = Arc::new(self.store.snapshot(cycle));

        if let Some(snapshots) = &self.snapshots {
            let dir = snapshots.clone();
            let written = Arc::clone(&snapshot);
            match tokio::task::spawn_blocking(move || dir.save_snapshot(&written)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Snapshot save failed: {}", e),
                Err(e) => warn!("Snapshot save task failed: {}", e),
            }
        }

        self.cycle = cycle;
        self.publisher.send_replace(snapshot);

        let report = CycleReport {
            cycle,
            failed,
            summary,
            elapsed: started.elapsed(),
        };
        info!(
            "Cycle {}: {} samples, {} failed, {} back-filled (fallback {:?}), {} pruned, {:.3}s",
            report.cycle,
            report.summary.appended,
            report.failed.len(),
            report.summary.backfilled,
            report.summary.fallback_temperature,
            report.summary.pruned,
            report.elapsed.as_secs_f64()
        );
        report
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SchedulerCommand::SetAddress { channel, address } => match self.readers.get_mut(channel) {
                    Some(reader) => {
                        info!("Channel {}: address set to {:?}", channel + 1, address);
                        reader.set_address(address);
                    }
                    None => warn!("Ignoring address for unknown channel {}", channel + 1),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::MockChannelReader;
    use crate::telemetry::RawSample;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use tokio_test::assert_ok;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            period: Duration::from_secs(60),
            read_timeout: Duration::from_secs(10),
            window: TimeDelta::hours(12),
            snapshot_dir: None,
        }
    }

    fn reading(temperature: f64) -> MockChannelReader {
        let mut reader = MockChannelReader::new();
        reader
            .expect_read()
            .returning(move || Ok(Some(RawSample::now(temperature, 12.5, 2.0))));
        reader
    }

    fn failing() -> MockChannelReader {
        let mut reader = MockChannelReader::new();
        reader
            .expect_read()
            .returning(|| Err(MonitorError::Transport("connection refused".to_string())));
        reader
    }

    fn scheduler(readers: Vec<MockChannelReader>) -> (CycleScheduler, DashboardHandle) {
        let count = readers.len();
        let readers = readers
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn ChannelReader>)
            .collect();
        CycleScheduler::new(readers, ChannelStore::new(count), settings()).unwrap()
    }

    /// Reader that never answers within any reasonable budget
    struct StalledReader;

    #[async_trait]
    impl ChannelReader for StalledReader {
        async fn read(&mut self) -> Result<Option<RawSample>> {
            sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        fn address(&self) -> Option<String> {
            None
        }

        fn set_address(&mut self, _address: Option<String>) {}
    }

    /// Reader that takes a fixed time to answer
    struct SlowReader {
        delay: Duration,
    }

    #[async_trait]
    impl ChannelReader for SlowReader {
        async fn read(&mut self) -> Result<Option<RawSample>> {
            sleep(self.delay).await;
            Ok(Some(RawSample::now(20.0, 12.5, 2.0)))
        }

        fn address(&self) -> Option<String> {
            None
        }

        fn set_address(&mut self, _address: Option<String>) {}
    }

    fn slow_scheduler(delay: Duration) -> (CycleScheduler, DashboardHandle) {
        let mut settings = settings();
        settings.read_timeout = Duration::from_secs(300);
        let readers: Vec<Box<dyn ChannelReader>> = vec![Box::new(SlowReader { delay })];
        CycleScheduler::new(readers, ChannelStore::new(1), settings).unwrap()
    }

    /// Seconds since `start` at which each of the next `count` snapshots arrived
    async fn publish_times(handle: &mut DashboardHandle, start: Instant, count: usize) -> Vec<u64> {
        let mut times = Vec::with_capacity(count);
        for _ in 0..count {
            assert!(handle.changed().await);
            times.push(start.elapsed().as_secs());
        }
        times
    }

    #[test]
    fn test_next_delay() {
        let period = Duration::from_secs(60);
        assert_eq!(next_delay(period, Duration::from_secs(12)), Duration::from_secs(48));
        assert_eq!(next_delay(period, Duration::from_secs(60)), Duration::ZERO);
        assert_eq!(next_delay(period, Duration::from_secs(75)), Duration::ZERO);
    }

    #[test]
    fn test_channel_count_mismatch() {
        let readers: Vec<Box<dyn ChannelReader>> = vec![Box::new(MockChannelReader::new())];
        match CycleScheduler::new(readers, ChannelStore::new(2), settings()) {
            Err(MonitorError::ChannelCountMismatch { readers, channels }) => {
                assert_eq!(readers, 1);
                assert_eq!(channels, 2);
            }
            other => panic!("Expected ChannelCountMismatch, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_new_scheduler_is_idle() {
        let (scheduler, handle) = scheduler(vec![reading(20.0)]);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.cycles(), 0);
        assert_eq!(handle.snapshot().cycle(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_does_not_abort_cycle() {
        let readers = (0..9)
            .map(|i| if i == 3 { failing() } else { reading(20.0 + i as f64) })
            .collect();
        let (mut scheduler, _handle) = scheduler(readers);

        let report = scheduler.run_cycle().await;

        assert_eq!(report.failed, vec![3]);
        assert_eq!(report.summary.appended, 8);
        for channel in 0..9 {
            let expected = if channel == 3 { 0 } else { 1 };
            assert_eq!(scheduler.store().series(channel).len(), expected, "channel {}", channel);
        }
    }

    #[tokio::test]
    async fn test_first_channel_temperature_is_fallback() {
        let (mut scheduler, _handle) = scheduler(vec![reading(17.0), reading(-50.0), reading(29.0)]);

        let report = scheduler.run_cycle().await;

        assert_eq!(report.summary.fallback_temperature, Some(17.0));
        assert_eq!(scheduler.store().series(1)[0].temperature, Some(17.0));
        assert_eq!(scheduler.store().series(2)[0].temperature, Some(29.0));
    }

    #[tokio::test]
    async fn test_channel_without_data_is_not_a_failure() {
        let mut silent = MockChannelReader::new();
        silent.expect_read().returning(|| Ok(None));
        let (mut scheduler, _handle) = scheduler(vec![silent, reading(21.0)]);

        let report = scheduler.run_cycle().await;
        assert!(report.failed.is_empty());
        assert_eq!(report.summary.appended, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_read_times_out() {
        let readers: Vec<Box<dyn ChannelReader>> = vec![
            Box::new(reading(20.0)),
            Box::new(StalledReader),
            Box::new(reading(-50.0)),
        ];
        let (mut scheduler, _handle) = CycleScheduler::new(readers, ChannelStore::new(3), settings()).unwrap();

        let report = scheduler.run_cycle().await;

        assert_eq!(report.failed, vec![1]);
        assert_eq!(report.summary.appended, 2);
        assert_eq!(scheduler.store().series(2)[0].temperature, Some(20.0));
    }

    #[tokio::test]
    async fn test_cycle_publishes_snapshot() {
        let (mut scheduler, mut handle) = scheduler(vec![reading(20.0), reading(21.0)]);

        scheduler.run_cycle().await;
        assert!(handle.changed().await);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.cycle(), 1);
        assert_eq!(snapshot.series(0).len(), 1);
        assert_eq!(handle.windows().len(), 2);
        assert_eq!(handle.windows()[1].len(), 1);
    }

    #[tokio::test]
    async fn test_detail_query_follows_selection() {
        let (mut scheduler, mut handle) = scheduler(vec![reading(20.0), reading(21.0)]);
        scheduler.run_cycle().await;
        scheduler.run_cycle().await;

        assert!(handle.detail().is_none());

        handle.select_detail(Some(1));
        let (channel, rows) = handle.detail().unwrap();
        assert_eq!(channel, 1);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.temperature == Some(21.0)));

        handle.select_detail(None);
        assert!(handle.detail().is_none());
    }

    #[tokio::test]
    async fn test_set_address_applied_before_next_cycle() {
        let mut reader = reading(20.0);
        reader
            .expect_set_address()
            .with(eq(Some("/dev/rfcomm7".to_string())))
            .times(1)
            .return_const(());
        let (mut scheduler, handle) = scheduler(vec![reader]);

        assert!(handle.set_address(0, Some("/dev/rfcomm7".to_string())));
        // Unknown channel is ignored, not fatal
        assert!(handle.set_address(5, None));

        scheduler.run_cycle().await;
    }

    #[tokio::test]
    async fn test_cycle_saves_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let readers: Vec<Box<dyn ChannelReader>> = vec![Box::new(reading(20.0)), Box::new(failing())];
        let mut settings = settings();
        settings.snapshot_dir = Some(dir.path().to_path_buf());
        let (mut scheduler, _handle) = CycleScheduler::new(readers, ChannelStore::new(2), settings).unwrap();

        scheduler.run_cycle().await;

        let restored = SnapshotDir::new(dir.path()).load(2);
        assert_eq!(restored.series(0), scheduler.store().series(0));
        // Written unconditionally, even for a channel without data
        assert!(dir.path().join("channel_2.jsonl").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let (scheduler, mut handle) = scheduler(vec![reading(20.0)]);
        let task = scheduler.spawn();

        assert!(handle.changed().await);
        assert!(handle.changed().await);
        handle.stop();

        let scheduler = assert_ok!(task.await);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.cycles() >= 2);
        assert_eq!(scheduler.store().series(0).len() as u64, scheduler.cycles());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_keep_fixed_period() {
        let (scheduler, mut handle) = scheduler(vec![reading(20.0)]);
        let start = Instant::now();
        let task = scheduler.spawn();

        for _ in 0..3 {
            assert!(handle.changed().await);
        }
        // Three cycles: at 0s, 60s and 120s
        assert_eq!(start.elapsed().as_secs(), 120);

        handle.stop();
        assert_ok!(task.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycles_do_not_drift() {
        let (scheduler, mut handle) = slow_scheduler(Duration::from_secs(10));
        let start = Instant::now();
        let task = scheduler.spawn();

        // Each cycle takes 10s; the wait shrinks to 50s to keep the 60s period
        assert_eq!(publish_times(&mut handle, start, 3).await, vec![10, 70, 130]);

        handle.stop();
        assert_ok!(task.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_starts_next_cycle_immediately() {
        let (scheduler, mut handle) = slow_scheduler(Duration::from_secs(90));
        let start = Instant::now();
        let task = scheduler.spawn();

        assert_eq!(publish_times(&mut handle, start, 3).await, vec![90, 180, 270]);

        handle.stop();
        let scheduler = assert_ok!(task.await);
        assert_eq!(scheduler.store().series(0).len() as u64, scheduler.cycles());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_overrunning_scheduler() {
        let (scheduler, handle) = slow_scheduler(Duration::from_secs(90));
        let task = scheduler.spawn();
        drop(handle);

        let scheduler = assert_ok!(task.await);
        assert_eq!(scheduler.cycles(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_stops_scheduler() {
        let (scheduler, handle) = scheduler(vec![reading(20.0)]);
        let task = scheduler.spawn();
        drop(handle);

        let scheduler = assert_ok!(task.await);
        assert_eq!(scheduler.cycles(), 1);
    }
}
