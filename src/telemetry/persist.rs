//! # Snapshot Persistence
//!
//! One JSON Lines file per channel (`channel_1.jsonl` .. `channel_N.jsonl`),
//! each line a serialized [`EnrichedRow`].
//!
//! Saving rewrites every channel file through a temporary file and a rename,
//! so a crash mid-write never leaves a truncated snapshot behind. Loading is
//! best-effort per channel: a missing or corrupt file leaves that channel
//! empty and does not affect the others.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::snapshot::StoreSnapshot;
use super::store::ChannelStore;
use super::types::EnrichedRow;
use crate::error::Result;

/// Directory holding the per-channel snapshot files
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

impl SnapshotDir {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot file of a 0-based channel index (files are numbered from 1)
    pub fn channel_path(&self, channel: usize) -> PathBuf {
        self.root.join(format!("channel_{}.jsonl", channel + 1))
    }

    /// Write every channel's full series.
    ///
    /// All channels are attempted even if one fails; the first failure is
    /// returned after the rest have been written.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or a file cannot be
    /// written.
    pub fn save(&self, store: &ChannelStore) -> Result<()> {
        self.save_series(store.all_series())
    }

    /// [`SnapshotDir::save`] from a published snapshot, for use off the
    /// scheduler task.
    pub fn save_snapshot(&self, snapshot: &StoreSnapshot) -> Result<()> {
        self.save_series(snapshot.all_series())
    }

    fn save_series(&self, series: &[Vec<EnrichedRow>]) -> Result<()> {
        fs::create_dir_all(&self.root)?;

        let mut first_error = None;
        for (channel, rows) in series.iter().enumerate() {
            if let Err(e) = self.save_channel(channel, rows) {
                warn!("Failed to save snapshot for channel {}: {}", channel + 1, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Saved {} channel snapshots to {}", series.len(), self.root.display());
                Ok(())
            }
        }
    }

    fn save_channel(&self, channel: usize, rows: &[EnrichedRow]) -> Result<()> {
        let path = self.channel_path(channel);
        let tmp = path.with_extension("jsonl.tmp");

        let mut writer = BufWriter::new(File::create(&tmp)?);
        for row in rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Restore a store with `channel_count` channels.
    ///
    /// Never fails: unreadable channels start empty.
    pub fn load(&self, channel_count: usize) -> ChannelStore {
        let series: Vec<Vec<EnrichedRow>> = (0..channel_count)
            .map(|channel| self.load_channel(channel))
            .collect();

        let restored: usize = series.iter().map(Vec::len).sum();
        info!(
            "Restored {} rows for {} channels from {}",
            restored,
            channel_count,
            self.root.display()
        );
        ChannelStore::from_series(series)
    }

    fn load_channel(&self, channel: usize) -> Vec<EnrichedRow> {
        let path = self.channel_path(channel);
        if !path.exists() {
            debug!("No snapshot for channel {} at {}", channel + 1, path.display());
            return Vec::new();
        }

        match read_rows(&path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(
                    "Discarding unreadable snapshot for channel {} ({}): {}",
                    channel + 1,
                    path.display(),
                    e
                );
                Vec::new()
            }
        }
    }
}

fn read_rows(path: &Path) -> Result<Vec<EnrichedRow>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RawSample;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn filled_store() -> ChannelStore {
        let base = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();
        let mut store = ChannelStore::new(3);
        for step in 0..5 {
            store.begin_cycle();
            store.append(
                0,
                RawSample {
                    timestamp: base + TimeDelta::milliseconds(60_123 * step),
                    temperature: 20.0 + 0.1 * step as f64,
                    voltage: 12.0 + 1.0 / 3.0 * step as f64,
                    current: -0.7 * step as f64,
                },
            );
            store.append(
                2,
                RawSample {
                    timestamp: base + TimeDelta::milliseconds(60_456 * step),
                    temperature: -50.0,
                    voltage: 11.9 + 0.07 * step as f64,
                    current: 9.99,
                },
            );
            store.end_cycle();
        }
        store
    }

    #[test]
    fn test_round_trip_reproduces_series() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        let store = filled_store();

        snapshots.save(&store).unwrap();
        let restored = snapshots.load(3);

        assert_eq!(restored.channel_count(), 3);
        for channel in 0..3 {
            assert_eq!(restored.series(channel), store.series(channel));
        }
        for (a, b) in restored.series(0).iter().zip(store.series(0)) {
            assert_eq!(a.voltage.to_bits(), b.voltage.to_bits());
            assert_eq!(a.current.to_bits(), b.current.to_bits());
        }
    }

    #[test]
    fn test_save_snapshot_matches_store() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        let store = filled_store();

        snapshots.save_snapshot(&store.snapshot(5)).unwrap();
        let restored = snapshots.load(3);
        for channel in 0..3 {
            assert_eq!(restored.series(channel), store.series(channel));
        }
    }

    #[test]
    fn test_files_are_numbered_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        snapshots.save(&filled_store()).unwrap();

        assert!(dir.path().join("channel_1.jsonl").exists());
        assert!(dir.path().join("channel_2.jsonl").exists());
        assert!(dir.path().join("channel_3.jsonl").exists());
        assert!(!dir.path().join("channel_0.jsonl").exists());
        assert!(!dir.path().join("channel_1.jsonl.tmp").exists());
    }

    #[test]
    fn test_empty_channel_written_as_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        snapshots.save(&filled_store()).unwrap();

        let contents = fs::read_to_string(snapshots.channel_path(1)).unwrap();
        assert!(contents.is_empty());
    }

    #[test]
    fn test_load_missing_directory_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path().join("never-created"));
        let store = snapshots.load(9);

        assert_eq!(store.channel_count(), 9);
        assert!(store.all_series().iter().all(Vec::is_empty));
    }

    #[test]
    fn test_corrupt_channel_does_not_affect_others() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        let store = filled_store();
        snapshots.save(&store).unwrap();

        // Garble channel 1's file halfway through
        let path = snapshots.channel_path(0);
        let mut contents = fs::read_to_string(&path).unwrap();
        contents.push_str("{\"timestamp\": not json\n");
        fs::write(&path, contents).unwrap();

        let restored = snapshots.load(3);
        assert!(restored.series(0).is_empty());
        assert_eq!(restored.series(2), store.series(2));
    }

    #[test]
    fn test_load_more_channels_than_saved() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        snapshots.save(&filled_store()).unwrap();

        let restored = snapshots.load(5);
        assert_eq!(restored.channel_count(), 5);
        assert_eq!(restored.series(0).len(), 5);
        assert!(restored.series(4).is_empty());
    }

    #[test]
    fn test_unknown_temperature_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotDir::new(dir.path());
        let mut store = ChannelStore::new(1);
        store.append(0, RawSample::now(-50.0, 12.2, 0.0));
        snapshots.save(&store).unwrap();

        let restored = snapshots.load(1);
        assert_eq!(restored.series(0)[0].temperature, None);
    }
}
