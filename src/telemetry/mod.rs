//! # Telemetry Module
//!
//! Per-channel battery telemetry: the sample model, derived quantities, the
//! rolling per-channel store and its snapshot files.
//!
//! This module handles:
//! - Deriving state of charge and charge-voltage ceiling from raw samples
//! - Keeping one insertion-ordered series per channel
//! - Back-filling unknown temperatures within a polling cycle
//! - Windowed queries and immutable snapshots for the presentation side
//! - Writing and restoring one JSONL snapshot file per channel
//! - Flagging readings against configured thresholds

pub mod types;
pub mod derive;
pub mod store;
pub mod snapshot;
pub mod persist;
pub mod report;

pub use types::{EnrichedRow, RawSample};
pub use store::{ChannelStore, CycleSummary};
pub use snapshot::StoreSnapshot;
