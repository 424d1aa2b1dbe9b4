//! # Battery Monitor Library
//!
//! Poll a small fleet of battery-pack sensors over their wireless serial links.
//!
//! This library provides the sampling pipeline behind the dashboard: channel
//! readers, derivation of state of charge and charge ceiling, the rolling
//! per-channel store with in-cycle temperature fallback, snapshot files, and
//! the periodic cycle scheduler that hands immutable snapshots to the
//! presentation side.

pub mod config;
pub mod error;
pub mod reader;
pub mod scheduler;
pub mod telemetry;
