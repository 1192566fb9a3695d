//! Platform-agnostic telemetry for IoT firmware
//!
//! Three cooperating components share one controller:
//!
//! - [`store::LogStore`]: durable, append-only ledger of structured events
//!   on the flash filesystem, numbered by boot generation and sequence,
//!   rotated before the filesystem fills up.
//! - [`time::TimeAuthority`]: decides when wall-clock time can be trusted
//!   and records per-boot synchronization anchors so uptime stamps can be
//!   converted to calendar time after the fact.
//! - [`shipper::Shipper`]: store-and-forward delivery of ledger records to
//!   a TCP collector with per-record acknowledgment, backoff, heartbeats
//!   and an inbound command channel.
//!
//! Everything hardware-specific comes in through the `hal-abstractions`
//! traits, so this crate has NO hardware dependencies.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

extern crate alloc;

// Must come first so the log macros are visible to every module below
#[macro_use]
mod fmt;

pub mod calendar;
pub mod config;
pub mod error;
pub mod ring;
pub mod shipper;
pub mod store;
pub mod tasks;
pub mod time;

pub use config::TelemetryConfig;
pub use error::{DeliveryError, LedgerError, LockTimeout};
pub use shipper::{Command, CommandChannel, CycleOutcome, Shipper};
pub use store::{EventRecord, Level, LogStore, Peeked, ResourceSnapshot};
pub use time::{EntryTime, SyncState, TimeAuthority};
