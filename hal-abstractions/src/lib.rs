//! Hardware abstraction traits for IoT firmware
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits; the telemetry core only
//! ever talks to them.
//!
//! - **`clock`**: monotonic uptime and the SNTP-fed wall clock
//! - **`network`**: link status and stream connections to the collector
//! - **`storage`**: flash filesystem access
//! - **`system`**: heap/PSRAM/task counters
//! - **`mock`** (feature `mock`): in-memory doubles for host tests

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

extern crate alloc;

pub mod clock;
pub mod network;
pub mod storage;
pub mod system;

#[cfg(feature = "mock")]
pub mod mock;

pub use clock::{Uptime, WallClock};
pub use network::{Connectivity, Connector};
pub use storage::{Storage, StorageUsage};
pub use system::{MemoryStats, ResourceProbe};

/// Bundle of the hardware types one board provides
///
/// Components are generic over a single `Platform` instead of one type
/// parameter per peripheral.
pub trait Platform {
    /// Flash filesystem
    type Storage: Storage;
    /// Millisecond uptime counter, cloned into every component that needs it
    type Uptime: Uptime + Clone;
    /// Calendar clock synchronized over the network
    type Clock: WallClock;
    /// Heap and task statistics
    type Probe: ResourceProbe;
}
