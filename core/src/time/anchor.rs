//! Per-boot synchronization anchors
//!
//! Persisted as `{"boots":[{"boot_seq":5,"ntp_sync_time":...,"sync_uptime_ms":...}]}`
//! in insertion order, oldest first.

use alloc::vec::Vec;

use hal_abstractions::Storage;
use serde::{Deserialize, Serialize};

pub const ANCHOR_PATH: &str = "/data/ntp_history.json";

/// Calendar time and uptime captured at one successful sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncAnchor {
    pub boot_seq: u32,
    /// Unix seconds at the moment of sync
    pub ntp_sync_time: u64,
    pub sync_uptime_ms: u64,
}

impl SyncAnchor {
    /// Calendar seconds for an uptime stamp from the same boot
    pub fn unix_at(&self, uptime_ms: u64) -> u64 {
        let delta_ms = uptime_ms as i128 - self.sync_uptime_ms as i128;
        let secs = self.ntp_sync_time as i128 + delta_ms.div_euclid(1000);
        secs.clamp(0, u64::MAX as i128) as u64
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    boots: Vec<SyncAnchor>,
}

/// Bounded, persisted anchor list keyed by boot generation
#[derive(Debug)]
pub struct AnchorHistory<S> {
    storage: S,
    anchors: Vec<SyncAnchor>,
    max: usize,
}

impl<S: Storage> AnchorHistory<S> {
    /// Load the persisted history; anything unreadable starts empty
    pub fn load(mut storage: S, max: usize) -> Self {
        let mut raw = Vec::new();
        let mut anchors = match storage.read(ANCHOR_PATH, &mut raw) {
            Ok(true) => match serde_json::from_slice::<HistoryFile>(&raw) {
                Ok(file) => file.boots,
                Err(_) => {
                    warn!("Anchor history corrupt, reinitializing");
                    Vec::new()
                }
            },
            Ok(false) => Vec::new(),
            Err(_) => {
                warn!("Anchor history unreadable, starting empty");
                Vec::new()
            }
        };

        let max = max.max(1);
        if anchors.len() > max {
            anchors.drain(..anchors.len() - max);
        }
        debug!("Loaded {} sync anchors", anchors.len());

        Self {
            storage,
            anchors,
            max,
        }
    }

    /// Insert or replace the anchor for `anchor.boot_seq`, then persist
    ///
    /// Returns `false` if the history could not be written; the in-memory
    /// copy is updated either way.
    pub fn upsert(&mut self, anchor: SyncAnchor) -> bool {
        match self
            .anchors
            .iter_mut()
            .find(|a| a.boot_seq == anchor.boot_seq)
        {
            Some(existing) => *existing = anchor,
            None => {
                self.anchors.push(anchor);
                if self.anchors.len() > self.max {
                    let evicted = self.anchors.remove(0);
                    debug!("Evicted anchor for boot {}", evicted.boot_seq);
                }
            }
        }
        self.persist()
    }

    pub fn get(&self, boot_seq: u32) -> Option<SyncAnchor> {
        self.anchors.iter().find(|a| a.boot_seq == boot_seq).copied()
    }

    /// Oldest first
    pub fn anchors(&self) -> &[SyncAnchor] {
        &self.anchors
    }

    fn persist(&mut self) -> bool {
        let file = HistoryFile {
            boots: self.anchors.clone(),
        };
        let Ok(bytes) = serde_json::to_vec(&file) else {
            return false;
        };
        if self.storage.write(ANCHOR_PATH, &bytes).is_err() {
            warn!("Failed to persist anchor history");
            return false;
        }
        true
    }
}
