//! Persisted boot generation counter (`{"boot_seq": N}`)

use alloc::vec::Vec;

use hal_abstractions::Storage;
use serde::{Deserialize, Serialize};

pub const BOOT_COUNTER_PATH: &str = "/data/boot_counter.json";

#[derive(Debug, Serialize, Deserialize)]
struct BootCounter {
    boot_seq: u32,
}

/// Read the previous generation, then persist and return the next one
///
/// A missing or unreadable counter counts as generation 0. A failed write
/// is logged; the new generation is still used for this boot.
pub fn advance<S: Storage>(storage: &mut S) -> u32 {
    let mut raw = Vec::new();
    let previous = match storage.read(BOOT_COUNTER_PATH, &mut raw) {
        Ok(true) => match serde_json::from_slice::<BootCounter>(&raw) {
            Ok(counter) => counter.boot_seq,
            Err(_) => {
                warn!("Boot counter corrupt, starting from 0");
                0
            }
        },
        Ok(false) => {
            info!("No boot counter, first boot");
            0
        }
        Err(_) => {
            warn!("Boot counter unreadable, starting from 0");
            0
        }
    };

    let boot_seq = previous.wrapping_add(1);
    let persisted = serde_json::to_vec(&BootCounter { boot_seq })
        .ok()
        .and_then(|bytes| storage.write(BOOT_COUNTER_PATH, &bytes).ok());
    if persisted.is_none() {
        error!("Failed to persist boot counter {}", boot_seq);
    }

    boot_seq
}
