//! Ledger line format
//!
//! One [`EventRecord`] per line of `/data/active.log`:
//!
//! ```json
//! {"boot_seq":5,"uptime_ms":1200,"seq":0,"level":"info","msg":"...",
//!  "system":{"heap_free":180000,"heap_used":140000,"free_psram":4194304,
//!            "task_count":7,"storage_free":900000,"storage_used":100000}}
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use hal_abstractions::{MemoryStats, StorageUsage};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Longest message stored verbatim, in bytes
pub const MAX_MESSAGE_BYTES: usize = 512;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

/// System figures captured when a record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub heap_free: u32,
    pub heap_used: u32,
    #[serde(rename = "free_psram")]
    pub psram_free: u32,
    pub task_count: u32,
    pub storage_free: u32,
    pub storage_used: u32,
}

impl ResourceSnapshot {
    pub fn new(memory: MemoryStats, storage: StorageUsage) -> Self {
        Self {
            heap_free: memory.heap_free,
            heap_used: memory.heap_used,
            psram_free: memory.psram_free,
            task_count: memory.task_count,
            storage_free: storage.free_bytes(),
            storage_used: storage.used_bytes,
        }
    }
}

/// One ledger entry, immutable once written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub boot_seq: u32,
    pub uptime_ms: u64,
    pub seq: u32,
    pub level: Level,
    pub msg: String,
    pub system: ResourceSnapshot,
}

impl EventRecord {
    /// Serialize as one newline-terminated ledger line
    pub fn to_line(&self) -> Result<Vec<u8>, LedgerError> {
        let mut line = serde_json::to_vec(self).map_err(|_| LedgerError::Encode)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Parse one ledger line (without its newline)
    pub fn from_line(line: &[u8]) -> Option<Self> {
        serde_json::from_slice(line).ok()
    }
}

/// Result of peeking at the head of the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peeked {
    /// A well-formed record
    Record(EventRecord),
    /// A line that failed to parse, lossily decoded
    Corrupt(String),
}

impl Peeked {
    /// Whether both views describe the same ledger line
    ///
    /// Records match on `(boot_seq, seq)`, corrupt lines on their text.
    pub fn same_entry(&self, other: &Peeked) -> bool {
        match (self, other) {
            (Self::Record(a), Self::Record(b)) => (a.boot_seq, a.seq) == (b.boot_seq, b.seq),
            (Self::Corrupt(a), Self::Corrupt(b)) => a == b,
            _ => false,
        }
    }
}

/// Cut `msg` to at most `max` bytes without splitting a character
///
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_message(msg: &str, max: usize) -> (&str, bool) {
    if msg.len() <= max {
        return (msg, false);
    }
    let mut end = max;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    (&msg[..end], true)
}

/// First `max_chars` characters of `msg`
pub fn char_prefix(msg: &str, max_chars: usize) -> &str {
    match msg.char_indices().nth(max_chars) {
        Some((idx, _)) => &msg[..idx],
        None => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventRecord {
        EventRecord {
            boot_seq: 5,
            uptime_ms: 1200,
            seq: 3,
            level: Level::Warning,
            msg: "Pump pressure low".into(),
            system: ResourceSnapshot {
                heap_free: 1,
                heap_used: 2,
                psram_free: 3,
                task_count: 4,
                storage_free: 5,
                storage_used: 6,
            },
        }
    }

    #[test]
    fn line_uses_ledger_field_names() {
        let line = sample().to_line().unwrap();
        let text = core::str::from_utf8(&line).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);
        assert!(text.contains("\"level\":\"warning\""));
        assert!(text.contains("\"free_psram\":3"));
        assert!(text.contains("\"storage_used\":6"));
        assert!(!text.contains("psram_free"));
    }

    #[test]
    fn parses_back_what_it_writes() {
        let record = sample();
        let line = record.to_line().unwrap();
        assert_eq!(EventRecord::from_line(&line[..line.len() - 1]), Some(record));
    }

    #[test]
    fn entries_match_on_generation_and_sequence() {
        let record = sample();
        let mut resent = record.clone();
        resent.uptime_ms += 10;
        let mut next = record.clone();
        next.seq += 1;

        let head = Peeked::Record(record);
        assert!(head.same_entry(&Peeked::Record(resent)));
        assert!(!head.same_entry(&Peeked::Record(next)));
        assert!(!head.same_entry(&Peeked::Corrupt("{oops".into())));
        assert!(Peeked::Corrupt("{oops".into()).same_entry(&Peeked::Corrupt("{oops".into())));
    }

    #[test]
    fn rejects_garbage_and_unknown_levels() {
        assert_eq!(EventRecord::from_line(b"{\"boot_seq\":1,"), None);
        assert_eq!(EventRecord::from_line(b"\xff\xfe"), None);
        let bad_level = br#"{"boot_seq":1,"uptime_ms":0,"seq":0,"level":"fatal","msg":"",
            "system":{"heap_free":0,"heap_used":0,"free_psram":0,"task_count":0,
            "storage_free":0,"storage_used":0}}"#;
        assert_eq!(EventRecord::from_line(bad_level), None);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_message("short", 512), ("short", false));

        let ascii = "a".repeat(600);
        let (kept, cut) = truncate_message(&ascii, 512);
        assert!(cut);
        assert_eq!(kept.len(), 512);

        // 'é' is two bytes; 512 lands mid-character at an odd offset
        let accented = alloc::format!("x{}", "é".repeat(300));
        let (kept, cut) = truncate_message(&accented, 512);
        assert!(cut);
        assert_eq!(kept.len(), 511);
        assert!(accented.starts_with(kept));
    }

    #[test]
    fn char_prefix_counts_characters() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("hi", 60), "hi");
    }
}
