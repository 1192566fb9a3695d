//! Capacity-bounded ledger rotation
//!
//! Once the ledger grows past `threshold_pct` of the filesystem, the oldest
//! lines are dropped until it is back to half that mark. Kept lines are
//! copied byte for byte and the newest line always survives.

use alloc::vec::Vec;

/// High-water mark in bytes for a filesystem of `total_bytes`
pub fn threshold_bytes(total_bytes: u32, threshold_pct: u8) -> u32 {
    ((total_bytes as u64 * threshold_pct as u64) / 100) as u32
}

/// Outcome of a pruning pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pruned {
    /// Rewritten ledger contents
    pub contents: Vec<u8>,
    pub lines_dropped: usize,
    pub bytes_freed: usize,
}

/// Drop leading lines of `ledger` until it fits in `target_bytes`
///
/// Empty lines are discarded. Returns `None` when nothing would change.
pub fn prune_oldest(ledger: &[u8], target_bytes: usize) -> Option<Pruned> {
    let lines: Vec<&[u8]> = ledger
        .split_inclusive(|&b| b == b'\n')
        .filter(|line| !matches!(**line, [] | [b'\n']))
        .collect();

    // Every kept line is written back newline-terminated
    let line_len = |line: &[u8]| line.len() + usize::from(line.last() != Some(&b'\n'));
    let current: usize = lines.iter().map(|&l| line_len(l)).sum();
    let excess = current.saturating_sub(target_bytes);

    let mut skip = 0;
    let mut freed = 0;
    while freed < excess && skip < lines.len() {
        freed += line_len(lines[skip]);
        skip += 1;
    }
    if skip >= lines.len() && !lines.is_empty() {
        skip = lines.len() - 1;
        freed -= line_len(lines[skip]);
    }
    if skip == 0 {
        return None;
    }

    let mut contents = Vec::with_capacity(current - freed);
    for line in &lines[skip..] {
        contents.extend_from_slice(line);
        if line.last() != Some(&b'\n') {
            contents.push(b'\n');
        }
    }

    Some(Pruned {
        contents,
        lines_dropped: skip,
        bytes_freed: freed,
    })
}
