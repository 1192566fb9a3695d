//! Flash filesystem access
//!
//! Whole-file operations for the small JSON documents, plus a bounded head
//! read so the JSON-lines ledger can be inspected without loading all of it.

use alloc::vec::Vec;

/// Filesystem capacity figures in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageUsage {
    pub total_bytes: u32,
    pub used_bytes: u32,
}

impl StorageUsage {
    pub fn free_bytes(&self) -> u32 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Flash filesystem (SPIFFS, littlefs, ...)
pub trait Storage {
    type Error: core::fmt::Debug;

    /// Read a whole file into `buf`, replacing its contents
    ///
    /// Returns `Ok(false)` when the file does not exist.
    fn read(&mut self, path: &str, buf: &mut Vec<u8>) -> Result<bool, Self::Error>;

    /// Read at most the first `max` bytes of `path` into `buf`, replacing
    /// its contents
    ///
    /// Returns `Ok(false)` when the file does not exist.
    fn read_prefix(
        &mut self,
        path: &str,
        max: usize,
        buf: &mut Vec<u8>,
    ) -> Result<bool, Self::Error>;

    /// Create or truncate `path` and write `data`
    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Append `data` to `path`, creating it if missing
    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Size of `path` in bytes, `None` if it does not exist
    fn file_size(&mut self, path: &str) -> Result<Option<u32>, Self::Error>;

    /// Filesystem-wide capacity and usage
    fn usage(&mut self) -> Result<StorageUsage, Self::Error>;
}
