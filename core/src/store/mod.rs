//! Log Store: the on-flash event ledger
//!
//! Append-only JSON-lines file at [`LEDGER_PATH`]. Each record carries the
//! boot generation, a per-boot sequence number, the uptime at which it was
//! written and a resource snapshot; calendar time is attached later by the
//! shipper. The ledger is rotated before it can fill the filesystem.
//!
//! All file access happens under one [`Mutex`] acquired with a bounded wait.
//! A caller that cannot get the lock in time loses that write rather than
//! stalling.

mod boot;
mod record;
mod rotation;

pub use boot::BOOT_COUNTER_PATH;
pub use record::{
    char_prefix, truncate_message, EventRecord, Level, Peeked, ResourceSnapshot,
    MAX_MESSAGE_BYTES,
};
pub use rotation::{prune_oldest, threshold_bytes, Pruned};

use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};
use hal_abstractions::{Platform, ResourceProbe, Storage, StorageUsage, Uptime};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LockTimeout};

/// Active ledger file
pub const LEDGER_PATH: &str = "/data/active.log";

/// How much of the ledger head a peek reads
///
/// Any record line fits well inside; a longer first line is corrupt.
pub const HEAD_READ_BYTES: usize = 4096;

struct Inner<S> {
    storage: S,
    next_seq: u32,
}

/// Durable, boot-sequenced event ledger
pub struct LogStore<M: RawMutex, P: Platform> {
    inner: Mutex<M, Inner<P::Storage>>,
    /// Last filesystem usage seen, for snapshots taken without the lock
    usage: BlockingMutex<M, Cell<StorageUsage>>,
    uptime: P::Uptime,
    probe: P::Probe,
    boot_seq: u32,
    config: LedgerConfig,
}

impl<M: RawMutex, P: Platform> LogStore<M, P> {
    /// Start a new boot generation and record the startup entry
    pub fn open(
        mut storage: P::Storage,
        uptime: P::Uptime,
        probe: P::Probe,
        config: LedgerConfig,
    ) -> Self {
        let boot_seq = boot::advance(&mut storage);
        let usage = storage.usage().unwrap_or_default();

        let store = Self {
            inner: Mutex::new(Inner {
                storage,
                next_seq: 0,
            }),
            usage: BlockingMutex::new(Cell::new(usage)),
            uptime,
            probe,
            boot_seq,
            config,
        };

        // Nobody else can hold the lock yet
        if let Ok(mut inner) = store.inner.try_lock() {
            let msg = format!("Logger initialized, boot_seq={}", boot_seq);
            if store.commit(&mut inner, Level::Info, &msg).is_err() {
                warn!("Startup record not written");
            }
        }

        store
    }

    /// Current boot generation
    pub fn boot_seq(&self) -> u32 {
        self.boot_seq
    }

    pub fn uptime_ms(&self) -> u64 {
        self.uptime.uptime_ms()
    }

    /// Resource figures as of now, with the last known filesystem usage
    pub fn snapshot(&self) -> ResourceSnapshot {
        let usage = self.usage.lock(|u| u.get());
        ResourceSnapshot::new(self.probe.sample(), usage)
    }

    /// Record an event
    ///
    /// Messages longer than [`MAX_MESSAGE_BYTES`] are cut on a character
    /// boundary and followed by one error record describing the cut.
    pub async fn append(&self, level: Level, msg: &str) -> Result<(), LedgerError> {
        let (kept, truncated) = truncate_message(msg, MAX_MESSAGE_BYTES);
        self.write(level, kept).await?;

        if truncated {
            let note = format!(
                "Log entry truncated ({} bytes), sample: {}...",
                msg.len(),
                char_prefix(msg, 60)
            );
            // The note is short enough that it can never be truncated itself
            self.write(Level::Error, &note).await?;
        }
        Ok(())
    }

    /// Format and record an event
    pub async fn append_fmt(&self, level: Level, args: fmt::Arguments<'_>) -> Result<(), LedgerError> {
        match args.as_str() {
            Some(s) => self.append(level, s).await,
            None => self.append(level, &alloc::fmt::format(args)).await,
        }
    }

    pub async fn debug(&self, msg: &str) -> Result<(), LedgerError> {
        self.append(Level::Debug, msg).await
    }

    pub async fn info(&self, msg: &str) -> Result<(), LedgerError> {
        self.append(Level::Info, msg).await
    }

    pub async fn warning(&self, msg: &str) -> Result<(), LedgerError> {
        self.append(Level::Warning, msg).await
    }

    pub async fn error(&self, msg: &str) -> Result<(), LedgerError> {
        self.append(Level::Error, msg).await
    }

    /// First record in the ledger, left in place
    ///
    /// Only the first [`HEAD_READ_BYTES`] of the file are read.
    pub async fn peek_oldest(&self) -> Result<Option<Peeked>, LedgerError> {
        let mut inner = self.lock().await?;
        let mut head = Vec::new();
        match inner.storage.read_prefix(LEDGER_PATH, HEAD_READ_BYTES, &mut head) {
            Ok(true) => Ok(head_entry(&head)),
            Ok(false) => Ok(None),
            Err(_) => {
                warn!("Ledger unreadable");
                Err(LedgerError::Storage)
            }
        }
    }

    /// Remove the first record, but only while it is still `expected`
    ///
    /// Rotation can drop the head between a peek and this call; in that case
    /// nothing is removed and `Ok(false)` is returned.
    pub async fn delete_oldest_if(&self, expected: &Peeked) -> Result<bool, LedgerError> {
        let mut inner = match self.lock().await {
            Ok(inner) => inner,
            Err(e) => {
                warn!("Ledger lock timeout, delete skipped");
                return Err(e.into());
            }
        };

        let mut raw = Vec::new();
        match inner.storage.read(LEDGER_PATH, &mut raw) {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(_) => {
                warn!("Ledger unreadable, delete skipped");
                return Err(LedgerError::Storage);
            }
        }
        if !head_entry(&raw).is_some_and(|head| head.same_entry(expected)) {
            debug!("Ledger head moved, nothing deleted");
            return Ok(false);
        }

        let end = first_line_end(&raw);
        if inner.storage.write(LEDGER_PATH, &raw[end..]).is_err() {
            warn!("Ledger rewrite failed, record kept");
            return Err(LedgerError::Storage);
        }
        Ok(true)
    }

    async fn lock(&self) -> Result<MutexGuard<'_, M, Inner<P::Storage>>, LockTimeout> {
        with_timeout(
            Duration::from_millis(self.config.lock_timeout_ms),
            self.inner.lock(),
        )
        .await
        .map_err(|_| LockTimeout)
    }

    async fn write(&self, level: Level, msg: &str) -> Result<(), LedgerError> {
        let mut inner = match self.lock().await {
            Ok(inner) => inner,
            Err(e) => {
                warn!("Ledger lock timeout, dropping: {}", msg);
                return Err(e.into());
            }
        };
        self.commit(&mut inner, level, msg)
    }

    /// Append one record with the lock held; the sequence number is only
    /// consumed once the line is on flash
    fn commit(
        &self,
        inner: &mut Inner<P::Storage>,
        level: Level,
        msg: &str,
    ) -> Result<(), LedgerError> {
        let usage = self.refresh_usage(&mut inner.storage);
        let record = EventRecord {
            boot_seq: self.boot_seq,
            uptime_ms: self.uptime.uptime_ms(),
            seq: inner.next_seq,
            level,
            msg: msg.to_string(),
            system: ResourceSnapshot::new(
                self.probe.sample(),
                usage.unwrap_or_else(|| self.usage.lock(|u| u.get())),
            ),
        };

        let line = record.to_line()?;
        if inner.storage.append(LEDGER_PATH, &line).is_err() {
            warn!("Ledger append failed, dropping: {}", msg);
            return Err(LedgerError::Storage);
        }
        inner.next_seq = inner.next_seq.wrapping_add(1);

        echo(&record);
        match usage {
            Some(usage) => self.rotate_if_needed(&mut inner.storage, usage.total_bytes),
            None => debug!("Filesystem usage unavailable, rotation check skipped"),
        }
        Ok(())
    }

    /// Current filesystem usage, `None` when the filesystem cannot say
    fn refresh_usage(&self, storage: &mut P::Storage) -> Option<StorageUsage> {
        let usage = storage.usage().ok()?;
        self.usage.lock(|u| u.set(usage));
        Some(usage)
    }

    fn rotate_if_needed(&self, storage: &mut P::Storage, total_bytes: u32) {
        // A filesystem reporting no capacity gives no threshold to rotate at
        if total_bytes == 0 {
            return;
        }
        let threshold = threshold_bytes(total_bytes, self.config.rotation_threshold_pct);
        let size = match storage.file_size(LEDGER_PATH) {
            Ok(Some(size)) => size,
            _ => return,
        };
        if size <= threshold {
            return;
        }

        let target = threshold / 2;
        info!(
            "Ledger size {} exceeds threshold {}, pruning to {}",
            size, threshold, target
        );

        let mut raw = Vec::new();
        if !matches!(storage.read(LEDGER_PATH, &mut raw), Ok(true)) {
            warn!("Ledger unreadable, rotation skipped");
            return;
        }
        let Some(pruned) = prune_oldest(&raw, target as usize) else {
            return;
        };
        if storage.write(LEDGER_PATH, &pruned.contents).is_err() {
            warn!("Ledger rewrite failed, rotation skipped");
            return;
        }
        info!(
            "Rotated ledger: pruned {} entries, freed {} bytes",
            pruned.lines_dropped, pruned.bytes_freed
        );
        self.refresh_usage(storage);
    }
}

/// First non-empty line within the first [`HEAD_READ_BYTES`] of `ledger`
///
/// `ledger` may be the whole file or just its head; both give the same
/// answer.
fn head_entry(ledger: &[u8]) -> Option<Peeked> {
    let window = &ledger[..ledger.len().min(HEAD_READ_BYTES)];
    let line = window.split(|&b| b == b'\n').find(|l| !l.is_empty())?;
    Some(match EventRecord::from_line(line) {
        Some(record) => Peeked::Record(record),
        None => Peeked::Corrupt(String::from_utf8_lossy(line).into_owned()),
    })
}

/// Offset just past the first non-empty line and its newline
fn first_line_end(ledger: &[u8]) -> usize {
    let mut offset = 0;
    for line in ledger.split_inclusive(|&b| b == b'\n') {
        offset += line.len();
        if !matches!(line, [] | [b'\n']) {
            break;
        }
    }
    offset
}

fn echo(record: &EventRecord) {
    let msg = record.msg.as_str();
    match record.level {
        Level::Debug => debug!("[{}] {}", record.seq, msg),
        Level::Info => info!("[{}] {}", record.seq, msg),
        Level::Warning => warn!("[{}] {}", record.seq, msg),
        Level::Error => error!("[{}] {}", record.seq, msg),
    }
}
