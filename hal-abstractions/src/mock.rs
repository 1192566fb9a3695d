//! In-memory implementations of every HAL trait
//!
//! Each double is a cheap handle around shared state, so a test can keep
//! one clone to drive or inspect the "hardware" while the component under
//! test owns another.

use std::collections::{BTreeMap, VecDeque};
use std::string::{String, ToString};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::vec::Vec;

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use embedded_io::{ErrorKind, ErrorType, ReadReady};
use embedded_io_async::{Read, Write};

use crate::{
    Connectivity, Connector, MemoryStats, Platform, ResourceProbe, Storage, StorageUsage, Uptime,
    WallClock,
};

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// PLATFORM
// ============================================================================

/// [`Platform`] made of the doubles in this module
pub struct MockPlatform;

impl Platform for MockPlatform {
    type Storage = MemStorage;
    type Uptime = ManualUptime;
    type Clock = ManualWallClock;
    type Probe = FixedProbe;
}

// ============================================================================
// STORAGE
// ============================================================================

#[derive(Debug)]
struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    capacity: u32,
    offline: bool,
    read_only: bool,
    usage_unavailable: bool,
}

/// Flash filesystem held in RAM
///
/// Usage is the sum of all file sizes against a fixed capacity.
#[derive(Debug, Clone)]
pub struct MemStorage {
    fs: Arc<Mutex<MemFs>>,
}

/// Error returned while the filesystem is marked offline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOffline;

impl MemStorage {
    pub fn new(capacity: u32) -> Self {
        Self {
            fs: Arc::new(Mutex::new(MemFs {
                files: BTreeMap::new(),
                capacity,
                offline: false,
                read_only: false,
                usage_unavailable: false,
            })),
        }
    }

    /// Make every operation fail until switched back
    pub fn set_offline(&self, offline: bool) {
        locked(&self.fs).offline = offline;
    }

    /// Reads keep working, writes and appends fail
    pub fn set_read_only(&self, read_only: bool) {
        locked(&self.fs).read_only = read_only;
    }

    /// Make only `usage()` fail, as a filesystem that cannot report its
    /// capacity would
    pub fn set_usage_unavailable(&self, unavailable: bool) {
        locked(&self.fs).usage_unavailable = unavailable;
    }

    pub fn put(&self, path: &str, data: &[u8]) {
        locked(&self.fs).files.insert(path.to_string(), data.to_vec());
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        locked(&self.fs).files.get(path).cloned()
    }

    /// Non-empty lines of a text file
    pub fn lines(&self, path: &str) -> Vec<String> {
        self.contents(path)
            .map(|bytes| {
                String::from_utf8_lossy(&bytes)
                    .split('\n')
                    .filter(|l| !l.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Storage for MemStorage {
    type Error = StorageOffline;

    fn read(&mut self, path: &str, buf: &mut Vec<u8>) -> Result<bool, Self::Error> {
        let fs = locked(&self.fs);
        if fs.offline {
            return Err(StorageOffline);
        }
        buf.clear();
        match fs.files.get(path) {
            Some(data) => {
                buf.extend_from_slice(data);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_prefix(
        &mut self,
        path: &str,
        max: usize,
        buf: &mut Vec<u8>,
    ) -> Result<bool, Self::Error> {
        let fs = locked(&self.fs);
        if fs.offline {
            return Err(StorageOffline);
        }
        buf.clear();
        match fs.files.get(path) {
            Some(data) => {
                buf.extend_from_slice(&data[..data.len().min(max)]);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error> {
        let mut fs = locked(&self.fs);
        if fs.offline || fs.read_only {
            return Err(StorageOffline);
        }
        fs.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<(), Self::Error> {
        let mut fs = locked(&self.fs);
        if fs.offline || fs.read_only {
            return Err(StorageOffline);
        }
        fs.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn file_size(&mut self, path: &str) -> Result<Option<u32>, Self::Error> {
        let fs = locked(&self.fs);
        if fs.offline {
            return Err(StorageOffline);
        }
        Ok(fs.files.get(path).map(|f| f.len() as u32))
    }

    fn usage(&mut self) -> Result<StorageUsage, Self::Error> {
        let fs = locked(&self.fs);
        if fs.offline || fs.usage_unavailable {
            return Err(StorageOffline);
        }
        let used: usize = fs.files.values().map(Vec::len).sum();
        Ok(StorageUsage {
            total_bytes: fs.capacity,
            used_bytes: used as u32,
        })
    }
}

// ============================================================================
// CLOCKS
// ============================================================================

/// Uptime counter that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualUptime {
    ms: Arc<AtomicU64>,
}

impl ManualUptime {
    pub fn new(start_ms: u64) -> Self {
        Self {
            ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.ms.store(ms, Ordering::SeqCst);
    }
}

impl Uptime for ManualUptime {
    fn uptime_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct WallState {
    unix_secs: u64,
    requests: Vec<String>,
}

/// Wall clock the test sets by hand to simulate SNTP completing
#[derive(Debug, Clone, Default)]
pub struct ManualWallClock {
    state: Arc<Mutex<WallState>>,
}

impl ManualWallClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unix_secs(&self, secs: u64) {
        locked(&self.state).unix_secs = secs;
    }

    pub fn advance_secs(&self, secs: u64) {
        locked(&self.state).unix_secs += secs;
    }

    /// Servers passed to `request_sync`, oldest first
    pub fn sync_requests(&self) -> Vec<String> {
        locked(&self.state).requests.clone()
    }
}

impl WallClock for ManualWallClock {
    fn unix_secs(&self) -> u64 {
        locked(&self.state).unix_secs
    }

    fn request_sync(&self, server: &str) {
        locked(&self.state).requests.push(server.to_string());
    }
}

// ============================================================================
// SYSTEM
// ============================================================================

/// Probe returning the same figures every time
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub MemoryStats);

impl Default for FixedProbe {
    fn default() -> Self {
        Self(MemoryStats {
            heap_free: 180_000,
            heap_used: 140_000,
            psram_free: 4_194_304,
            task_count: 7,
        })
    }
}

impl ResourceProbe for FixedProbe {
    fn sample(&self) -> MemoryStats {
        self.0
    }
}

// ============================================================================
// NETWORK
// ============================================================================

/// Link status flag
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    up: Arc<AtomicBool>,
}

impl MockLink {
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

impl Connectivity for MockLink {
    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }
}

/// How the simulated collector answers each line it receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// `{"ack":1}` per line
    Ack,
    /// Nothing at all
    Silent,
    /// A line that is not an ack
    Garbage,
}

#[derive(Debug)]
struct CollectorState {
    received: Vec<String>,
    inbound: VecDeque<u8>,
    ack_mode: AckMode,
    refuse: bool,
    fail_writes: bool,
    connects: usize,
    /// Bumped on every connect and forced disconnect; stale handles see
    /// their connection as closed.
    epoch: u64,
}

/// Collector endpoint plus a [`Connector`] that dials it
#[derive(Debug, Clone)]
pub struct MockCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl Default for MockCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCollector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CollectorState {
                received: Vec::new(),
                inbound: VecDeque::new(),
                ack_mode: AckMode::Ack,
                refuse: false,
                fail_writes: false,
                connects: 0,
                epoch: 0,
            })),
        }
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            state: self.state.clone(),
        }
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        locked(&self.state).ack_mode = mode;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        locked(&self.state).refuse = refuse;
    }

    pub fn fail_writes(&self, fail: bool) {
        locked(&self.state).fail_writes = fail;
    }

    /// Queue a raw line (newline appended) for the device to read
    pub fn send_line(&self, line: &str) {
        let mut state = locked(&self.state);
        state.inbound.extend(line.as_bytes());
        state.inbound.push_back(b'\n');
    }

    /// Every complete line the device has written, oldest first
    pub fn received(&self) -> Vec<String> {
        locked(&self.state).received.clone()
    }

    pub fn take_received(&self) -> Vec<String> {
        core::mem::take(&mut locked(&self.state).received)
    }

    pub fn connection_count(&self) -> usize {
        locked(&self.state).connects
    }

    /// Close the current connection from the collector side
    pub fn disconnect(&self) {
        let mut state = locked(&self.state);
        state.epoch += 1;
        state.inbound.clear();
    }
}

/// Dials the [`MockCollector`] it was created from
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<CollectorState>>,
}

/// Failures surfaced by the mock network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockNetError {
    Refused,
    Closed,
    WriteFailed,
}

impl core::fmt::Display for MockNetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Refused => write!(f, "Connection refused"),
            Self::Closed => write!(f, "Connection closed"),
            Self::WriteFailed => write!(f, "Write failed"),
        }
    }
}

impl core::error::Error for MockNetError {}

impl embedded_io::Error for MockNetError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Refused => ErrorKind::ConnectionRefused,
            Self::Closed => ErrorKind::BrokenPipe,
            Self::WriteFailed => ErrorKind::Other,
        }
    }
}

impl Connector for MockConnector {
    type Connection = MockConnection;
    type Error = MockNetError;

    async fn connect(&mut self, _host: &str, _port: u16) -> Result<MockConnection, MockNetError> {
        let mut state = locked(&self.state);
        if state.refuse {
            return Err(MockNetError::Refused);
        }
        state.connects += 1;
        state.epoch += 1;
        state.inbound.clear();
        Ok(MockConnection {
            state: self.state.clone(),
            epoch: state.epoch,
            partial: Vec::new(),
        })
    }
}

/// One stream to the [`MockCollector`]
#[derive(Debug)]
pub struct MockConnection {
    state: Arc<Mutex<CollectorState>>,
    epoch: u64,
    partial: Vec<u8>,
}

impl ErrorType for MockConnection {
    type Error = MockNetError;
}

impl Read for MockConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, MockNetError> {
        loop {
            {
                let mut state = locked(&self.state);
                if state.epoch != self.epoch {
                    return Err(MockNetError::Closed);
                }
                if !state.inbound.is_empty() {
                    let n = buf.len().min(state.inbound.len());
                    for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    return Ok(n);
                }
            }
            YieldOnce::default().await;
        }
    }
}

impl Write for MockConnection {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, MockNetError> {
        let mut state = locked(&self.state);
        if state.epoch != self.epoch {
            return Err(MockNetError::Closed);
        }
        if state.fail_writes {
            return Err(MockNetError::WriteFailed);
        }
        self.partial.extend_from_slice(buf);
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            state.received.push(text);
            let reply: &[u8] = match state.ack_mode {
                AckMode::Ack => b"{\"ack\":1}\n",
                AckMode::Silent => b"",
                AckMode::Garbage => b"{\"nack\":1}\n",
            };
            state.inbound.extend(reply);
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), MockNetError> {
        Ok(())
    }
}

impl ReadReady for MockConnection {
    fn read_ready(&mut self) -> Result<bool, MockNetError> {
        let state = locked(&self.state);
        if state.epoch != self.epoch {
            return Err(MockNetError::Closed);
        }
        Ok(!state.inbound.is_empty())
    }
}

/// Returns `Pending` exactly once so an outer timeout gets polled
#[derive(Default)]
struct YieldOnce {
    yielded: bool,
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
