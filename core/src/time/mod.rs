//! Time Authority
//!
//! Owns the answer to "what time is it, and should anyone believe it".
//! Until a network sync succeeds the device reports a fixed boot-time
//! fallback and is *unconfident*. A successful sync makes it *confident*
//! for a configurable window measured on the uptime clock, and records an
//! anchor `(boot generation, calendar time, uptime)` so that uptime stamps
//! written earlier in the same boot can be converted to calendar time.
//!
//! Local time for display applies a fixed UTC offset taken from a POSIX `TZ`
//! string. Everything stored or shipped stays in UTC.
//!
//! Locking: the time state and the anchor history each sit behind their own
//! [`Mutex`] with a short bounded wait. No method holds both at once.

mod anchor;
mod sync;

pub use anchor::{AnchorHistory, SyncAnchor, ANCHOR_PATH};
pub use sync::{Action, Inputs, SyncState};

use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_time::{with_timeout, Duration};
use hal_abstractions::{Platform, Uptime, WallClock};

use crate::calendar::{Iso8601, LocalIso8601, UtcOffset};
use crate::config::TimeConfig;
use crate::error::LockTimeout;
use crate::ring::RingLog;

/// Time-sync events kept in memory for diagnostics
pub const TRAIL_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Confidence {
    Confident,
    Unconfident,
}

/// Calendar time reconstructed for a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryTime {
    /// Unix seconds
    At(u64),
    /// The entry's boot generation never synchronized
    Unknown,
}

impl EntryTime {
    pub fn unix_secs(self) -> Option<u64> {
        match self {
            Self::At(secs) => Some(secs),
            Self::Unknown => None,
        }
    }
}

/// Point-in-time view of the authority for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeStatus {
    pub confidence: Confidence,
    pub state: SyncState,
    pub last_sync_unix: Option<u64>,
    pub ms_since_sync: Option<u64>,
    pub sync_attempts: u32,
}

/// One entry of the time-sync event trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailEntry {
    pub uptime_ms: u64,
    pub message: heapless::String<64>,
}

struct TimeState {
    confidence: Confidence,
    last_sync_unix: Option<u64>,
    last_sync_uptime_ms: u64,
}

pub struct TimeAuthority<M: RawMutex, P: Platform> {
    state: Mutex<M, TimeState>,
    anchors: Mutex<M, AnchorHistory<P::Storage>>,
    sync: BlockingMutex<M, Cell<SyncState>>,
    attempts: BlockingMutex<M, Cell<u32>>,
    offset: BlockingMutex<M, Cell<UtcOffset>>,
    trail: BlockingMutex<M, RefCell<RingLog<TrailEntry, TRAIL_LEN>>>,
    clock: P::Clock,
    uptime: P::Uptime,
    boot_seq: u32,
    config: TimeConfig,
}

impl<M: RawMutex, P: Platform> TimeAuthority<M, P> {
    /// `storage` is the handle used for the anchor history; `boot_seq`
    /// comes from the Log Store.
    pub fn new(
        storage: P::Storage,
        clock: P::Clock,
        uptime: P::Uptime,
        boot_seq: u32,
        config: TimeConfig,
    ) -> Self {
        let anchors = AnchorHistory::load(storage, config.max_boot_history);
        let offset = UtcOffset::from_posix_tz(&config.timezone).unwrap_or_else(|| {
            warn!("Timezone {} not understood, using UTC", config.timezone.as_str());
            UtcOffset::UTC
        });
        let authority = Self {
            state: Mutex::new(TimeState {
                confidence: Confidence::Unconfident,
                last_sync_unix: None,
                last_sync_uptime_ms: 0,
            }),
            anchors: Mutex::new(anchors),
            sync: BlockingMutex::new(Cell::new(SyncState::Idle)),
            attempts: BlockingMutex::new(Cell::new(0)),
            offset: BlockingMutex::new(Cell::new(offset)),
            trail: BlockingMutex::new(RefCell::new(RingLog::new())),
            clock,
            uptime,
            boot_seq,
            config,
        };
        authority.note(format_args!(
            "Started with fallback {}",
            Iso8601(authority.config.fallback_unix_secs)
        ));
        authority
    }

    /// Advance the sync state machine once
    pub async fn tick(&self, link_up: bool) {
        let now_ms = self.uptime.uptime_ms();

        let confident = {
            let Ok(mut state) = self.lock_state().await else {
                debug!("Time state busy, tick skipped");
                return;
            };
            if state.confidence == Confidence::Confident && !self.within_window(&state, now_ms) {
                state.confidence = Confidence::Unconfident;
                drop(state);
                info!("Time confidence expired");
                self.note(format_args!("Confidence window elapsed"));
                false
            } else {
                state.confidence == Confidence::Confident
            }
        };

        let current = self.sync_state();
        let (next, action) = current.step(Inputs {
            link_up,
            confident,
            clock_unix_secs: self.clock.unix_secs(),
            now_ms,
            timeout_ms: self.config.sync_timeout_ms,
        });

        // Stay put when an action could not complete; it is retried next tick
        if self.perform(action, now_ms).await.is_ok() {
            if next != current {
                debug!("Time sync {} -> {}", current.name(), next.name());
            }
            self.sync.lock(|s| s.set(next));
        }
    }

    async fn perform(&self, action: Action, now_ms: u64) -> Result<(), LockTimeout> {
        match action {
            Action::None => {}
            Action::RequestSync => {
                self.attempts.lock(|a| a.set(a.get().wrapping_add(1)));
                info!("Starting time sync with {}", self.config.ntp_server.as_str());
                self.note(format_args!("Sync started (timeout {} ms)", self.config.sync_timeout_ms));
                self.clock.request_sync(&self.config.ntp_server);
            }
            Action::Abort => {
                warn!("Link lost, time sync aborted");
                self.note(format_args!("Link lost, sync aborted"));
            }
            Action::Adopt { unix_secs } => {
                // Confident only once this boot has its anchor
                {
                    let mut anchors = self.lock_anchors().await?;
                    anchors.upsert(SyncAnchor {
                        boot_seq: self.boot_seq,
                        ntp_sync_time: unix_secs,
                        sync_uptime_ms: now_ms,
                    });
                }
                let mut state = self.lock_state().await?;
                state.confidence = Confidence::Confident;
                state.last_sync_unix = Some(unix_secs);
                state.last_sync_uptime_ms = now_ms;
                drop(state);
                info!("Time sync succeeded: {}", unix_secs);
                self.note(format_args!("Sync succeeded: {}", Iso8601(unix_secs)));
            }
            Action::GiveUp => {
                self.lock_state().await?.confidence = Confidence::Unconfident;
                warn!("Time sync timed out");
                self.note(format_args!("Sync timeout after {} ms", self.config.sync_timeout_ms));
            }
        }
        Ok(())
    }

    /// Current calendar time in Unix seconds
    ///
    /// The live clock while confident, the fallback otherwise. Never waits
    /// longer than the lock timeout.
    pub async fn now(&self) -> u64 {
        match self.lock_state().await {
            Ok(state) => {
                if self.within_window(&state, self.uptime.uptime_ms()) {
                    self.clock.unix_secs()
                } else {
                    self.config.fallback_unix_secs
                }
            }
            Err(_) => match self.clock.unix_secs() {
                0 => self.config.fallback_unix_secs,
                live => live,
            },
        }
    }

    /// Whether a sync succeeded within the confidence window
    pub async fn is_confident(&self) -> bool {
        match self.lock_state().await {
            Ok(state) => self.within_window(&state, self.uptime.uptime_ms()),
            Err(_) => false,
        }
    }

    /// [`now`](Self::now) rendered at the configured local offset
    pub async fn now_local(&self) -> LocalIso8601 {
        LocalIso8601 {
            unix_secs: self.now().await,
            offset: self.utc_offset(),
        }
    }

    pub fn utc_offset(&self) -> UtcOffset {
        self.offset.lock(Cell::get)
    }

    /// Switch local-time display to a POSIX `TZ` string
    ///
    /// Returns `false` and keeps the current offset when `tz` does not parse.
    pub fn set_timezone(&self, tz: &str) -> bool {
        let Some(offset) = UtcOffset::from_posix_tz(tz) else {
            warn!("Timezone {} not understood, unchanged", tz);
            return false;
        };
        self.offset.lock(|o| o.set(offset));
        self.note(format_args!("Timezone set to {}", tz));
        true
    }

    pub async fn confidence(&self) -> Confidence {
        if self.is_confident().await {
            Confidence::Confident
        } else {
            Confidence::Unconfident
        }
    }

    /// Calendar time of the last successful sync this boot
    pub async fn last_sync_time(&self) -> Option<u64> {
        self.lock_state().await.ok()?.last_sync_unix
    }

    /// Convert an entry's `(boot generation, uptime)` to calendar time
    pub async fn translate_entry_time(
        &self,
        boot_seq: u32,
        uptime_ms: u64,
    ) -> Result<EntryTime, LockTimeout> {
        let anchors = self.lock_anchors().await?;
        Ok(match anchors.get(boot_seq) {
            Some(anchor) => EntryTime::At(anchor.unix_at(uptime_ms)),
            None => EntryTime::Unknown,
        })
    }

    pub async fn status(&self) -> Result<TimeStatus, LockTimeout> {
        let now_ms = self.uptime.uptime_ms();
        let state = self.lock_state().await?;
        Ok(TimeStatus {
            confidence: if self.within_window(&state, now_ms) {
                Confidence::Confident
            } else {
                Confidence::Unconfident
            },
            state: self.sync_state(),
            last_sync_unix: state.last_sync_unix,
            ms_since_sync: state
                .last_sync_unix
                .map(|_| now_ms.saturating_sub(state.last_sync_uptime_ms)),
            sync_attempts: self.attempts.lock(Cell::get),
        })
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.lock(Cell::get)
    }

    pub fn boot_seq(&self) -> u32 {
        self.boot_seq
    }

    /// Anchors currently held, oldest first
    pub async fn anchors(&self) -> Result<Vec<SyncAnchor>, LockTimeout> {
        Ok(self.lock_anchors().await?.anchors().to_vec())
    }

    /// Recent time-sync events, oldest first
    pub fn trail(&self) -> Vec<TrailEntry> {
        self.trail.lock(|t| t.borrow().iter().cloned().collect())
    }

    fn within_window(&self, state: &TimeState, now_ms: u64) -> bool {
        state.confidence == Confidence::Confident
            && now_ms.saturating_sub(state.last_sync_uptime_ms) <= self.config.confidence_window_ms
    }

    fn note(&self, args: core::fmt::Arguments<'_>) {
        let mut message = heapless::String::new();
        // Overlong entries are cut at capacity
        let _ = message.write_fmt(args);
        let entry = TrailEntry {
            uptime_ms: self.uptime.uptime_ms(),
            message,
        };
        self.trail.lock(|t| {
            t.borrow_mut().push(entry);
        });
    }

    async fn lock_state(&self) -> Result<MutexGuard<'_, M, TimeState>, LockTimeout> {
        with_timeout(
            Duration::from_millis(self.config.lock_timeout_ms),
            self.state.lock(),
        )
        .await
        .map_err(|_| LockTimeout)
    }

    async fn lock_anchors(
        &self,
    ) -> Result<MutexGuard<'_, M, AnchorHistory<P::Storage>>, LockTimeout> {
        with_timeout(
            Duration::from_millis(self.config.lock_timeout_ms),
            self.anchors.lock(),
        )
        .await
        .map_err(|_| LockTimeout)
    }
}
