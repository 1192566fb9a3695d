//! Synchronization state machine
//!
//! ```text
//!          link up && !confident
//!   Idle ────────────────────────▶ Syncing{started}
//!    ▲                               │ link down      ──▶ Idle
//!    │                               │ plausible time ──▶ Succeeded
//!    │ next tick                     │ timed out      ──▶ Failed
//!    └──────── Succeeded / Failed ◀──┘
//! ```
//!
//! [`SyncState::step`] is pure; the caller performs whatever the returned
//! [`Action`] asks for.

use crate::calendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncState {
    Idle,
    Syncing { started_ms: u64 },
    Succeeded { unix_secs: u64 },
    Failed,
}

/// What the state machine observed this tick
#[derive(Debug, Clone, Copy)]
pub struct Inputs {
    pub link_up: bool,
    pub confident: bool,
    /// Wall clock reading
    pub clock_unix_secs: u64,
    pub now_ms: u64,
    pub timeout_ms: u64,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    /// Kick off a background sync
    RequestSync,
    /// Link dropped mid-sync; nothing adopted
    Abort,
    /// Adopt this calendar time and record an anchor
    Adopt { unix_secs: u64 },
    /// Give up and fall back to the boot-time estimate
    GiveUp,
}

impl SyncState {
    pub fn step(self, i: Inputs) -> (Self, Action) {
        match self {
            Self::Idle if i.link_up && !i.confident => (
                Self::Syncing {
                    started_ms: i.now_ms,
                },
                Action::RequestSync,
            ),
            Self::Idle => (Self::Idle, Action::None),
            Self::Syncing { started_ms } => {
                if !i.link_up {
                    (Self::Idle, Action::Abort)
                } else if calendar::is_plausible(i.clock_unix_secs) {
                    let unix_secs = i.clock_unix_secs;
                    (Self::Succeeded { unix_secs }, Action::Adopt { unix_secs })
                } else if i.now_ms.saturating_sub(started_ms) > i.timeout_ms {
                    (Self::Failed, Action::GiveUp)
                } else {
                    (self, Action::None)
                }
            }
            Self::Succeeded { .. } | Self::Failed => (Self::Idle, Action::None),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing { .. } => "syncing",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed => "failed",
        }
    }
}
