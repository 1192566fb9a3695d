//! Escalating retry delays

use alloc::vec::Vec;

/// Walks a fixed delay table on consecutive failures
///
/// Each failure schedules the next attempt using the current entry and
/// advances to the next one, holding at the last. Any success resets to
/// the first entry and clears the schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    delays_ms: Vec<u64>,
    index: usize,
    next_retry_ms: Option<u64>,
}

impl Backoff {
    /// An empty table behaves as a single zero delay
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self {
            delays_ms,
            index: 0,
            next_retry_ms: None,
        }
    }

    /// Record a failure at `now_ms`; returns the delay applied
    pub fn apply(&mut self, now_ms: u64) -> u64 {
        let delay = self.current_delay();
        if self.index + 1 < self.delays_ms.len() {
            self.index += 1;
        }
        self.next_retry_ms = Some(now_ms.saturating_add(delay));
        delay
    }

    pub fn reset(&mut self) {
        self.index = 0;
        self.next_retry_ms = None;
    }

    /// Still inside the window scheduled by the last failure
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.next_retry_ms.is_some_and(|at| now_ms < at)
    }

    /// Delay the next failure would apply
    pub fn current_delay(&self) -> u64 {
        self.delays_ms.get(self.index).copied().unwrap_or(0)
    }

    pub fn next_retry_ms(&self) -> Option<u64> {
        self.next_retry_ms
    }
}
