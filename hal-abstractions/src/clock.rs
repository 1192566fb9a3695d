//! Time sources
//!
//! Two clocks with very different guarantees:
//! - [`Uptime`] never goes backwards and starts at zero on every boot.
//! - [`WallClock`] is calendar time; it reads as epoch (or some other
//!   implausible value) until the board's SNTP client has set it.

/// Monotonic milliseconds since power-on
pub trait Uptime {
    fn uptime_ms(&self) -> u64;
}

/// Calendar clock fed by an external time source (RTC + SNTP)
pub trait WallClock {
    /// Seconds since the Unix epoch as currently held by the clock
    fn unix_secs(&self) -> u64;

    /// Start a background synchronization against `server`
    ///
    /// Must return immediately. Completion is observed by polling
    /// [`WallClock::unix_secs`] for a plausible value.
    fn request_sync(&self, server: &str);
}
