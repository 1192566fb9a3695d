//! Commands received from the collector

use embassy_sync::channel::Channel;

/// Longest command name accepted, in bytes
pub const MAX_COMMAND_LEN: usize = 16;

/// A command forwarded to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: heapless::String<MAX_COMMAND_LEN>,
    /// Uptime when the command arrived
    pub received_ms: u64,
}

impl Command {
    /// `None` when `name` does not fit
    pub fn new(name: &str, received_ms: u64) -> Option<Self> {
        let mut buf = heapless::String::new();
        buf.push_str(name).ok()?;
        Some(Self {
            name: buf,
            received_ms,
        })
    }

    pub fn is_status(&self) -> bool {
        self.name == "status"
    }
}

/// Bounded queue the shipper feeds and the application drains
pub type CommandChannel<M, const N: usize> = Channel<M, Command, N>;
