//! Error types for telemetry operations
//!
//! None of these escape the task loops: every caller maps them to "skip
//! this operation, try again next cycle".

/// A bounded lock acquisition ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockTimeout;

impl core::fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Lock acquisition timed out")
    }
}

impl core::error::Error for LockTimeout {}

/// Ledger operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedgerError {
    /// Ledger lock not acquired within the configured wait
    LockTimeout,
    /// Filesystem unavailable or the operation failed
    Storage,
    /// Record could not be serialized
    Encode,
}

impl core::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::LockTimeout => write!(f, "Ledger lock timeout"),
            Self::Storage => write!(f, "Storage unavailable"),
            Self::Encode => write!(f, "Record encoding failed"),
        }
    }
}

impl core::error::Error for LedgerError {}

impl From<LockTimeout> for LedgerError {
    fn from(_: LockTimeout) -> Self {
        Self::LockTimeout
    }
}

/// Delivery errors on the collector link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeliveryError {
    /// Link down, refused, or connect timed out
    Connect,
    /// Socket write failed
    Send,
    /// No acknowledgment within the ack timeout
    AckTimeout,
    /// A line arrived that was neither an ack nor a command
    MalformedAck,
    /// Peer closed the stream or the read failed
    Closed,
    /// Inbound line exceeded the receive buffer
    LineTooLong,
    /// Outbound line could not be serialized
    Encode,
}

impl core::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Connect => write!(f, "Connection failed"),
            Self::Send => write!(f, "Send failed"),
            Self::AckTimeout => write!(f, "Acknowledgment timeout"),
            Self::MalformedAck => write!(f, "Malformed acknowledgment"),
            Self::Closed => write!(f, "Connection closed"),
            Self::LineTooLong => write!(f, "Inbound line too long"),
            Self::Encode => write!(f, "Line encoding failed"),
        }
    }
}

impl core::error::Error for DeliveryError {}
