//! Network-facing traits
//!
//! The link itself (DHCP, Wi-Fi credentials, fallback AP) is managed by the
//! board; telemetry only needs to know whether it is up and how to open a
//! byte stream to the collector.

use core::future::Future;

use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};

/// Link status as reported by the network manager
pub trait Connectivity {
    fn is_up(&self) -> bool;
}

/// Opens stream connections (TCP) to a remote host
///
/// Dropping a [`Connector::Connection`] closes it.
pub trait Connector {
    /// Established stream; `read_ready` lets callers poll for inbound
    /// lines without awaiting.
    type Connection: Read + Write + ReadReady;

    /// Connection establishment failure
    type Error: core::fmt::Debug;

    /// Resolve `host` and connect to `port`
    fn connect(
        &mut self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Connection, Self::Error>>;
}
