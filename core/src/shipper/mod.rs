//! Log Shipper: store-and-forward delivery to the collector
//!
//! Each [`Shipper::cycle`] does at most one unit of work:
//!
//! 1. Skip while a backoff window is open.
//! 2. Make sure a connection exists (link up, bounded connect wait).
//! 3. Send the oldest ledger record with its reconstructed timestamp and
//!    wait for `{"ack":1}`. Only an acknowledged record is deleted. A line
//!    that does not parse is reported once and dropped.
//! 4. With nothing pending and the link idle long enough, send a heartbeat.
//! 5. Handle at most one inbound command line if bytes are waiting.
//!
//! Any delivery failure applies backoff and drops the connection; the next
//! eligible cycle reconnects and resends the same record. Delivery is
//! therefore at-least-once: a lost ack produces a duplicate at the
//! collector.

mod backoff;
mod command;
pub mod wire;

pub use backoff::Backoff;
pub use command::{Command, CommandChannel, MAX_COMMAND_LEN};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{with_timeout, Duration};
use embedded_io::ReadReady;
use embedded_io_async::{Read, Write};
use hal_abstractions::{Connector, Platform};

use crate::config::ShipperConfig;
use crate::error::DeliveryError;
use crate::store::{EventRecord, LogStore, Peeked};
use crate::time::{EntryTime, TimeAuthority};
use wire::Inbound;

/// Longest inbound line accepted from the collector
pub const RX_LINE_MAX: usize = 256;

/// How long a partially received command line is waited on per cycle
const COMMAND_READ_WAIT_MS: u64 = 50;

const STATUS_MESSAGE: &str = "Status requested (command from server)";

type Line = heapless::Vec<u8, RX_LINE_MAX>;

/// What one cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleOutcome {
    /// Inside a backoff window; nothing attempted
    BackingOff,
    /// A record was acknowledged and removed from the ledger
    Delivered { boot_seq: u32, seq: u32 },
    /// An unparseable ledger line was reported and removed
    CorruptDropped,
    /// A heartbeat was acknowledged
    Heartbeat,
    /// Connected, nothing to send yet
    Idle,
    /// A lock was not available in time; retried next cycle
    Busy,
    /// Connect, send or ack failed; backoff applied
    Failed(DeliveryError),
}

pub struct Shipper<'a, M, P, K, const N: usize>
where
    M: RawMutex,
    P: Platform,
    K: Connector,
{
    store: &'a LogStore<M, P>,
    time: &'a TimeAuthority<M, P>,
    connector: K,
    commands: Sender<'a, M, Command, N>,
    config: ShipperConfig,
    conn: Option<K::Connection>,
    backoff: Backoff,
    last_activity_ms: u64,
    /// Acks still due for diagnostics sent without waiting
    owed_acks: u32,
    rx: Line,
}

impl<'a, M, P, K, const N: usize> Shipper<'a, M, P, K, N>
where
    M: RawMutex,
    P: Platform,
    K: Connector,
{
    pub fn new(
        store: &'a LogStore<M, P>,
        time: &'a TimeAuthority<M, P>,
        connector: K,
        commands: Sender<'a, M, Command, N>,
        config: ShipperConfig,
    ) -> Self {
        let backoff = Backoff::new(config.retry_backoff_ms.clone());
        Self {
            store,
            time,
            connector,
            commands,
            config,
            conn: None,
            backoff,
            last_activity_ms: 0,
            owed_acks: 0,
            rx: Line::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Run one delivery step; `link_up` is the network manager's view
    pub async fn cycle(&mut self, link_up: bool) -> CycleOutcome {
        let now_ms = self.store.uptime_ms();
        if self.backoff.is_active(now_ms) {
            return CycleOutcome::BackingOff;
        }

        if !link_up && self.conn.is_some() {
            info!("Link down, closing collector connection");
            self.disconnect();
        }
        if let Err(e) = self.ensure_connected(link_up, now_ms).await {
            return self.fail(e);
        }

        let outcome = match self.store.peek_oldest().await {
            Ok(Some(head)) => match &head {
                Peeked::Record(record) => self.deliver(record, &head).await,
                Peeked::Corrupt(raw) => self.quarantine(raw, &head).await,
            },
            Ok(None) => self.idle(now_ms).await,
            Err(e) => {
                debug!("Ledger unavailable ({}), skipping cycle", e);
                CycleOutcome::Busy
            }
        };

        if self.conn.is_some() {
            if let Err(e) = self.poll_command().await {
                return self.fail(e);
            }
        }
        outcome
    }

    async fn ensure_connected(&mut self, link_up: bool, now_ms: u64) -> Result<(), DeliveryError> {
        if self.conn.is_some() {
            return Ok(());
        }
        if !link_up {
            return Err(DeliveryError::Connect);
        }

        let attempt = self
            .connector
            .connect(&self.config.server_host, self.config.server_port);
        match with_timeout(Duration::from_millis(self.config.connect_timeout_ms), attempt).await {
            Ok(Ok(conn)) => {
                info!(
                    "Connected to collector {}:{}",
                    self.config.server_host.as_str(),
                    self.config.server_port
                );
                self.conn = Some(conn);
                self.rx.clear();
                self.owed_acks = 0;
                self.backoff.reset();
                self.last_activity_ms = now_ms;
                Ok(())
            }
            Ok(Err(_)) => Err(DeliveryError::Connect),
            Err(_) => {
                warn!("Collector connect timed out");
                Err(DeliveryError::Connect)
            }
        }
    }

    async fn deliver(&mut self, record: &EventRecord, head: &Peeked) -> CycleOutcome {
        let ts = match self
            .time
            .translate_entry_time(record.boot_seq, record.uptime_ms)
            .await
        {
            Ok(ts) => ts,
            Err(_) => return CycleOutcome::Busy,
        };
        let line = match wire::record_line(record, ts) {
            Ok(line) => line,
            Err(e) => return self.fail(e),
        };

        if let Err(e) = self.exchange(&line).await {
            return self.fail(e);
        }
        match self.store.delete_oldest_if(head).await {
            Ok(true) => {}
            Ok(false) => debug!("Record {} already rotated out", record.seq),
            Err(_) => warn!("Acknowledged record {} not deleted, will resend", record.seq),
        }
        self.succeed();
        CycleOutcome::Delivered {
            boot_seq: record.boot_seq,
            seq: record.seq,
        }
    }

    /// Drop an unparseable line, then report it without waiting for the ack
    ///
    /// The report goes out only once the line is off the ledger, so a line
    /// that cannot be removed yet is not reported twice.
    async fn quarantine(&mut self, raw: &str, head: &Peeked) -> CycleOutcome {
        if let Err(e) = self.store.delete_oldest_if(head).await {
            debug!("Corrupted line not removed ({}), retrying", e);
            return CycleOutcome::Busy;
        }
        warn!("Corrupted ledger line dropped");

        let boot_seq = self.store.boot_seq();
        let uptime_ms = self.store.uptime_ms();
        let ts = self
            .time
            .translate_entry_time(boot_seq, uptime_ms)
            .await
            .unwrap_or(EntryTime::Unknown);

        let sent = match wire::corrupt_line_diagnostic(
            raw,
            boot_seq,
            uptime_ms,
            ts,
            &self.store.snapshot(),
        ) {
            Ok(line) => self.send(&line).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => self.owed_acks += 1,
            Err(e) => {
                self.fail(e);
            }
        }
        CycleOutcome::CorruptDropped
    }

    async fn idle(&mut self, now_ms: u64) -> CycleOutcome {
        if now_ms.saturating_sub(self.last_activity_ms) < self.config.heartbeat_interval_ms {
            return CycleOutcome::Idle;
        }

        let boot_seq = self.store.boot_seq();
        let ts = match self.time.translate_entry_time(boot_seq, now_ms).await {
            Ok(ts) => ts,
            Err(_) => return CycleOutcome::Busy,
        };
        let line = match wire::heartbeat_line(boot_seq, now_ms, ts, &self.store.snapshot()) {
            Ok(line) => line,
            Err(e) => return self.fail(e),
        };

        if let Err(e) = self.exchange(&line).await {
            return self.fail(e);
        }
        debug!("Heartbeat acknowledged");
        self.succeed();
        CycleOutcome::Heartbeat
    }

    async fn exchange(&mut self, line: &[u8]) -> Result<(), DeliveryError> {
        self.send(line).await?;
        match with_timeout(
            Duration::from_millis(self.config.ack_timeout_ms),
            self.read_until_ack(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::AckTimeout),
        }
    }

    async fn send(&mut self, line: &[u8]) -> Result<(), DeliveryError> {
        let conn = self.conn.as_mut().ok_or(DeliveryError::Closed)?;
        let write = async {
            conn.write_all(line).await.map_err(|_| DeliveryError::Send)?;
            conn.flush().await.map_err(|_| DeliveryError::Send)
        };
        match with_timeout(Duration::from_millis(self.config.ack_timeout_ms), write).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Send),
        }
    }

    async fn read_until_ack(&mut self) -> Result<(), DeliveryError> {
        loop {
            let line = self.read_line().await?;
            match wire::parse_inbound(&line) {
                Inbound::Ack if self.owed_acks > 0 => self.owed_acks -= 1,
                Inbound::Ack => return Ok(()),
                Inbound::Command(name) => self.dispatch(name).await,
                Inbound::Other => return Err(DeliveryError::MalformedAck),
            }
        }
    }

    /// Handle one inbound line if one is already arriving
    async fn poll_command(&mut self) -> Result<(), DeliveryError> {
        let ready = self.rx.contains(&b'\n')
            || match self.conn.as_mut() {
                Some(conn) => conn.read_ready().map_err(|_| DeliveryError::Closed)?,
                None => return Ok(()),
            };
        if !ready {
            return Ok(());
        }

        let line = match with_timeout(
            Duration::from_millis(COMMAND_READ_WAIT_MS),
            self.read_line(),
        )
        .await
        {
            Ok(line) => line?,
            // Rest of the line arrives later; keep what was buffered
            Err(_) => return Ok(()),
        };

        match wire::parse_inbound(&line) {
            Inbound::Command(name) => self.dispatch(name).await,
            Inbound::Ack if self.owed_acks > 0 => self.owed_acks -= 1,
            Inbound::Ack => debug!("Unexpected ack ignored"),
            Inbound::Other => warn!("Unrecognized line from collector dropped"),
        }
        Ok(())
    }

    async fn dispatch(&self, name: &str) {
        let Some(command) = Command::new(name, self.store.uptime_ms()) else {
            warn!("Command name too long, dropped");
            return;
        };
        info!("Received command: {}", name);

        if command.is_status() && self.store.info(STATUS_MESSAGE).await.is_err() {
            warn!("Status record not written");
        }
        if self.commands.try_send(command).is_err() {
            debug!("Command queue full, dropped");
        }
    }

    /// Next complete line from the connection, newline stripped
    async fn read_line(&mut self) -> Result<Line, DeliveryError> {
        let conn = self.conn.as_mut().ok_or(DeliveryError::Closed)?;
        loop {
            if let Some(pos) = self.rx.iter().position(|&b| b == b'\n') {
                let line = Line::from_slice(&self.rx[..pos]).map_err(|_| DeliveryError::LineTooLong)?;
                let rest = self.rx.len() - (pos + 1);
                self.rx.copy_within(pos + 1.., 0);
                self.rx.truncate(rest);
                return Ok(line);
            }
            if self.rx.is_full() {
                self.rx.clear();
                return Err(DeliveryError::LineTooLong);
            }

            let mut chunk = [0u8; 64];
            let room = (RX_LINE_MAX - self.rx.len()).min(chunk.len());
            let n = conn
                .read(&mut chunk[..room])
                .await
                .map_err(|_| DeliveryError::Closed)?;
            if n == 0 {
                return Err(DeliveryError::Closed);
            }
            // Fits: `room` bounds the read
            let _ = self.rx.extend_from_slice(&chunk[..n]);
        }
    }

    fn succeed(&mut self) {
        self.backoff.reset();
        self.last_activity_ms = self.store.uptime_ms();
    }

    fn fail(&mut self, e: DeliveryError) -> CycleOutcome {
        let delay = self.backoff.apply(self.store.uptime_ms());
        warn!("Delivery failed: {}, retry in {} ms", e, delay);
        self.disconnect();
        CycleOutcome::Failed(e)
    }

    fn disconnect(&mut self) {
        self.conn = None;
        self.rx.clear();
        self.owed_acks = 0;
    }
}
