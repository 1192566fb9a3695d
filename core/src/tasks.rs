//! Long-running task bodies
//!
//! Boards spawn these from their executor (or RTIC software tasks) with
//! references to the shared components. Neither ever returns.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Timer};
use hal_abstractions::{Connectivity, Connector, Platform};

use crate::shipper::{CycleOutcome, Shipper};
use crate::time::TimeAuthority;

/// Default spacing between time authority ticks
pub const TIME_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Default spacing between shipper cycles
pub const SHIPPER_PERIOD: Duration = Duration::from_millis(100);

/// Drive the sync state machine from the link status
pub async fn time_authority_task<M, P, C>(
    authority: &TimeAuthority<M, P>,
    link: &C,
    period: Duration,
) -> !
where
    M: RawMutex,
    P: Platform,
    C: Connectivity,
{
    info!("Time authority task started");
    loop {
        authority.tick(link.is_up()).await;
        Timer::after(period).await;
    }
}

/// Drain the ledger to the collector
pub async fn shipper_task<M, P, K, C, const N: usize>(
    shipper: &mut Shipper<'_, M, P, K, N>,
    link: &C,
    period: Duration,
) -> !
where
    M: RawMutex,
    P: Platform,
    K: Connector,
    C: Connectivity,
{
    info!("Shipper task started");
    loop {
        match shipper.cycle(link.is_up()).await {
            CycleOutcome::Delivered { boot_seq, seq } => debug!("Shipped {}/{}", boot_seq, seq),
            CycleOutcome::Failed(e) => debug!("Shipper cycle failed: {}", e),
            _ => {}
        }
        Timer::after(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, ShipperConfig, TimeConfig};
    use crate::shipper::CommandChannel;
    use crate::store::{LogStore, LEDGER_PATH};
    use embassy_futures::block_on;
    use embassy_futures::select::select;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use hal_abstractions::mock::{
        FixedProbe, ManualUptime, ManualWallClock, MemStorage, MockCollector, MockLink,
        MockPlatform,
    };

    type Raw = CriticalSectionRawMutex;

    #[test]
    fn tasks_sync_time_and_drain_ledger() {
        let storage = MemStorage::new(64 * 1024);
        let uptime = ManualUptime::new(10);
        let clock = ManualWallClock::new();
        clock.set_unix_secs(1_763_035_200);
        let collector = MockCollector::new();
        let link = MockLink::default();
        link.set_up(true);

        let store: LogStore<Raw, MockPlatform> = LogStore::open(
            storage.clone(),
            uptime.clone(),
            FixedProbe::default(),
            LedgerConfig::default(),
        );
        let authority: TimeAuthority<Raw, MockPlatform> = TimeAuthority::new(
            storage.clone(),
            clock.clone(),
            uptime.clone(),
            store.boot_seq(),
            TimeConfig::default(),
        );
        let channel = CommandChannel::<Raw, 2>::new();
        let mut shipper = Shipper::new(
            &store,
            &authority,
            collector.connector(),
            channel.sender(),
            ShipperConfig {
                ack_timeout_ms: 50,
                ..ShipperConfig::default()
            },
        );

        block_on(async {
            select(
                async {
                    select(
                        time_authority_task(&authority, &link, Duration::from_millis(5)),
                        shipper_task(&mut shipper, &link, Duration::from_millis(5)),
                    )
                    .await;
                },
                Timer::after(Duration::from_millis(200)),
            )
            .await;
        });

        assert!(block_on(authority.is_confident()));
        assert!(storage.lines(LEDGER_PATH).is_empty());
        assert_eq!(collector.received().len(), 1);
    }
}
