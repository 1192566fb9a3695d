//! Full telemetry path on the in-memory platform: ledger, time sync and
//! delivery to a simulated collector.

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use hal_abstractions::mock::{
    FixedProbe, ManualUptime, ManualWallClock, MemStorage, MockCollector, MockPlatform,
};
use serde_json::Value;
use telemetry_core::config::{LedgerConfig, ShipperConfig, TimeConfig};
use telemetry_core::store::{BOOT_COUNTER_PATH, LEDGER_PATH};
use telemetry_core::{CommandChannel, CycleOutcome, DeliveryError, LogStore, Shipper, TimeAuthority};

type Raw = CriticalSectionRawMutex;
type Store = LogStore<Raw, MockPlatform>;
type Authority = TimeAuthority<Raw, MockPlatform>;

const SYNCED: u64 = 1_763_035_200; // 2025-11-13T12:00:00Z

struct Device {
    storage: MemStorage,
    uptime: ManualUptime,
    clock: ManualWallClock,
}

impl Device {
    fn boot(storage: MemStorage) -> (Self, Store, Authority) {
        let device = Self {
            storage,
            uptime: ManualUptime::new(50),
            clock: ManualWallClock::new(),
        };
        let store = Store::open(
            device.storage.clone(),
            device.uptime.clone(),
            FixedProbe::default(),
            LedgerConfig {
                lock_timeout_ms: 20,
                ..LedgerConfig::default()
            },
        );
        let time = Authority::new(
            device.storage.clone(),
            device.clock.clone(),
            device.uptime.clone(),
            store.boot_seq(),
            TimeConfig {
                lock_timeout_ms: 20,
                ..TimeConfig::default()
            },
        );
        (device, store, time)
    }
}

fn shipper_config() -> ShipperConfig {
    ShipperConfig {
        ack_timeout_ms: 50,
        connect_timeout_ms: 50,
        ..ShipperConfig::default()
    }
}

fn sent(collector: &MockCollector) -> Vec<Value> {
    collector
        .take_received()
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn offline_boot_then_sync_then_heartbeat() {
    let storage = MemStorage::new(256 * 1024);
    storage.put(BOOT_COUNTER_PATH, br#"{"boot_seq":4}"#);
    let (device, store, time) = Device::boot(storage);
    let collector = MockCollector::new();
    let channel = CommandChannel::<Raw, 4>::new();
    let mut shipper = Shipper::new(
        &store,
        &time,
        collector.connector(),
        channel.sender(),
        shipper_config(),
    );

    assert_eq!(store.boot_seq(), 5);

    block_on(async {
        // Offline: records accumulate, nothing leaves the device
        store.info("Zone 1 valve opened").await.unwrap();
        store.warning("Flow sensor silent").await.unwrap();
        time.tick(false).await;
        assert_eq!(
            shipper.cycle(false).await,
            CycleOutcome::Failed(DeliveryError::Connect)
        );
        assert_eq!(device.storage.lines(LEDGER_PATH).len(), 3);

        // Link comes up; sync starts but has not completed yet
        device.uptime.advance(5_000);
        time.tick(true).await;
        for seq in 0..3 {
            assert_eq!(
                shipper.cycle(true).await,
                CycleOutcome::Delivered { boot_seq: 5, seq }
            );
        }

        // Sync completes
        device.clock.set_unix_secs(SYNCED);
        time.tick(true).await;
        assert!(time.is_confident().await);

        device.uptime.advance(2_000);
        store.info("Zone 1 valve closed").await.unwrap();
        assert_eq!(
            shipper.cycle(true).await,
            CycleOutcome::Delivered { boot_seq: 5, seq: 3 }
        );

        device.uptime.advance(1_000);
        assert_eq!(shipper.cycle(true).await, CycleOutcome::Heartbeat);
    });

    let lines = sent(&collector);
    assert_eq!(lines.len(), 5);

    for (i, line) in lines[..3].iter().enumerate() {
        assert_eq!(line["boot_seq"], 5);
        assert_eq!(line["seq"], i as u64);
        assert!(line["ts"].is_null(), "record {} should have no timestamp", i);
    }
    assert_eq!(lines[0]["msg"], "Logger initialized, boot_seq=5");

    // Synced at uptime 5050; record written at 7050
    assert_eq!(lines[3]["seq"], 3);
    assert_eq!(lines[3]["ts"], "2025-11-13T12:00:02Z");

    assert_eq!(lines[4]["type"], "heartbeat");
    assert_eq!(lines[4]["ts"], "2025-11-13T12:00:03Z");
    assert!(lines[4].get("seq").is_none());

    assert!(device.storage.lines(LEDGER_PATH).is_empty());
}

#[test]
fn records_left_from_previous_boot_keep_their_own_anchor() {
    let storage = MemStorage::new(256 * 1024);
    let collector = MockCollector::new();

    // Boot 1 syncs, logs, then loses power before shipping
    {
        let (device, store, time) = Device::boot(storage.clone());
        block_on(async {
            time.tick(true).await;
            device.clock.set_unix_secs(SYNCED);
            time.tick(true).await;
            device.uptime.advance(60_000);
            store.error("Pump overcurrent").await.unwrap();
        });
    }

    // Boot 2 comes up without a sync
    let (_device, store, time) = Device::boot(storage.clone());
    assert_eq!(store.boot_seq(), 2);
    let channel = CommandChannel::<Raw, 4>::new();
    let mut shipper = Shipper::new(
        &store,
        &time,
        collector.connector(),
        channel.sender(),
        shipper_config(),
    );

    block_on(async {
        for seq in [0, 1, 0] {
            assert!(matches!(
                shipper.cycle(true).await,
                CycleOutcome::Delivered { seq: s, .. } if s == seq
            ));
        }
    });

    let lines = sent(&collector);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["msg"], "Pump overcurrent");
    assert_eq!(lines[1]["ts"], "2025-11-13T12:01:00Z");
    // Boot 2 never synced
    assert_eq!(lines[2]["boot_seq"], 2);
    assert!(lines[2]["ts"].is_null());
}

#[test]
fn corrupted_line_is_reported_and_skipped() {
    let storage = MemStorage::new(256 * 1024);
    let (device, store, time) = Device::boot(storage);
    let collector = MockCollector::new();
    let channel = CommandChannel::<Raw, 4>::new();
    let mut shipper = Shipper::new(
        &store,
        &time,
        collector.connector(),
        channel.sender(),
        shipper_config(),
    );

    block_on(async {
        store.info("before").await.unwrap();
    });
    let ledger = device.storage.contents(LEDGER_PATH).unwrap();
    let split = ledger.iter().position(|&b| b == b'\n').unwrap() + 1;
    let tampered = [&ledger[..split], &b"\x00\x01garbage\n"[..], &ledger[split..]].concat();
    device.storage.put(LEDGER_PATH, &tampered);

    block_on(async {
        assert!(matches!(shipper.cycle(true).await, CycleOutcome::Delivered { seq: 0, .. }));
        assert_eq!(shipper.cycle(true).await, CycleOutcome::CorruptDropped);
        assert!(matches!(shipper.cycle(true).await, CycleOutcome::Delivered { seq: 1, .. }));
    });

    let lines = sent(&collector);
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["level"], "error");
    assert!(lines[1]["msg"]
        .as_str()
        .unwrap()
        .starts_with("Corrupted log entry detected and skipped: "));
    assert_eq!(lines[2]["msg"], "before");
    assert!(device.storage.lines(LEDGER_PATH).is_empty());
}

#[test]
fn truncated_message_ships_with_its_note() {
    let storage = MemStorage::new(256 * 1024);
    let (device, store, _time) = Device::boot(storage);

    block_on(store.info(&"m".repeat(600))).unwrap();

    let ledger = device.storage.lines(LEDGER_PATH);
    assert_eq!(ledger.len(), 3);
    let stored: Value = serde_json::from_str(&ledger[1]).unwrap();
    assert_eq!(stored["msg"].as_str().unwrap().len(), 512);
    let note: Value = serde_json::from_str(&ledger[2]).unwrap();
    assert_eq!(note["level"], "error");
    assert!(note["msg"]
        .as_str()
        .unwrap()
        .starts_with("Log entry truncated (600 bytes)"));
}
