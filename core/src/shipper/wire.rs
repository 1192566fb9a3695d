//! Collector wire format
//!
//! Device to collector, one JSON object per line, `ts` always present:
//!
//! ```json
//! {"boot_seq":5,"uptime_ms":1200,"seq":0,"level":"info","msg":"...","system":{...},"ts":null}
//! {"boot_seq":5,"uptime_ms":9000,"ts":"2025-11-13T12:00:07Z","type":"heartbeat","system":{...}}
//! ```
//!
//! Collector to device: `{"ack":1}` after every accepted line, and
//! `{"cmd":"<name>"}` at any time.

use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::calendar::Iso8601;
use crate::error::DeliveryError;
use crate::store::{EventRecord, Level, ResourceSnapshot};
use crate::time::EntryTime;

/// `ts` field value: ISO 8601 string or explicit null
pub fn timestamp(t: EntryTime) -> Option<String> {
    t.unix_secs().map(|secs| alloc::format!("{}", Iso8601(secs)))
}

#[derive(Serialize)]
struct RecordLine<'a> {
    boot_seq: u32,
    uptime_ms: u64,
    seq: u32,
    level: Level,
    msg: &'a str,
    system: &'a ResourceSnapshot,
    ts: Option<String>,
}

#[derive(Serialize)]
struct HeartbeatLine<'a> {
    boot_seq: u32,
    uptime_ms: u64,
    ts: Option<String>,
    #[serde(rename = "type")]
    kind: &'a str,
    system: &'a ResourceSnapshot,
}

#[derive(Serialize)]
struct DiagnosticLine<'a> {
    boot_seq: u32,
    uptime_ms: u64,
    ts: Option<String>,
    level: Level,
    msg: &'a str,
    system: &'a ResourceSnapshot,
}

fn finish<T: Serialize>(value: &T) -> Result<Vec<u8>, DeliveryError> {
    let mut line = serde_json::to_vec(value).map_err(|_| DeliveryError::Encode)?;
    line.push(b'\n');
    Ok(line)
}

/// Ledger record with its reconstructed timestamp
pub fn record_line(record: &EventRecord, ts: EntryTime) -> Result<Vec<u8>, DeliveryError> {
    finish(&RecordLine {
        boot_seq: record.boot_seq,
        uptime_ms: record.uptime_ms,
        seq: record.seq,
        level: record.level,
        msg: &record.msg,
        system: &record.system,
        ts: timestamp(ts),
    })
}

/// Unpersisted liveness line
pub fn heartbeat_line(
    boot_seq: u32,
    uptime_ms: u64,
    ts: EntryTime,
    system: &ResourceSnapshot,
) -> Result<Vec<u8>, DeliveryError> {
    finish(&HeartbeatLine {
        boot_seq,
        uptime_ms,
        ts: timestamp(ts),
        kind: "heartbeat",
        system,
    })
}

/// Longest slice of a corrupt line quoted in its diagnostic
pub const CORRUPT_SAMPLE_BYTES: usize = 100;

/// Error line reporting a ledger line that could not be parsed
pub fn corrupt_line_diagnostic(
    raw: &str,
    boot_seq: u32,
    uptime_ms: u64,
    ts: EntryTime,
    system: &ResourceSnapshot,
) -> Result<Vec<u8>, DeliveryError> {
    let (sample, cut) = crate::store::truncate_message(raw, CORRUPT_SAMPLE_BYTES);
    let msg = alloc::format!(
        "Corrupted log entry detected and skipped: {}{}",
        sample,
        if cut { "..." } else { "" }
    );
    finish(&DiagnosticLine {
        boot_seq,
        uptime_ms,
        ts: timestamp(ts),
        level: Level::Error,
        msg: &msg,
        system,
    })
}

/// What one inbound line turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    Ack,
    Command(&'a str),
    Other,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    ack: Option<i64>,
    #[serde(borrow)]
    cmd: Option<&'a str>,
}

/// Classify one line received from the collector (without its newline)
pub fn parse_inbound(line: &[u8]) -> Inbound<'_> {
    let line = trim_line(line);
    match serde_json::from_slice::<Envelope<'_>>(line) {
        Ok(Envelope { ack: Some(1), .. }) => Inbound::Ack,
        Ok(Envelope { cmd: Some(name), .. }) if !name.is_empty() => Inbound::Command(name),
        _ => Inbound::Other,
    }
}

fn trim_line(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\r' | b' '] = line {
        line = rest;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn record() -> EventRecord {
        EventRecord {
            boot_seq: 5,
            uptime_ms: 1_200,
            seq: 3,
            level: Level::Info,
            msg: "Valve 2 closed".into(),
            system: ResourceSnapshot::default(),
        }
    }

    fn json(line: &[u8]) -> Value {
        assert_eq!(line.last(), Some(&b'\n'));
        serde_json::from_slice(&line[..line.len() - 1]).unwrap()
    }

    #[test]
    fn record_carries_explicit_null_ts() {
        let v = json(&record_line(&record(), EntryTime::Unknown).unwrap());
        assert_eq!(v["seq"], 3);
        assert_eq!(v["level"], "info");
        assert!(v.get("ts").unwrap().is_null());
        assert!(v["system"].get("free_psram").is_some());
    }

    #[test]
    fn record_carries_iso_ts() {
        let v = json(&record_line(&record(), EntryTime::At(1_763_035_260)).unwrap());
        assert_eq!(v["ts"], "2025-11-13T12:01:00Z");
    }

    #[test]
    fn heartbeat_is_typed() {
        let v = json(&heartbeat_line(5, 9_000, EntryTime::At(0), &ResourceSnapshot::default()).unwrap());
        assert_eq!(v["type"], "heartbeat");
        assert_eq!(v["ts"], "1970-01-01T00:00:00Z");
        assert!(v.get("seq").is_none());
    }

    #[test]
    fn diagnostic_quotes_a_bounded_sample() {
        let raw = "z".repeat(150);
        let v = json(
            &corrupt_line_diagnostic(&raw, 5, 10, EntryTime::Unknown, &ResourceSnapshot::default())
                .unwrap(),
        );
        assert_eq!(v["level"], "error");
        assert_eq!(
            v["msg"],
            format!("Corrupted log entry detected and skipped: {}...", "z".repeat(100))
        );

        let v = json(
            &corrupt_line_diagnostic("{oops", 5, 10, EntryTime::Unknown, &ResourceSnapshot::default())
                .unwrap(),
        );
        assert_eq!(v["msg"], "Corrupted log entry detected and skipped: {oops");
    }

    #[test]
    fn classifies_inbound_lines() {
        assert_eq!(parse_inbound(br#"{"ack":1}"#), Inbound::Ack);
        assert_eq!(parse_inbound(b"{\"ack\":1}\r"), Inbound::Ack);
        assert_eq!(parse_inbound(br#"{"cmd":"status"}"#), Inbound::Command("status"));
        assert_eq!(parse_inbound(br#"{"ack":0}"#), Inbound::Other);
        assert_eq!(parse_inbound(br#"{"nack":1}"#), Inbound::Other);
        assert_eq!(parse_inbound(br#"{"cmd":""}"#), Inbound::Other);
        assert_eq!(parse_inbound(b"ok"), Inbound::Other);
    }
}
