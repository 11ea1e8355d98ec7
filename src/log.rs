use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine<'a> {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: &'a str,
    event: &'a str,
    details: Value,
}

/// Writes one JSON log line to stderr.
pub fn emit_log(level: &str, event: &str, details: Value) {
    let line = StructuredLogLine {
        timestamp_ms: wall_clock_ms(),
        level,
        event,
        details,
    };
    match serde_json::to_string(&line) {
        Ok(text) => eprintln!("{text}"),
        Err(error) => eprintln!("[log] failed to serialize {event}: {error}"),
    }
}

pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
