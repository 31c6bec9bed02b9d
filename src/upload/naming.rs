//! Destination keys and log-friendly sizes.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Storage key for a file ingested at `at`: `YYYY/MM/DD/<file_name>`.
///
/// The date is the ingestion time, not the file's modification time.
pub fn destination_key<Tz>(at: &DateTime<Tz>, file_name: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{}/{}", at.format("%Y/%m/%d"), file_name)
}

/// Human-readable size in base-1024 units, rounded to two decimals.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    // floor(log1024(bytes)), clamped to the largest unit
    let mut unit = 0;
    while unit + 1 < SIZE_UNITS.len() && bytes >= 1024u64.pow(unit as u32 + 1) {
        unit += 1;
    }

    let value = bytes as f64 / 1024f64.powi(unit as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, SIZE_UNITS[unit])
}
