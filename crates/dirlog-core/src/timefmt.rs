//! Wall-clock time conversion for rotated filenames and ledger lines
//!
//! Two textual forms exist: the short form (`YYYYMMDD-HHMMSS`) used in
//! rotated filenames and history lines, and the long form
//! (`dd/Mon/YYYY:HH:MM:SS`) used in the ledger header. Both are local time.

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::constants::{TIME_FORMAT_LONG, TIME_FORMAT_SHORT};

/// Format an epoch as the short `YYYYMMDD-HHMMSS` form
pub fn format_short(epoch: i64) -> String {
    match Local.timestamp_opt(epoch, 0).single() {
        Some(dt) => dt.format(TIME_FORMAT_SHORT).to_string(),
        None => String::from("19700101-000000"),
    }
}

/// Format an epoch as the long `dd/Mon/YYYY:HH:MM:SS` form
pub fn format_long(epoch: i64) -> String {
    match Local.timestamp_opt(epoch, 0).single() {
        Some(dt) => dt.format(TIME_FORMAT_LONG).to_string(),
        None => String::from("01/Jan/1970:00:00:00"),
    }
}

/// Parse a short- or long-form timestamp back into an epoch.
///
/// Unparsable input yields 0, which callers must treat as "unknown —
/// assume now", never as a hard failure.
pub fn parse_log_time(text: &str) -> i64 {
    let trimmed = text.trim();
    let parsed = if trimmed.len() >= 15 && trimmed.as_bytes().get(8) == Some(&b'-') {
        // byte 15 may split a multibyte character in arbitrary input
        let Some(head) = trimmed.get(..15) else {
            return 0;
        };
        NaiveDateTime::parse_from_str(head, TIME_FORMAT_SHORT)
    } else if trimmed.contains('/') && trimmed.contains(':') {
        NaiveDateTime::parse_from_str(trimmed, TIME_FORMAT_LONG)
    } else {
        return 0;
    };
    let Ok(naive) = parsed else {
        return 0;
    };
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp(),
        None => 0,
    }
}

/// Current time as epoch seconds
pub fn now_epoch() -> i64 {
    Local::now().timestamp()
}
