//! The two timestamp conventions used by the cache, and the only places they
//! are converted.
//!
//! - Record timestamps (order creation, dividend payment, transaction time)
//!   come from the server with an offset. They are normalized to UTC and
//!   stored as fixed-width RFC 3339 text (`2024-01-15T10:30:00.000Z`), so
//!   lexical order equals chronological order.
//! - Sync timestamps record when this process finished a sync. They are local
//!   wall-clock time without offset and are only ever compared with
//!   `Local::now().naive_local()`.

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, SecondsFormat, Utc};

const SYNC_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

fn parse_naive(value: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_aware(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Record timestamps (UTC)
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a record timestamp from the API.
///
/// Offsets are honored and normalized to UTC. A timestamp without offset is
/// taken to be UTC already.
pub fn parse_record_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    parse_aware(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| parse_naive(value).map(|naive| naive.and_utc()))
}

/// Format a record timestamp for storage and ordering.
pub fn format_record_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync timestamps (local naive)
// ─────────────────────────────────────────────────────────────────────────────

/// Current local wall-clock time, the value written as `last_sync_at`.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Parse a stored sync timestamp.
///
/// Sync timestamps are written as local naive time. Values carrying an
/// offset (older writers) keep their wall-clock part and drop the offset.
pub fn parse_sync_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    parse_naive(value).or_else(|| parse_aware(value).map(|dt| dt.naive_local()))
}

pub fn format_sync_timestamp(value: &NaiveDateTime) -> String {
    value.format(SYNC_TIMESTAMP_FORMAT).to_string()
}
