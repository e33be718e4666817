//! Freshness rule for cached tables.

use chrono::{Duration, NaiveDateTime};

/// Threshold value meaning "always sync before reading".
pub const ALWAYS_SYNC: i64 = 0;

/// Threshold value meaning "never sync automatically".
pub const NEVER_AUTO_SYNC: i64 = -1;

/// Decide whether a table synced at `last_sync` is still fresh at `now`.
///
/// Rules, checked in this order:
/// - no previous sync: never fresh, whatever the threshold
/// - `threshold_minutes == 0`: never fresh
/// - `threshold_minutes < 0`: fresh, auto-sync is off once a table was synced
/// - otherwise fresh iff `now - last_sync <= threshold_minutes`
///
/// A threshold too large to represent as a duration counts as fresh.
/// Both timestamps are local naive time.
pub fn is_fresh(
    last_sync: Option<NaiveDateTime>,
    threshold_minutes: i64,
    now: NaiveDateTime,
) -> bool {
    let Some(last_sync) = last_sync else {
        return false;
    };
    if threshold_minutes < 0 {
        return true;
    }
    if threshold_minutes == ALWAYS_SYNC {
        return false;
    }
    match Duration::try_minutes(threshold_minutes) {
        Some(threshold) => now - last_sync <= threshold,
        None => true,
    }
}
