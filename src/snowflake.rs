//! Conversion between platform snowflake IDs and timestamps
//!
//! A snowflake keeps milliseconds since the platform epoch in its upper 42
//! bits, so IDs sort by creation time and any instant maps to a position.

use chrono::{DateTime, TimeZone, Utc};

/// Platform epoch (2015-01-01T00:00:00Z) in Unix milliseconds
pub const EPOCH_MS: i64 = 1_420_070_400_000;

const TIMESTAMP_SHIFT: u32 = 22;

/// Returns the lowest snowflake that could have been created at `time`
///
/// Instants before the epoch map to zero.
pub fn from_datetime(time: DateTime<Utc>) -> u64 {
    let offset = time.timestamp_millis() - EPOCH_MS;
    if offset <= 0 {
        return 0;
    }

    (offset as u64) << TIMESTAMP_SHIFT
}

/// Returns the creation time encoded in a snowflake
pub fn to_datetime(id: u64) -> DateTime<Utc> {
    let millis = (id >> TIMESTAMP_SHIFT) as i64 + EPOCH_MS;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Synthetic position for "everything up to now"
pub fn now() -> u64 {
    from_datetime(Utc::now())
}
