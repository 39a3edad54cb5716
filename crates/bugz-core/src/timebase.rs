//! Relative integer timebase used for every stored timestamp.
//!
//! Values are whole seconds since 2009-03-02T00:00:00Z. An absent tracker
//! date maps to 0 so comparisons and storage stay plain integers.

use chrono::{DateTime, TimeZone, Utc};

/// 2009-03-02T00:00:00Z as a unix timestamp.
pub const EPOCH_UNIX_SECONDS: i64 = 1_235_952_000;

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH_UNIX_SECONDS, 0)
        .single()
        .unwrap_or_default()
}

pub fn timestamp(mark: Option<DateTime<Utc>>) -> i64 {
    mark.map_or(0, |mark| mark.timestamp() - EPOCH_UNIX_SECONDS)
}

pub fn date_of_timestamp(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(EPOCH_UNIX_SECONDS.checked_add(ts)?, 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_dates_resolve_to_zero() {
        assert_eq!(timestamp(None), 0);
        assert_eq!(timestamp(Some(epoch())), 0);
    }

    #[test]
    fn timestamps_are_seconds_since_epoch() {
        let mark = Utc
            .with_ymd_and_hms(2009, 3, 3, 0, 0, 30)
            .single()
            .expect("valid timestamp");
        let ts = timestamp(Some(mark));
        assert_eq!(ts, 86_430);
        assert_eq!(date_of_timestamp(ts), Some(mark));
    }
}
