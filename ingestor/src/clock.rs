//! Wall-clock timestamps pinned to Western Indonesia Time (WIB, UTC+7).
//!
//! Rows are stamped at this fixed offset no matter where the worker is
//! deployed, so the stored `waktu` and what the dashboard shows agree.

use chrono::{DateTime, FixedOffset, Utc};

pub const WIB_OFFSET_SECS: i32 = 7 * 3600;

/// UTC+7. `east_opt` only fails outside ±24h, checked at compile time here.
pub const WIB: FixedOffset = match FixedOffset::east_opt(WIB_OFFSET_SECS) {
    Some(offset) => offset,
    None => panic!("WIB offset out of range"),
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Reads the system clock and shifts it to WIB.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&WIB)
    }
}

/// Human-readable form used in log lines, e.g. `2024-06-01 08:30:00 WIB`.
pub fn format_wib(ts: &DateTime<FixedOffset>) -> String {
    format!("{} WIB", ts.with_timezone(&WIB).format("%Y-%m-%d %H:%M:%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_system_clock_uses_wib_offset() {
        let now = SystemClock.now();
        assert_eq!(now.offset().local_minus_utc(), WIB_OFFSET_SECS);

        let drift = Utc::now().signed_duration_since(now.with_timezone(&Utc));
        assert!(drift.num_seconds().abs() < 5);
    }

    #[test]
    fn test_format_wib_converts_from_other_offsets() {
        let utc_midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ts = utc_midnight.fixed_offset();
        assert_eq!(format_wib(&ts), "2024-06-01 07:00:00 WIB");
    }
}
