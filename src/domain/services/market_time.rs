//! Exchange-local calendar arithmetic.
//!
//! The daily trade cap, daily summaries and the broker session expiry are all
//! scoped to the exchange-local calendar day (IST by default), expressed as a
//! fixed UTC offset in minutes.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

/// Exchange-local calendar date for an instant
pub fn local_day(at: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
    at.with_timezone(&offset(offset_minutes)).date_naive()
}

/// UTC bounds [start, end) of the exchange-local day containing `at`
pub fn local_day_bounds(at: DateTime<Utc>, offset_minutes: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let tz = offset(offset_minutes);
    let date = at.with_timezone(&tz).date_naive();
    let start = tz
        .from_local_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight"))
        .single()
        .expect("unambiguous for fixed offset")
        .with_timezone(&Utc);
    (start, start + Duration::days(1))
}

/// End of the exchange-local day (23:59:59) containing `at`, in UTC
pub fn local_day_end(at: DateTime<Utc>, offset_minutes: i32) -> DateTime<Utc> {
    let (start, _) = local_day_bounds(at, offset_minutes);
    start + Duration::days(1) - Duration::seconds(1)
}

/// Exchange-local hour of day (0..24) for an instant
pub fn local_hour(at: DateTime<Utc>, offset_minutes: i32) -> u32 {
    use chrono::Timelike;
    at.with_timezone(&offset(offset_minutes)).hour()
}

fn offset(offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_minutes * 60).expect("offset in range")
}
