use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};

pub const WORK_HOURS_PER_DAY: f64 = 8.0;
/// Canonical calendar format accepted for range boundaries.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Counts Monday-to-Friday days in `[start, end]`. Zero when `end` precedes `start`.
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> u32 {
    if end < start {
        return 0;
    }

    let total_days = (end - start).num_days() + 1;
    let full_weeks = total_days / 7;
    let mut business_days = full_weeks * 5;

    let mut day = start + Duration::days(full_weeks * 7);
    for _ in 0..(total_days % 7) {
        if is_business_day(day) {
            business_days += 1;
        }
        day += Duration::days(1);
    }

    business_days as u32
}

/// Same as [`business_days_between`] after truncating both instants to their calendar day.
pub fn business_days_between_instants<Tz: TimeZone>(
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> u32 {
    business_days_between(start.date_naive(), end.date_naive())
}

pub fn expected_hours(business_days: u32) -> f64 {
    business_days as f64 * WORK_HOURS_PER_DAY
}

pub fn ms_to_hours(ms: f64) -> f64 {
    ms / 1000.0 / 3600.0
}

pub fn seconds_to_hours(seconds: i64) -> f64 {
    ms_to_hours(seconds as f64 * 1000.0)
}

/// Inclusive `[00:00, 24:00 - 1ns]` bounds of `date` in the zone `tz`.
///
/// An ambiguous local midnight resolves to the earlier instant; a midnight
/// skipped by a DST gap resolves to the post-transition instant.
pub fn day_bounds<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> (DateTime<Tz>, DateTime<Tz>) {
    let midnight = date.and_time(NaiveTime::MIN);
    let start = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => tz
            .from_local_datetime(&(midnight + Duration::hours(1)))
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&midnight)),
    };
    let end = start.clone() + Duration::days(1) - Duration::nanoseconds(1);
    (start, end)
}

pub fn epoch_millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub fn parse_date(value: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
}
