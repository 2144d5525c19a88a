//! Local-day arithmetic
//!
//! Days are measured in the user's own time zone, so a day can last 23 or 25
//! hours and a wall-clock time can be skipped or repeated around a DST
//! transition. Everything here converts local wall-clock values to absolute
//! instants before any durations are taken.

use crate::error::ComputeError;
use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};

/// Resolve a local wall-clock time to an instant.
///
/// A repeated time resolves to its earlier occurrence. A skipped time is
/// shifted later by the length of the gap, landing just after the transition.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Interpret with the offset in force before the gap
            let before = tz
                .offset_from_utc_datetime(&(local - Duration::hours(24)))
                .fix();
            let utc = local - Duration::seconds(i64::from(before.local_minus_utc()));
            Utc.from_utc_datetime(&utc)
        }
    }
}

/// Instant at which the local calendar day `date` begins
pub fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    resolve_local(tz, date.and_time(NaiveTime::MIN))
}

/// Instant of local time `time` on `date`
pub fn at_local_time<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    resolve_local(tz, date.and_time(time))
}

/// Real length of the local day `date` in milliseconds
pub fn day_duration_ms<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    let start = start_of_day(tz, date);
    let next = date
        .succ_opt()
        .map(|tomorrow| start_of_day(tz, tomorrow))
        .unwrap_or_else(|| start + Duration::days(1));
    (next - start).num_milliseconds()
}

/// Local time of day for a seconds-into-day setting.
///
/// Values of a full day or more mean the last representable instant of the
/// day. Negative values are rejected.
pub fn time_of_day(seconds: i32) -> Option<NaiveTime> {
    if seconds < 0 {
        return None;
    }
    if seconds >= 86_400 {
        return NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999);
    }
    NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0)
}

/// Look up an IANA zone name such as "Australia/Sydney"
pub fn parse_timezone(name: &str) -> Result<chrono_tz::Tz, ComputeError> {
    name.parse::<chrono_tz::Tz>()
        .map_err(|_| ComputeError::InvalidTimezone(name.to_string()))
}

/// Instant for epoch milliseconds, expressed in `tz`
pub fn instant_from_millis(
    millis: i64,
    tz: chrono_tz::Tz,
) -> Result<DateTime<chrono_tz::Tz>, ComputeError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|instant| instant.with_timezone(&tz))
        .ok_or_else(|| ComputeError::InvalidTimestamp(millis.to_string()))
}
