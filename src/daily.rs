//! Daily constants
//!
//! Everything the projection needs that depends only on the settings and the
//! local calendar day is computed once per day and reused for every reading
//! until the day rolls over or the settings change.

use crate::calendar;
use crate::error::Incomplete;
use crate::settings::{BodyProfile, Settings};
use crate::types::{MetricType, NOMINAL_DAY_MS};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// Days per year used to convert a date of birth to years
const DAYS_PER_YEAR: f64 = 365.2421;

/// Seconds per year used to convert today's start to years
const SECONDS_PER_YEAR: f64 = 3.155_691_8e7;

/// Basal metabolic rate in kcal per 24 hours.
///
/// Mifflin-St Jeor style estimate from weight (kg), height (cm), age (years)
/// and sex.
pub fn bmr_per_day(body: &BodyProfile, day_start: DateTime<Utc>) -> f64 {
    let dob_epoch_years = body.dob as f64 / DAYS_PER_YEAR;
    let today_epoch_years = day_start.timestamp() as f64 / SECONDS_PER_YEAR;
    let age_years = today_epoch_years - dob_epoch_years;
    let sex_offset = if body.is_male { 5.0 } else { -161.0 };
    9.99 * body.weight + 6.25 * body.height - 4.92 * age_years + sex_offset
}

/// Identifies the day and settings a set of constants was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyKey {
    pub date: NaiveDate,
    /// Local midnight as an instant; changes if the zone changes
    pub day_start: DateTime<Utc>,
    pub settings_version: u64,
}

/// Settings-derived values valid for one local calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyConstants {
    pub key: DailyKey,
    /// Real length of today (23, 24 or 25 hours)
    pub today_duration_ms: i64,
    /// Milliseconds by which today exceeds 24 hours
    pub today_excess_ms: i64,
    pub act_start: DateTime<Utc>,
    pub act_end: DateTime<Utc>,
    /// Real time from local midnight to the active period start
    pub act_start_offset_ms: i64,
    pub act_duration_ms: i64,
    /// Goal adjusted for today's real duration; excludes BMR when subtracted
    pub goal_today: f64,
    pub bmr_per_day: f64,
    /// Basal rate, units per ms
    pub bmr: f64,
    /// Basal rate used for passive tracking; zero when BMR is subtracted
    pub effective_bmr: f64,
    pub subtract_bmr: bool,
    /// Track rate during the active period, units per ms
    pub activity_track_rate: f64,
    /// Track accumulated before the active period
    pub track_before_act: f64,
    /// Track accumulated over the whole active period
    pub track_during_act: f64,
    /// Gauge range as a proportion of goal
    pub gauge_range: f64,
}

impl DailyConstants {
    /// Compute constants for `metric` on local day `date` in zone `tz`
    pub fn compute<Tz: TimeZone>(
        metric: MetricType,
        settings: &Settings,
        settings_version: u64,
        tz: &Tz,
        date: NaiveDate,
    ) -> Result<Self, Incomplete> {
        let goal = settings.completeness(metric)?;

        let day_start = calendar::start_of_day(tz, date);
        let key = DailyKey {
            date,
            day_start,
            settings_version,
        };

        // Times and durations
        let (act_start_time, act_end_time) = match (
            calendar::time_of_day(settings.act_start).filter(|_| settings.act_start < 86_400),
            calendar::time_of_day(settings.act_end),
        ) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                tracing::warn!(
                    %metric,
                    act_start = settings.act_start,
                    act_end = settings.act_end,
                    "active period outside the day"
                );
                return Err(Incomplete::InvalidActivePeriod);
            }
        };
        let act_start = calendar::at_local_time(tz, date, act_start_time);
        let act_end = calendar::at_local_time(tz, date, act_end_time);
        let act_start_offset_ms = (act_start - day_start).num_milliseconds();
        let act_duration_ms = (act_end - act_start).num_milliseconds();
        if act_duration_ms <= 0 {
            tracing::warn!(
                %metric,
                act_start = settings.act_start,
                act_end = settings.act_end,
                "active period is empty"
            );
            return Err(Incomplete::InvalidActivePeriod);
        }

        let today_duration_ms = calendar::day_duration_ms(tz, date);
        let today_excess_ms = today_duration_ms - NOMINAL_DAY_MS;

        // BMR
        let mut bmr_per_day = 0.0;
        let mut bmr = 0.0;
        let mut effective_bmr = 0.0;
        if metric == MetricType::Energy {
            let body = settings
                .body()
                .map_err(|parameter| Incomplete::MissingBodyParameter { parameter })?;
            bmr_per_day = self::bmr_per_day(&body, day_start);
            bmr = bmr_per_day / NOMINAL_DAY_MS as f64;
            if !settings.subtract_bmr {
                effective_bmr = bmr;
            }
        }

        // Goal
        let mut goal_today = goal + today_excess_ms as f64 * bmr;
        if bmr != 0.0 && settings.subtract_bmr {
            goal_today -= today_duration_ms as f64 * bmr;
        }
        if goal_today <= 0.0 {
            tracing::warn!(%metric, goal, goal_today, "today's goal is not positive");
            return Err(Incomplete::NonPositiveGoal);
        }

        // Track rate
        let mut activity_track_rate = (goal - bmr_per_day) / act_duration_ms as f64;
        if bmr != 0.0 && !settings.subtract_bmr {
            activity_track_rate += bmr;
        }
        let track_before_act = effective_bmr * act_start_offset_ms as f64;
        let track_during_act = activity_track_rate * act_duration_ms as f64;

        tracing::debug!(
            %metric,
            %date,
            today_duration_ms,
            goal_today,
            "recomputed daily constants"
        );

        Ok(Self {
            key,
            today_duration_ms,
            today_excess_ms,
            act_start,
            act_end,
            act_start_offset_ms,
            act_duration_ms,
            goal_today,
            bmr_per_day,
            bmr,
            effective_bmr,
            subtract_bmr: settings.subtract_bmr,
            activity_track_rate,
            track_before_act,
            track_during_act,
            gauge_range: settings.gauge_range(metric),
        })
    }

    /// Whether BMR accrued so far must be removed from a raw reading
    pub fn removes_bmr_from_readings(&self) -> bool {
        self.bmr != 0.0 && self.subtract_bmr
    }
}
