//! Metric engine
//!
//! One [`MetricEngine`] exists per metric. It holds the latest settings
//! snapshot, caches the constants for the current local day and answers
//! tracking queries for any instant.

use crate::calendar;
use crate::daily::{DailyConstants, DailyKey};
use crate::error::TrackResult;
use crate::format::{self, NumberFormat};
use crate::settings::{Settings, SettingsProvider};
use crate::types::{
    CardData, ComplicationData, DetailData, Direction, MetricProfile, MetricType, MetricView,
    Projection, RelativeProgress, TileData, ViewKind,
};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Settings together with everything derived from them at apply time
#[derive(Debug)]
struct AppliedSettings {
    settings: Settings,
    version: u64,
    number_format: NumberFormat,
}

impl AppliedSettings {
    fn new(metric: MetricType, settings: Settings, version: u64) -> Self {
        let number_format = NumberFormat::for_settings(metric.profile(), &settings);
        Self {
            settings,
            version,
            number_format,
        }
    }
}

/// Outcome of the last daily computation, failures included
#[derive(Debug)]
struct CachedDay {
    key: DailyKey,
    outcome: TrackResult<Arc<DailyConstants>>,
}

/// Everything a single query needs, taken from one settings snapshot
struct Evaluation {
    applied: Arc<AppliedSettings>,
    constants: Arc<DailyConstants>,
    projection: Projection,
}

/// Tracking engine for one metric.
///
/// All methods take `&self`; the engine can be shared between threads and
/// settings can be applied while queries are in flight. A query observes
/// either the settings before or after a concurrent update, never a mix.
#[derive(Debug)]
pub struct MetricEngine {
    metric: MetricType,
    applied: RwLock<Arc<AppliedSettings>>,
    versions: AtomicU64,
    daily: Mutex<Option<CachedDay>>,
}

impl MetricEngine {
    /// Create an engine with default settings
    pub fn new(metric: MetricType) -> Self {
        Self::with_settings(metric, Settings::default())
    }

    pub fn with_settings(metric: MetricType, settings: Settings) -> Self {
        Self {
            metric,
            applied: RwLock::new(Arc::new(AppliedSettings::new(metric, settings, 0))),
            versions: AtomicU64::new(0),
            daily: Mutex::new(None),
        }
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    pub fn profile(&self) -> &'static MetricProfile {
        self.metric.profile()
    }

    /// Copy of the settings currently in use
    pub fn settings(&self) -> Settings {
        self.snapshot().settings.clone()
    }

    /// Replace the settings.
    ///
    /// Cached daily constants are invalidated; they are recomputed by the next
    /// query rather than here.
    pub fn apply_settings(&self, settings: Settings) {
        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = settings.timestamp;
        let applied = Arc::new(AppliedSettings::new(self.metric, settings, version));
        *self.applied.write().unwrap_or_else(PoisonError::into_inner) = applied;
        tracing::debug!(metric = %self.metric, version, timestamp, "applied settings");
    }

    /// Whether a store last modified at `store_timestamp` holds newer settings
    pub fn is_stale(&self, store_timestamp: i64) -> bool {
        store_timestamp > self.snapshot().settings.timestamp
    }

    /// Pull settings from `provider` if they are newer than ours.
    ///
    /// Returns true when settings were applied.
    pub fn sync_with(&self, provider: &dyn SettingsProvider) -> bool {
        if !self.is_stale(provider.last_modified()) {
            return false;
        }
        self.apply_settings(provider.current_settings());
        true
    }

    /// Key of the cached local day, if any day has been computed
    pub fn cached_day(&self) -> Option<DailyKey> {
        self.daily
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|cached| cached.key)
    }

    /// On-track value at `instant`
    pub fn projected_track<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> TrackResult<Projection> {
        self.evaluate(instant).map(|evaluation| evaluation.projection)
    }

    /// How far `achieved` is ahead of the track at `instant`
    pub fn relative_progress<Tz: TimeZone>(
        &self,
        achieved: f64,
        instant: &DateTime<Tz>,
    ) -> TrackResult<RelativeProgress> {
        let evaluation = self.evaluate(instant)?;
        Ok(relative(&evaluation, achieved))
    }

    pub fn card_view<Tz: TimeZone>(
        &self,
        achieved: f64,
        instant: &DateTime<Tz>,
    ) -> TrackResult<CardData> {
        let evaluation = self.evaluate(instant)?;
        let progress = relative(&evaluation, achieved);
        let number_format = &evaluation.applied.number_format;

        let mut ahead_string = number_format.format(progress.ahead, true, true);
        if let Some(abbrev) = number_format.unit_abbrev {
            ahead_string.push(' ');
            ahead_string.push_str(abbrev);
        }

        Ok(CardData {
            rel_proportion: progress.fraction / evaluation.constants.gauge_range,
            ahead_string,
            ahead_percent_string: format::format_percent(progress.fraction),
        })
    }

    pub fn complication_view<Tz: TimeZone>(
        &self,
        achieved: f64,
        instant: &DateTime<Tz>,
    ) -> TrackResult<ComplicationData> {
        let evaluation = self.evaluate(instant)?;
        let progress = relative(&evaluation, achieved);
        let (direction, ahead_string) =
            split_sign(evaluation.applied.number_format.format(progress.ahead, false, false));

        Ok(ComplicationData {
            rel_proportion: progress.fraction / evaluation.constants.gauge_range,
            ahead_string,
            ahead_behind: direction.glyph().to_string(),
            direction,
        })
    }

    pub fn tile_view<Tz: TimeZone>(
        &self,
        achieved: f64,
        instant: &DateTime<Tz>,
    ) -> TrackResult<TileData> {
        let evaluation = self.evaluate(instant)?;
        let progress = relative(&evaluation, achieved);
        let number_format = &evaluation.applied.number_format;
        let (direction, ahead_string) = split_sign(number_format.format(progress.ahead, true, false));

        let ahead_behind = match number_format.unit_abbrev {
            Some(abbrev) => format!("{abbrev} {}", direction.word()),
            None => direction.word().to_string(),
        };

        Ok(TileData {
            rel_proportion: progress.fraction / evaluation.constants.gauge_range,
            ahead_string,
            ahead_behind,
            direction,
        })
    }

    pub fn detail_view<Tz: TimeZone>(
        &self,
        achieved: f64,
        instant: &DateTime<Tz>,
    ) -> TrackResult<DetailData> {
        let evaluation = self.evaluate(instant)?;
        let c = &evaluation.constants;
        let elapsed = evaluation.projection.elapsed_today_ms as f64;
        let day = c.today_duration_ms as f64;

        let mut coast_at_day_start = c.goal_today;
        let mut track_at_act_start = 0.0;
        let mut track_at_act_end = c.goal_today;
        let mut coast_at_achiev_time = c.goal_today;
        let mut achiev_value = achieved;

        if self.metric == MetricType::Energy {
            if c.subtract_bmr {
                achiev_value -= c.bmr * elapsed;
            } else {
                coast_at_day_start -= c.bmr * day;
                track_at_act_start = c.bmr * c.act_start_offset_ms as f64;
                let after_act = c.today_duration_ms - c.act_start_offset_ms - c.act_duration_ms;
                track_at_act_end = c.goal_today - c.bmr * after_act as f64;
                coast_at_achiev_time = coast_at_day_start + c.bmr * elapsed;
            }
        }

        Ok(DetailData {
            act_start: c.act_start_offset_ms as f64 / day,
            act_end: (c.act_start_offset_ms + c.act_duration_ms) as f64 / day,
            coast_at_day_start,
            track_at_act_start,
            track_at_act_end,
            goal: c.goal_today,
            achiev_time: elapsed / day,
            achiev_value,
            track_at_achiev_time: evaluation.projection.track,
            coast_at_achiev_time,
        })
    }

    /// Produce the view of the requested kind
    pub fn render<Tz: TimeZone>(
        &self,
        kind: ViewKind,
        achieved: f64,
        instant: &DateTime<Tz>,
    ) -> TrackResult<MetricView> {
        Ok(match kind {
            ViewKind::Card => MetricView::Card(self.card_view(achieved, instant)?),
            ViewKind::Complication => {
                MetricView::Complication(self.complication_view(achieved, instant)?)
            }
            ViewKind::Tile => MetricView::Tile(self.tile_view(achieved, instant)?),
            ViewKind::Detail => MetricView::Detail(self.detail_view(achieved, instant)?),
        })
    }

    /// Format a native-unit value in the user's display unit
    pub fn format_number(&self, value: f64, use_thousands_separator: bool, force_sign: bool) -> String {
        self.snapshot()
            .number_format
            .format(value, use_thousands_separator, force_sign)
    }

    pub fn format_number_with_unit(&self, value: f64) -> String {
        self.snapshot().number_format.format_with_unit(value)
    }

    /// Qualifier shown next to energy values
    pub fn bmr_label(&self) -> Option<&'static str> {
        if self.metric != MetricType::Energy {
            return None;
        }
        if self.snapshot().settings.subtract_bmr {
            Some("(excluding BMR)")
        } else {
            Some("(including BMR)")
        }
    }

    /// Whether the detail screen's coast line can differ from the goal
    pub fn includes_coast(&self) -> bool {
        self.metric == MetricType::Energy && !self.snapshot().settings.subtract_bmr
    }

    fn snapshot(&self) -> Arc<AppliedSettings> {
        Arc::clone(&self.applied.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn evaluate<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> TrackResult<Evaluation> {
        let applied = self.snapshot();
        let constants = self.daily_constants(&applied, instant)?;
        let projection = project(&constants, instant.with_timezone(&Utc));
        Ok(Evaluation {
            applied,
            constants,
            projection,
        })
    }

    /// Constants for the local day containing `instant`, recomputed when the
    /// day, the zone's midnight or the settings differ from the cached ones
    fn daily_constants<Tz: TimeZone>(
        &self,
        applied: &AppliedSettings,
        instant: &DateTime<Tz>,
    ) -> TrackResult<Arc<DailyConstants>> {
        let tz = instant.timezone();
        let date = instant.date_naive();
        let key = DailyKey {
            date,
            day_start: calendar::start_of_day(&tz, date),
            settings_version: applied.version,
        };

        let mut cache = self.daily.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.as_ref().filter(|cached| cached.key == key) {
            return cached.outcome.clone();
        }

        let outcome = DailyConstants::compute(self.metric, &applied.settings, applied.version, &tz, date)
            .map(Arc::new);
        if let Err(reason) = &outcome {
            tracing::debug!(metric = %self.metric, %date, %reason, "metric cannot be tracked");
        }
        *cache = Some(CachedDay {
            key,
            outcome: outcome.clone(),
        });
        outcome
    }
}

/// Piecewise-linear track at `instant`
fn project(c: &DailyConstants, instant: DateTime<Utc>) -> Projection {
    let elapsed_today_ms = (instant - c.key.day_start).num_milliseconds();
    let beyond_start = (instant - c.act_start).num_milliseconds();

    let track = if beyond_start <= 0 {
        elapsed_today_ms as f64 * c.effective_bmr
    } else {
        let beyond_end = (instant - c.act_end).num_milliseconds();
        if beyond_end >= 0 {
            c.effective_bmr * (c.act_start_offset_ms + beyond_end) as f64 + c.track_during_act
        } else {
            c.track_before_act + c.activity_track_rate * beyond_start as f64
        }
    };

    Projection {
        track,
        elapsed_today_ms,
    }
}

fn relative(evaluation: &Evaluation, achieved: f64) -> RelativeProgress {
    let c = &evaluation.constants;
    let mut ahead = achieved - evaluation.projection.track;
    if c.removes_bmr_from_readings() {
        ahead -= c.bmr * evaluation.projection.elapsed_today_ms as f64;
    }
    RelativeProgress {
        ahead,
        fraction: ahead / c.goal_today,
    }
}

/// Direction from a formatted delta, and the delta without its sign.
///
/// A delta that rounds to zero counts as ahead.
fn split_sign(text: String) -> (Direction, String) {
    match text.strip_prefix('-') {
        Some(magnitude) => (Direction::Behind, magnitude.to_string()),
        None => (Direction::Ahead, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BodyParameter, Incomplete};
    use crate::settings::{Goals, SettingsStore};
    use chrono::Duration;
    use chrono_tz::America::New_York;
    use chrono_tz::Australia::Sydney;
    use pretty_assertions::assert_eq;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn energy_settings(subtract_bmr: bool) -> Settings {
        Settings {
            goals: Goals {
                energy: Some(2500.0),
                ..Goals::default()
            },
            subtract_bmr,
            is_male: Some(false),
            dob: Some(7300),
            height: Some(165.0),
            weight: Some(60.0),
            ..Settings::default()
        }
    }

    fn distance_settings() -> Settings {
        Settings {
            goals: Goals {
                distance: Some(8000.0),
                ..Goals::default()
            },
            ..Settings::default()
        }
    }

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {expected} ± {tolerance}, got {actual}"
        );
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MetricEngine>();
    }

    #[test]
    fn test_unset_goal_is_incomplete_for_every_view() {
        let engine = MetricEngine::new(MetricType::Distance);
        let at = utc(2024, 1, 15, 12, 0, 0);
        let expected = Incomplete::GoalUnset {
            metric: MetricType::Distance,
        };

        assert_eq!(engine.projected_track(&at), Err(expected));
        assert_eq!(engine.relative_progress(1.0, &at), Err(expected));
        for kind in ViewKind::ALL {
            assert_eq!(engine.render(kind, 1.0, &at), Err(expected));
        }
    }

    #[test]
    fn test_energy_needs_body_parameters() {
        let mut settings = energy_settings(false);
        settings.dob = None;
        let engine = MetricEngine::with_settings(MetricType::Energy, settings);

        assert_eq!(
            engine.card_view(500.0, &utc(2024, 1, 15, 12, 0, 0)),
            Err(Incomplete::MissingBodyParameter {
                parameter: BodyParameter::DateOfBirth
            })
        );
    }

    #[test]
    fn test_track_continuous_at_active_period_boundaries() {
        for (metric, settings) in [
            (MetricType::Steps, Settings::default()),
            (MetricType::Energy, energy_settings(false)),
            (MetricType::Energy, energy_settings(true)),
        ] {
            let engine = MetricEngine::with_settings(metric, settings);
            for boundary in [utc(2024, 1, 15, 6, 0, 0), utc(2024, 1, 15, 18, 0, 0)] {
                let before = engine.projected_track(&(boundary - Duration::milliseconds(1)));
                let at = engine.projected_track(&boundary);
                let after = engine.projected_track(&(boundary + Duration::milliseconds(1)));
                let (before, at, after) = (
                    before.unwrap().track,
                    at.unwrap().track,
                    after.unwrap().track,
                );
                assert_close(before, at, 0.01);
                assert_close(after, at, 0.01);
            }
        }
    }

    #[test]
    fn test_on_track_reading_is_zero_ahead() {
        let engine = MetricEngine::with_settings(MetricType::Energy, energy_settings(false));
        for hour in [0, 3, 6, 9, 12, 17, 18, 21, 23] {
            let at = utc(2024, 1, 15, hour, 20, 0);
            let track = engine.projected_track(&at).unwrap().track;
            let progress = engine.relative_progress(track, &at).unwrap();
            assert_close(progress.ahead, 0.0, 1e-9);
            assert_close(progress.fraction, 0.0, 1e-12);
        }
    }

    #[test]
    fn test_energy_track_starts_at_zero() {
        let settings = Settings {
            goals: Goals {
                energy: Some(2000.0),
                ..Goals::default()
            },
            is_male: Some(true),
            // Born 1994-01-01, so 30 at the time of the reading
            dob: Some(8766),
            height: Some(175.0),
            weight: Some(70.0),
            ..Settings::default()
        };
        let engine = MetricEngine::with_settings(MetricType::Energy, settings);
        let midnight = New_York.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();

        let projection = engine.projected_track(&midnight).unwrap();
        assert_eq!(projection.track, 0.0);
        assert_eq!(projection.elapsed_today_ms, 0);

        let later = engine
            .projected_track(&(midnight + Duration::minutes(1)))
            .unwrap();
        assert!(later.track > 0.0);
    }

    #[test]
    fn test_steps_halfway_at_noon() {
        let engine = MetricEngine::new(MetricType::Steps);
        let noon = utc(2024, 1, 15, 12, 0, 0);

        assert_close(engine.projected_track(&noon).unwrap().track, 5000.0, 1e-6);

        let card = engine.card_view(5000.0, &noon).unwrap();
        assert_eq!(card.ahead_string, "+0");
        assert_eq!(card.ahead_percent_string, "+0%");

        let complication = engine.complication_view(5000.0, &noon).unwrap();
        assert_eq!(complication.ahead_string, "0");
        assert_eq!(complication.direction, Direction::Ahead);
    }

    #[test]
    fn test_views_ahead() {
        let engine = MetricEngine::new(MetricType::Steps);
        let noon = utc(2024, 1, 15, 12, 0, 0);

        let card = engine.card_view(6000.0, &noon).unwrap();
        assert_eq!(card.ahead_string, "+1,000");
        assert_eq!(card.ahead_percent_string, "+10%");
        // 10% of goal against a 50% gauge range
        assert_close(card.rel_proportion, 0.2, 1e-9);

        let complication = engine.complication_view(6000.0, &noon).unwrap();
        assert_eq!(complication.ahead_string, "1000");
        assert_eq!(complication.ahead_behind, "▲");

        let tile = engine.tile_view(6000.0, &noon).unwrap();
        assert_eq!(tile.ahead_string, "1,000");
        assert_eq!(tile.ahead_behind, "ahead");
    }

    #[test]
    fn test_views_behind_with_unit() {
        let engine = MetricEngine::with_settings(MetricType::Distance, distance_settings());
        let noon = utc(2024, 1, 15, 12, 0, 0);

        // Track is 4000 m at noon
        let card = engine.card_view(2500.0, &noon).unwrap();
        assert_eq!(card.ahead_string, "-1.50 km");
        assert_eq!(card.ahead_percent_string, "-19%");

        let complication = engine.complication_view(2500.0, &noon).unwrap();
        assert_eq!(complication.ahead_string, "1.50");
        assert_eq!(complication.ahead_behind, "▼");
        assert_eq!(complication.direction, Direction::Behind);

        let tile = engine.tile_view(2500.0, &noon).unwrap();
        assert_eq!(tile.ahead_string, "1.50");
        assert_eq!(tile.ahead_behind, "km behind");
        assert_eq!(tile.direction, Direction::Behind);
    }

    #[test]
    fn test_detail_for_steps() {
        let engine = MetricEngine::new(MetricType::Steps);
        let detail = engine
            .detail_view(4000.0, &utc(2024, 1, 15, 12, 0, 0))
            .unwrap();

        assert_eq!(detail.act_start, 0.25);
        assert_eq!(detail.act_end, 0.75);
        assert_eq!(detail.achiev_time, 0.5);
        assert_eq!(detail.achiev_value, 4000.0);
        assert_eq!(detail.goal, 10_000.0);
        assert_eq!(detail.coast_at_day_start, 10_000.0);
        assert_eq!(detail.coast_at_achiev_time, 10_000.0);
        assert_eq!(detail.track_at_act_start, 0.0);
        assert_eq!(detail.track_at_act_end, 10_000.0);
        assert_close(detail.track_at_achiev_time, 5000.0, 1e-6);
    }

    #[test]
    fn test_detail_for_energy_including_bmr() {
        let engine = MetricEngine::with_settings(MetricType::Energy, energy_settings(false));
        assert!(engine.includes_coast());
        assert_eq!(engine.bmr_label(), Some("(including BMR)"));

        let at = utc(2024, 1, 15, 12, 0, 0);
        let detail = engine.detail_view(1500.0, &at).unwrap();
        let track = engine.projected_track(&at).unwrap().track;

        // Basal accrual before the active period matches the track at its start
        let at_act_start = engine.projected_track(&utc(2024, 1, 15, 6, 0, 0)).unwrap();
        assert_close(detail.track_at_act_start, at_act_start.track, 1e-6);
        assert_close(detail.track_at_achiev_time, track, 1e-9);
        assert!(detail.coast_at_day_start < detail.goal);
        // Six hours of basal burn before the active period, twelve by noon
        assert_close(
            detail.coast_at_achiev_time - detail.coast_at_day_start,
            2.0 * detail.track_at_act_start,
            1e-6,
        );
        // Coast and track meet again at the end of the day
        assert_close(
            detail.goal - detail.coast_at_day_start,
            4.0 * detail.track_at_act_start,
            1e-6,
        );
        assert_eq!(detail.achiev_value, 1500.0);
    }

    #[test]
    fn test_detail_for_energy_excluding_bmr() {
        let engine = MetricEngine::with_settings(MetricType::Energy, energy_settings(true));
        assert!(!engine.includes_coast());
        assert_eq!(engine.bmr_label(), Some("(excluding BMR)"));

        let detail = engine
            .detail_view(1500.0, &utc(2024, 1, 15, 12, 0, 0))
            .unwrap();
        // Half a day of basal burn is removed from the reading
        assert!(detail.achiev_value < 1500.0);
        assert_eq!(detail.coast_at_day_start, detail.goal);
        assert_eq!(detail.track_at_act_start, 0.0);
    }

    #[test]
    fn test_relative_progress_excluding_bmr() {
        let settings = energy_settings(true);
        let noon = utc(2024, 1, 15, 12, 0, 0);
        let constants = DailyConstants::compute(
            MetricType::Energy,
            &settings,
            0,
            &Utc,
            noon.date_naive(),
        )
        .unwrap();
        let engine = MetricEngine::with_settings(MetricType::Energy, settings);

        // A reading that includes basal burn sits behind the track by the
        // burn accumulated since midnight
        let track = engine.projected_track(&noon).unwrap().track;
        let progress = engine.relative_progress(track, &noon).unwrap();
        assert_close(progress.ahead, -constants.bmr * 43_200_000.0, 1e-6);
        assert!(progress.ahead < 0.0);
        assert_close(progress.fraction, progress.ahead / constants.goal_today, 1e-12);
    }

    #[test]
    fn test_end_of_day_track_reaches_goal() {
        for subtract_bmr in [false, true] {
            let engine =
                MetricEngine::with_settings(MetricType::Energy, energy_settings(subtract_bmr));
            let last = utc(2024, 1, 15, 23, 59, 59) + Duration::milliseconds(999);
            let track = engine.projected_track(&last).unwrap().track;
            let goal = engine.detail_view(0.0, &last).unwrap().goal;
            assert_close(track, goal, 0.01);
        }
    }

    #[test]
    fn test_spring_forward_day() {
        let engine = MetricEngine::new(MetricType::Steps);
        let evening = New_York.with_ymd_and_hms(2024, 3, 10, 23, 0, 0).unwrap();

        let projection = engine.projected_track(&evening).unwrap();
        assert_eq!(projection.elapsed_today_ms, 22 * 3_600_000);
        assert_close(projection.track, 10_000.0, 1e-6);

        let detail = engine.detail_view(0.0, &evening).unwrap();
        assert_close(detail.achiev_time, 22.0 / 23.0, 1e-12);
        // 6 am is only five real hours into the day
        assert_close(detail.act_start, 5.0 / 23.0, 1e-12);
    }

    #[test]
    fn test_fall_back_day() {
        let engine = MetricEngine::with_settings(MetricType::Energy, energy_settings(false));
        let evening = Sydney.with_ymd_and_hms(2024, 4, 7, 23, 0, 0).unwrap();

        let projection = engine.projected_track(&evening).unwrap();
        assert_eq!(projection.elapsed_today_ms, 24 * 3_600_000);

        let constants_day = engine.cached_day().unwrap();
        assert_eq!(constants_day.date, evening.date_naive());

        // The extra hour raises today's goal by an hour of basal burn
        let detail = engine.detail_view(0.0, &evening).unwrap();
        assert!(detail.goal > 2500.0);
        assert_close(detail.achiev_time, 24.0 / 25.0, 1e-12);
    }

    #[test]
    fn test_apply_settings_is_idempotent() {
        let engine = MetricEngine::new(MetricType::Distance);
        let at = utc(2024, 1, 15, 15, 30, 0);
        let settings = energy_settings(false);

        engine.apply_settings(settings.clone());
        let first = engine.render(ViewKind::Tile, 4200.0, &at);
        engine.apply_settings(settings);
        let second = engine.render(ViewKind::Tile, 4200.0, &at);

        assert!(first.is_ok());
        assert_eq!(first, second);
    }

    #[test]
    fn test_cache_follows_day_and_settings() {
        let engine = MetricEngine::new(MetricType::Steps);
        assert_eq!(engine.cached_day(), None);

        engine.projected_track(&utc(2024, 1, 15, 9, 0, 0)).unwrap();
        let first = engine.cached_day().unwrap();
        assert_eq!(first.settings_version, 0);

        // Same day reuses the key
        engine.projected_track(&utc(2024, 1, 15, 10, 0, 0)).unwrap();
        assert_eq!(engine.cached_day(), Some(first));

        // Rollover recomputes
        engine.projected_track(&utc(2024, 1, 16, 1, 0, 0)).unwrap();
        let second = engine.cached_day().unwrap();
        assert_eq!(second.day_start - first.day_start, Duration::days(1));

        // New settings recompute, and take effect immediately
        let mut settings = Settings::default();
        settings.goals.steps = Some(20_000.0);
        engine.apply_settings(settings);
        let track = engine.projected_track(&utc(2024, 1, 16, 12, 0, 0)).unwrap();
        assert_close(track.track, 10_000.0, 1e-6);
        assert_eq!(engine.cached_day().unwrap().settings_version, 1);

        // Going back a day recomputes rather than reusing tomorrow's constants
        engine.projected_track(&utc(2024, 1, 15, 12, 0, 0)).unwrap();
        assert_eq!(engine.cached_day().unwrap().date, first.date);
    }

    #[test]
    fn test_zone_change_recomputes() {
        let engine = MetricEngine::new(MetricType::Steps);
        let instant = utc(2024, 1, 15, 20, 0, 0);

        let in_utc = engine.projected_track(&instant).unwrap();
        let in_new_york = engine
            .projected_track(&instant.with_timezone(&New_York))
            .unwrap();

        // 8 pm UTC is 3 pm in New York: past the active period in one zone only
        assert_close(in_utc.track, 10_000.0, 1e-6);
        assert_close(in_new_york.track, 7500.0, 1e-6);
    }

    #[test]
    fn test_staleness_and_sync() {
        let store = SettingsStore::default();
        let engine = MetricEngine::new(MetricType::Energy);
        assert!(!engine.sync_with(&store));

        store.replace(energy_settings(false), utc(2024, 1, 15, 8, 0, 0));
        assert!(engine.is_stale(store.last_modified()));
        assert!(engine.sync_with(&store));
        assert!(!engine.is_stale(store.last_modified()));
        assert!(!engine.sync_with(&store));

        assert!(engine.card_view(0.0, &utc(2024, 1, 15, 9, 0, 0)).is_ok());
    }

    #[test]
    fn test_format_follows_units() {
        let engine = MetricEngine::new(MetricType::Energy);
        assert_eq!(engine.format_number_with_unit(1234.4), "1,234 Cal");

        engine.apply_settings(Settings {
            is_kj: true,
            ..Settings::default()
        });
        assert_eq!(engine.format_number_with_unit(1000.0), "4,184 kJ");
        assert_eq!(engine.format_number(1000.0, false, true), "+4184");

        let steps = MetricEngine::new(MetricType::Steps);
        assert_eq!(steps.bmr_label(), None);
        assert!(!steps.includes_coast());
        assert_eq!(steps.format_number_with_unit(12_345.0), "12,345");
    }

    #[test]
    fn test_incomplete_recovers_after_fix() {
        let mut settings = energy_settings(true);
        settings.goals.energy = Some(800.0);
        let engine = MetricEngine::with_settings(MetricType::Energy, settings.clone());
        let at = utc(2024, 1, 15, 12, 0, 0);

        assert_eq!(engine.card_view(0.0, &at), Err(Incomplete::NonPositiveGoal));
        // Cached failure is served again without recomputing
        assert_eq!(engine.card_view(0.0, &at), Err(Incomplete::NonPositiveGoal));

        settings.goals.energy = Some(2500.0);
        engine.apply_settings(settings);
        assert!(engine.card_view(0.0, &at).is_ok());
    }

    #[test]
    fn test_concurrent_queries_and_updates() {
        let engine = MetricEngine::new(MetricType::Steps);
        let at = utc(2024, 1, 15, 12, 0, 0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let track = engine.projected_track(&at).unwrap().track;
                        // Either the old or the new goal, never a blend
                        assert!(
                            (track - 5000.0).abs() < 1e-6 || (track - 6000.0).abs() < 1e-6,
                            "unexpected track {track}"
                        );
                    }
                });
            }
            scope.spawn(|| {
                for i in 0..50 {
                    let mut settings = Settings::default();
                    settings.goals.steps = Some(if i % 2 == 0 { 12_000.0 } else { 10_000.0 });
                    engine.apply_settings(settings);
                }
            });
        });

        assert!(engine.cached_day().is_some());
    }
}
