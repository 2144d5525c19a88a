//! Core types for OnTrack
//!
//! This module defines the metric identities, the per-metric profile record,
//! readings, and the display-ready records produced by each view.

use crate::error::{ComputeError, Incomplete, TrackResult};
use crate::gauge::GaugeArc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Gauge ranges as percentages of goal; a reading this far ahead or behind
/// fills one side of the progress arc.
pub const GAUGE_RANGES: [u32; 4] = [10, 20, 50, 100];

/// Default index into [`GAUGE_RANGES`] (50%)
pub const DEFAULT_GAUGE_RANGE_INDEX: usize = 2;

/// Milliseconds in a nominal 24-hour day
pub const NOMINAL_DAY_MS: i64 = 86_400_000;

/// Activity metric tracked against a daily goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Energy,
    Steps,
    Distance,
    Floors,
}

impl MetricType {
    pub const ALL: [MetricType; 4] = [
        MetricType::Energy,
        MetricType::Steps,
        MetricType::Distance,
        MetricType::Floors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Energy => "energy",
            MetricType::Steps => "steps",
            MetricType::Distance => "distance",
            MetricType::Floors => "floors",
        }
    }

    /// Stable index used by hosts that address metrics numerically
    pub fn index(&self) -> usize {
        match self {
            MetricType::Energy => 0,
            MetricType::Steps => 1,
            MetricType::Distance => 2,
            MetricType::Floors => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Static presentation profile for this metric
    pub fn profile(&self) -> &'static MetricProfile {
        &PROFILES[self.index()]
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "energy" => Ok(MetricType::Energy),
            "steps" => Ok(MetricType::Steps),
            "distance" => Ok(MetricType::Distance),
            "floors" => Ok(MetricType::Floors),
            other => Err(ComputeError::UnsupportedMetric(other.to_string())),
        }
    }
}

/// Alternative display units for a metric, indexed by the user's unit choice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitTable {
    /// Abbreviations for [default, alternative] units
    pub abbrevs: [&'static str; 2],
    /// Multipliers from the sensor's native unit
    pub multipliers: [f64; 2],
}

/// Per-metric configuration record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricProfile {
    pub metric: MetricType,
    pub name: &'static str,
    /// Host resource id of the metric's icon
    pub icon: &'static str,
    /// Decimal places shown for this metric
    pub precision: usize,
    pub units: Option<UnitTable>,
}

static PROFILES: [MetricProfile; 4] = [
    MetricProfile {
        metric: MetricType::Energy,
        name: "Energy",
        icon: "energy",
        precision: 0,
        // Cal or kJ
        units: Some(UnitTable {
            abbrevs: ["Cal", "kJ"],
            multipliers: [1.0, 4.184],
        }),
    },
    MetricProfile {
        metric: MetricType::Steps,
        name: "Steps",
        icon: "steps",
        precision: 0,
        units: None,
    },
    MetricProfile {
        metric: MetricType::Distance,
        name: "Distance",
        icon: "distance",
        precision: 2,
        // km or miles from metres
        units: Some(UnitTable {
            abbrevs: ["km", "mi"],
            multipliers: [0.001, 0.000_621_37],
        }),
    },
    MetricProfile {
        metric: MetricType::Floors,
        name: "Floors",
        icon: "floors",
        precision: 1,
        units: None,
    },
];

/// Latest cumulative value of a metric for the current day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricReading {
    pub fn new(value: f64, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Pick the most recent reading from a batch of data points.
    ///
    /// When several readings share the latest timestamp the last one wins.
    pub fn latest<I>(readings: I) -> Option<Self>
    where
        I: IntoIterator<Item = MetricReading>,
    {
        readings.into_iter().fold(None, |latest, reading| match latest {
            Some(current) if reading.timestamp < current.timestamp => Some(current),
            _ => Some(reading),
        })
    }
}

/// Whether a reading is ahead of or behind the projected track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ahead,
    Behind,
}

impl Direction {
    /// Glyph used by compact complications
    pub fn glyph(&self) -> &'static str {
        match self {
            Direction::Ahead => "▲",
            Direction::Behind => "▼",
        }
    }

    pub fn word(&self) -> &'static str {
        match self {
            Direction::Ahead => "ahead",
            Direction::Behind => "behind",
        }
    }
}

/// Relative progress of a reading against the projected track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeProgress {
    /// Signed amount ahead (positive) or behind (negative), native units
    pub ahead: f64,
    /// `ahead` as a proportion of today's goal
    pub fraction: f64,
}

/// Projected on-track value at an instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub track: f64,
    /// Milliseconds from local midnight to the instant
    pub elapsed_today_ms: i64,
}

/// Data for the app's summary card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardData {
    /// Ahead as a proportion of goal, scaled to the gauge range
    pub rel_proportion: f64,
    /// Signed delta with unit, e.g. "+1,234 Cal"
    pub ahead_string: String,
    /// Signed percentage of goal, e.g. "-12%"
    pub ahead_percent_string: String,
}

impl CardData {
    pub fn arc(&self) -> GaugeArc {
        GaugeArc::from_proportion(self.rel_proportion)
    }
}

/// Data for a watchface complication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplicationData {
    pub rel_proportion: f64,
    /// Absolute delta without separators
    pub ahead_string: String,
    /// "▲" or "▼"
    pub ahead_behind: String,
    pub direction: Direction,
}

impl ComplicationData {
    /// Proportion clamped for a ranged-value display spanning -1..1
    pub fn ranged_value(&self) -> f64 {
        self.rel_proportion.clamp(-1.0, 1.0)
    }
}

/// Data for a tile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    pub rel_proportion: f64,
    /// Absolute delta with separators
    pub ahead_string: String,
    /// "ahead"/"behind", prefixed by the unit abbreviation if any
    pub ahead_behind: String,
    pub direction: Direction,
}

impl TileData {
    pub fn arc(&self) -> GaugeArc {
        GaugeArc::from_proportion(self.rel_proportion)
    }
}

/// Full day-shape breakdown for the detail screen.
///
/// Times are proportions of today's duration; values are in native units
/// and exclude BMR when BMR is subtracted from tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailData {
    pub act_start: f64,
    pub act_end: f64,
    pub coast_at_day_start: f64,
    pub track_at_act_start: f64,
    pub track_at_act_end: f64,
    /// On-track value at the end of the day
    pub goal: f64,
    pub achiev_time: f64,
    pub achiev_value: f64,
    pub track_at_achiev_time: f64,
    /// Value that would still meet the goal with only basal accrual from now
    pub coast_at_achiev_time: f64,
}

/// Which presentation to produce for a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Card,
    Complication,
    Tile,
    Detail,
}

impl ViewKind {
    pub const ALL: [ViewKind; 4] = [
        ViewKind::Card,
        ViewKind::Complication,
        ViewKind::Tile,
        ViewKind::Detail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Card => "card",
            ViewKind::Complication => "complication",
            ViewKind::Tile => "tile",
            ViewKind::Detail => "detail",
        }
    }
}

impl FromStr for ViewKind {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "card" => Ok(ViewKind::Card),
            "complication" => Ok(ViewKind::Complication),
            "tile" => Ok(ViewKind::Tile),
            "detail" => Ok(ViewKind::Detail),
            other => Err(ComputeError::UnsupportedView(other.to_string())),
        }
    }
}

/// Any one of the view records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum MetricView {
    Card(CardData),
    Complication(ComplicationData),
    Tile(TileData),
    Detail(DetailData),
}

/// JSON envelope handed to hosts for a single query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ViewResponse<T> {
    Ready { metric: MetricType, data: T },
    Incomplete { metric: MetricType, reason: Incomplete },
}

impl<T> ViewResponse<T> {
    pub fn from_result(metric: MetricType, result: TrackResult<T>) -> Self {
        match result {
            Ok(data) => ViewResponse::Ready { metric, data },
            Err(reason) => ViewResponse::Incomplete { metric, reason },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ViewResponse::Ready { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metric_index_round_trip() {
        for metric in MetricType::ALL {
            assert_eq!(MetricType::from_index(metric.index()), Some(metric));
            assert_eq!(metric.profile().metric, metric);
        }
        assert_eq!(MetricType::from_index(4), None);
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("Steps".parse::<MetricType>().unwrap(), MetricType::Steps);
        assert!("heart_rate".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_profile_precision() {
        assert_eq!(MetricType::Energy.profile().precision, 0);
        assert_eq!(MetricType::Distance.profile().precision, 2);
        assert_eq!(MetricType::Floors.profile().precision, 1);
        assert!(MetricType::Steps.profile().units.is_none());
    }

    #[test]
    fn test_latest_reading() {
        let at = |h| Utc.with_ymd_and_hms(2024, 1, 15, h, 0, 0).unwrap();
        let readings = vec![
            MetricReading::new(100.0, at(9)),
            MetricReading::new(300.0, at(11)),
            MetricReading::new(200.0, at(10)),
            MetricReading::new(310.0, at(11)),
        ];

        let latest = MetricReading::latest(readings).unwrap();
        assert_eq!(latest.value, 310.0);
        assert!(MetricReading::latest(Vec::new()).is_none());
    }

    #[test]
    fn test_view_response_envelope() {
        let ready = ViewResponse::from_result(
            MetricType::Steps,
            Ok(ComplicationData {
                rel_proportion: 0.2,
                ahead_string: "500".to_string(),
                ahead_behind: "▲".to_string(),
                direction: Direction::Ahead,
            }),
        );
        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["data"]["ahead_behind"], "▲");

        let incomplete: ViewResponse<CardData> = ViewResponse::from_result(
            MetricType::Energy,
            Err(Incomplete::NonPositiveGoal),
        );
        assert!(!incomplete.is_ready());
        let json = serde_json::to_value(&incomplete).unwrap();
        assert_eq!(json["status"], "incomplete");
        assert_eq!(json["reason"]["reason"], "non_positive_goal");
    }

    #[test]
    fn test_ranged_value_clamped() {
        let data = ComplicationData {
            rel_proportion: -3.5,
            ahead_string: "9000".to_string(),
            ahead_behind: "▼".to_string(),
            direction: Direction::Behind,
        };
        assert_eq!(data.ranged_value(), -1.0);
    }
}
