//! User settings
//!
//! [`Settings`] is an immutable snapshot of everything the engine needs from
//! the user: goals, active period, unit choices, gauge ranges and, for the
//! energy metric, body parameters. Hosts persist settings however they like;
//! the engine only consumes snapshots through [`SettingsProvider`].

use crate::error::{BodyParameter, ComputeError, Incomplete};
use crate::types::{MetricType, DEFAULT_GAUGE_RANGE_INDEX, GAUGE_RANGES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Default start of the active period (6 am), seconds into the day
pub const DEFAULT_ACT_START: i32 = 21_600;

/// Default end of the active period (6 pm), seconds into the day
pub const DEFAULT_ACT_END: i32 = 64_800;

/// Daily goals in each metric's native unit (Cal, steps, metres, floors)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Goals {
    pub energy: Option<f64>,
    pub steps: Option<f64>,
    pub distance: Option<f64>,
    pub floors: Option<f64>,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            energy: None,
            steps: Some(10_000.0),
            distance: None,
            floors: Some(10.0),
        }
    }
}

impl Goals {
    pub fn get(&self, metric: MetricType) -> Option<f64> {
        match metric {
            MetricType::Energy => self.energy,
            MetricType::Steps => self.steps,
            MetricType::Distance => self.distance,
            MetricType::Floors => self.floors,
        }
    }

    pub fn set(&mut self, metric: MetricType, goal: Option<f64>) {
        match metric {
            MetricType::Energy => self.energy = goal,
            MetricType::Steps => self.steps = goal,
            MetricType::Distance => self.distance = goal,
            MetricType::Floors => self.floors = goal,
        }
    }
}

/// Body parameters once all of them are known
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyProfile {
    pub is_male: bool,
    /// Date of birth as days since 1970-01-01
    pub dob: i64,
    /// Height in cm
    pub height: f64,
    /// Weight in kg
    pub weight: f64,
}

/// Snapshot of user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Last-modified time in epoch milliseconds
    pub timestamp: i64,
    /// Distance in miles rather than km
    pub is_imperial: bool,
    /// Energy in kJ rather than Cal
    pub is_kj: bool,
    pub goals: Goals,
    /// Exclude BMR from energy tracking
    pub subtract_bmr: bool,
    pub is_male: Option<bool>,
    /// Date of birth as days since 1970-01-01
    pub dob: Option<i64>,
    /// Height in cm
    pub height: Option<f64>,
    /// Weight in kg
    pub weight: Option<f64>,
    /// Active period start, seconds into a non-DST day
    pub act_start: i32,
    /// Active period end, seconds into a non-DST day; 86400 or more means end of day
    pub act_end: i32,
    /// Index into GAUGE_RANGES for energy
    pub range_energy: usize,
    /// Index into GAUGE_RANGES for steps, distance and floors
    pub range_other: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timestamp: 0,
            is_imperial: false,
            is_kj: false,
            goals: Goals::default(),
            subtract_bmr: false,
            is_male: None,
            dob: None,
            height: None,
            weight: None,
            act_start: DEFAULT_ACT_START,
            act_end: DEFAULT_ACT_END,
            range_energy: DEFAULT_GAUGE_RANGE_INDEX,
            range_other: DEFAULT_GAUGE_RANGE_INDEX,
        }
    }
}

impl Settings {
    pub fn goal(&self, metric: MetricType) -> Option<f64> {
        self.goals.get(metric)
    }

    /// Body parameters, or the first one that is missing
    pub fn body(&self) -> Result<BodyProfile, BodyParameter> {
        Ok(BodyProfile {
            is_male: self.is_male.ok_or(BodyParameter::Sex)?,
            dob: self.dob.ok_or(BodyParameter::DateOfBirth)?,
            height: self.height.ok_or(BodyParameter::Height)?,
            weight: self.weight.ok_or(BodyParameter::Weight)?,
        })
    }

    /// Check whether `metric` can be tracked with these settings.
    ///
    /// Returns the goal when it can. Energy additionally needs every body
    /// parameter to compute the basal rate.
    pub fn completeness(&self, metric: MetricType) -> Result<f64, Incomplete> {
        let goal = self.goal(metric).ok_or(Incomplete::GoalUnset { metric })?;
        if metric == MetricType::Energy {
            self.body()
                .map_err(|parameter| Incomplete::MissingBodyParameter { parameter })?;
        }
        Ok(goal)
    }

    pub fn is_complete(&self, metric: MetricType) -> bool {
        self.completeness(metric).is_ok()
    }

    /// Gauge range index for `metric`, falling back to the default when out of range
    pub fn gauge_range_index(&self, metric: MetricType) -> usize {
        let index = match metric {
            MetricType::Energy => self.range_energy,
            _ => self.range_other,
        };
        if index < GAUGE_RANGES.len() {
            index
        } else {
            DEFAULT_GAUGE_RANGE_INDEX
        }
    }

    /// Gauge range as a proportion of goal
    pub fn gauge_range(&self, metric: MetricType) -> f64 {
        f64::from(GAUGE_RANGES[self.gauge_range_index(metric)]) / 100.0
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Source of settings snapshots
pub trait SettingsProvider {
    fn current_settings(&self) -> Settings;

    /// Last-modified time of the current settings, epoch milliseconds
    fn last_modified(&self) -> i64;
}

/// Handle returned by [`SettingsStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&Settings) + Send + Sync>;

/// In-memory settings store with change notification.
///
/// Each replacement is stamped with a timestamp strictly greater than the
/// previous one, so engines can detect staleness by comparing timestamps.
pub struct SettingsStore {
    current: RwLock<Settings>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            current: RwLock::new(initial),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Replace the stored settings and notify subscribers.
    ///
    /// Callbacks run on the calling thread after the store is updated and
    /// must not call back into [`subscribe`](Self::subscribe) or
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn replace(&self, mut settings: Settings, modified_at: DateTime<Utc>) -> Settings {
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            settings.timestamp = modified_at.timestamp_millis().max(current.timestamp + 1);
            *current = settings.clone();
        }
        tracing::debug!(timestamp = settings.timestamp, "settings replaced");
        self.notify(&settings);
        settings
    }

    /// Apply an edit to a copy of the current settings and store the result
    pub fn modify<F>(&self, modified_at: DateTime<Utc>, edit: F) -> Settings
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.current_settings();
        edit(&mut settings);
        self.replace(settings, modified_at)
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        subscribers.len() != before
    }

    fn notify(&self, settings: &Settings) {
        let subscribers: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in subscribers {
            callback(settings);
        }
    }
}

impl SettingsProvider for SettingsStore {
    fn current_settings(&self) -> Settings {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn last_modified(&self) -> i64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .timestamp
    }
}
