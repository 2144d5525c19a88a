//! Error types for OnTrack
//!
//! Two kinds of failure exist. [`Incomplete`] is an expected, recoverable
//! outcome of every tracking query: the user's settings do not (yet) allow a
//! projection to be computed. [`ComputeError`] covers host-facing failures
//! such as malformed settings JSON or an unknown timezone name.

use crate::types::MetricType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while marshalling inputs or outputs for the engine
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unsupported metric: {0}")]
    UnsupportedMetric(String),

    #[error("Unsupported view: {0}")]
    UnsupportedView(String),
}

/// Body parameters needed for the energy metric's basal rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyParameter {
    Sex,
    DateOfBirth,
    Height,
    Weight,
}

impl BodyParameter {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyParameter::Sex => "sex",
            BodyParameter::DateOfBirth => "date_of_birth",
            BodyParameter::Height => "height",
            BodyParameter::Weight => "weight",
        }
    }
}

impl std::fmt::Display for BodyParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a metric cannot currently be tracked.
///
/// Callers render a distinct "check settings" state for every variant; none
/// of them is fatal and all clear once the settings are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Incomplete {
    #[error("no goal set for {metric}")]
    GoalUnset { metric: MetricType },

    #[error("missing body parameter: {parameter}")]
    MissingBodyParameter { parameter: BodyParameter },

    #[error("today's goal is not positive")]
    NonPositiveGoal,

    #[error("active period is empty or outside the day")]
    InvalidActivePeriod,
}

/// Result of a tracking query
pub type TrackResult<T> = Result<T, Incomplete>;
