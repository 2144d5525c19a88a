//! Progress gauge geometry
//!
//! The card and tile draw a symmetrical arc centred at the top of a dial. A
//! reading on track draws a sliver at the centre; ahead sweeps clockwise and
//! behind sweeps anticlockwise, saturating at [`ANGLE_MAX`].

use serde::{Deserialize, Serialize};

/// Largest sweep either side of centre, degrees
pub const ANGLE_MAX: f64 = 160.0;

/// Half-width of the sliver drawn when exactly on track, degrees
const ON_TRACK_HALF_WIDTH: f64 = 0.1;

/// Colour band of the arc
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaugeTier {
    /// Behind by the full gauge range or more
    FarBehind,
    Behind,
    OnTrack,
    Ahead,
    /// Ahead by the full gauge range or more
    FarAhead,
}

/// Arc to draw for a relative proportion, angles in degrees from centre
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeArc {
    pub start_angle: f64,
    pub end_angle: f64,
    pub tier: GaugeTier,
}

impl GaugeArc {
    /// Arc for a proportion already scaled to the gauge range (-1..1 fills the dial)
    pub fn from_proportion(proportion: f64) -> Self {
        let angle = (proportion * ANGLE_MAX).clamp(-ANGLE_MAX, ANGLE_MAX);

        if angle < 0.0 {
            Self {
                start_angle: angle,
                end_angle: 0.0,
                tier: if angle <= -ANGLE_MAX {
                    GaugeTier::FarBehind
                } else {
                    GaugeTier::Behind
                },
            }
        } else if angle > 0.0 {
            Self {
                start_angle: 0.0,
                end_angle: angle,
                tier: if angle >= ANGLE_MAX {
                    GaugeTier::FarAhead
                } else {
                    GaugeTier::Ahead
                },
            }
        } else {
            // Zero, or NaN from a degenerate proportion
            Self {
                start_angle: -ON_TRACK_HALF_WIDTH,
                end_angle: ON_TRACK_HALF_WIDTH,
                tier: GaugeTier::OnTrack,
            }
        }
    }

    /// Angular width of the arc
    pub fn sweep(&self) -> f64 {
        self.end_angle - self.start_angle
    }
}
