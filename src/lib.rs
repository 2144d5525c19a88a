//! OnTrack - On-device goal projection engine for wearable activity metrics
//!
//! OnTrack turns a daily goal and a user's active period into an expected
//! cumulative value for any instant of the local day, and compares live
//! readings against it: daily constants → projected track → relative
//! progress → display records.
//!
//! ## Modules
//!
//! - **Engine**: one [`MetricEngine`] per metric (energy, steps, distance, floors)
//! - **Settings**: immutable settings snapshots and an in-memory store
//! - **Views**: card, complication, tile and detail records ready for display

pub mod calendar;
pub mod daily;
pub mod engine;
pub mod error;
pub mod format;
pub mod gauge;
pub mod settings;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use engine::MetricEngine;
pub use error::{BodyParameter, ComputeError, Incomplete, TrackResult};
pub use gauge::{GaugeArc, GaugeTier};
pub use settings::{Settings, SettingsProvider, SettingsStore};
pub use types::{
    CardData, ComplicationData, DetailData, Direction, MetricReading, MetricType, MetricView,
    Projection, RelativeProgress, TileData, ViewKind, ViewResponse,
};

/// OnTrack engine version
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by hosts and the CLI
pub const PRODUCER_NAME: &str = "ontrack-engine";
