//! Capability interfaces the dosing engine consumes.
//!
//! CGM and pump integrations live outside this workspace; the engine only
//! talks to them through these traits. Errors crossing the pump boundary are
//! boxed so vendor crates can surface their own types.
pub mod clock;

pub use clock::{Clock, SystemClock, test_clock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error type returned across the pump command boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// CGM trend arrow as reported by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseTrend {
    DownDownDown,
    DownDown,
    Down,
    Flat,
    Up,
    UpUp,
    UpUpUp,
}

/// A single CGM reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSample {
    pub date: DateTime<Utc>,
    pub mg_dl: f64,
    #[serde(default)]
    pub trend: Option<GlucoseTrend>,
}

impl GlucoseSample {
    pub fn new(date: DateTime<Utc>, mg_dl: f64) -> Self {
        Self {
            date,
            mg_dl,
            trend: None,
        }
    }
}

/// How a bolus was initiated; automatic boluses are micro-boluses issued by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BolusActivation {
    Manual,
    Automatic,
}

pub trait GlucoseSource {
    /// Most recent reading, if any.
    fn last_reading(&self) -> Option<GlucoseSample>;
    /// Readings with `start <= date <= end`, oldest first.
    fn readings_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<GlucoseSample>;
}

pub trait PumpManager {
    fn round_to_supported_basal_rate(&self, units_per_hour: f64) -> f64;
    fn round_to_supported_bolus_volume(&self, units: f64) -> f64;
    fn enact_temp_basal(&mut self, units_per_hour: f64, duration: Duration) -> Result<(), BoxError>;
    fn enact_bolus(&mut self, units: f64, activation: BolusActivation) -> Result<(), BoxError>;
    /// Refresh pump status; returns the time of the last successful sync.
    fn ensure_current_pump_data(&mut self) -> Option<DateTime<Utc>>;
}

pub trait ActivitySignal {
    fn is_exercising(&self, at: DateTime<Utc>) -> bool;
}

/// Activity signal for setups without an exercise source.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverExercising;

impl ActivitySignal for NeverExercising {
    fn is_exercising(&self, _at: DateTime<Utc>) -> bool {
        false
    }
}
