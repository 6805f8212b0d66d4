//! Runtime settings for the dosing loop.
//!
//! These are the runtime structs used by `LoopOrchestrator` and its
//! components. They are separate from the TOML-deserialized config in
//! `insulin_config`; see `conversions` for the bridge.

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::insulin::InsulinKind;

/// Hours covered by one schedule bucket.
pub const BUCKET_HOURS: u32 = 4;
/// Buckets per day.
pub const BUCKETS: usize = 6;

/// A per-4-hour-bucket value over local time of day.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeOfDaySchedule {
    values: [f64; BUCKETS],
    utc_offset_minutes: i32,
}

impl TimeOfDaySchedule {
    pub fn new(values: [f64; BUCKETS], utc_offset_minutes: i32) -> Self {
        Self {
            values,
            utc_offset_minutes,
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new([value; BUCKETS], 0)
    }

    pub fn values(&self) -> &[f64; BUCKETS] {
        &self.values
    }

    fn local(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at + Duration::minutes(i64::from(self.utc_offset_minutes))
    }

    /// Bucket index (0..6) for `at` in local time.
    pub fn bucket(&self, at: DateTime<Utc>) -> usize {
        (self.local(at).hour() / BUCKET_HOURS) as usize % BUCKETS
    }

    pub fn value_at(&self, at: DateTime<Utc>) -> f64 {
        self.values[self.bucket(at)]
    }

    /// Split `[start, end)` at bucket boundaries: `(start, end, value)` pieces.
    pub fn segments(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, DateTime<Utc>, f64)> {
        let mut out = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let local = self.local(cursor);
            let hours_into_bucket = i64::from(local.hour() % BUCKET_HOURS);
            let into = Duration::hours(hours_into_bucket)
                + Duration::minutes(i64::from(local.minute()))
                + Duration::seconds(i64::from(local.second()))
                + Duration::nanoseconds(i64::from(local.nanosecond()));
            let boundary = cursor - into + Duration::hours(i64::from(BUCKET_HOURS));
            let piece_end = boundary.min(end);
            out.push((cursor, piece_end, self.value_at(cursor)));
            cursor = piece_end;
        }
        out
    }
}

/// PID gains and memory limits.
#[derive(Debug, Clone)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Accumulated error is clamped to `+/- integral_limit`.
    pub integral_limit: f64,
    /// Previous glucose older than this resets the derivative to 0.
    pub derivative_max_age_min: f64,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 1.0,
            integral_limit: 240.0,
            derivative_max_age_min: 11.0,
        }
    }
}

/// Micro-bolus eligibility and sizing.
#[derive(Debug, Clone)]
pub struct MicroBolusCfg {
    pub enabled: bool,
    pub fraction: f64,
    pub min_units: f64,
    pub min_interval_min: f64,
    pub glucose_margin_mg_dl: f64,
    pub falling_tolerance_mg_dl: f64,
}

impl Default for MicroBolusCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            fraction: 0.4,
            min_units: 0.025,
            min_interval_min: 4.2,
            glucose_margin_mg_dl: 20.0,
            falling_tolerance_mg_dl: 5.0,
        }
    }
}

/// Arbiter horizon and invariant thresholds.
#[derive(Debug, Clone)]
pub struct SafetyCfg {
    pub horizon_hours: f64,
    pub biological_invariant_enabled: bool,
    /// mg/dL/h; a discrepancy below this suppresses all delivery.
    pub biological_invariant_threshold: f64,
    /// mg/dL/h; a discrepancy above this is treated as digestion.
    pub digestion_threshold: f64,
    pub ledger_retention_hours: f64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            horizon_hours: 3.0,
            biological_invariant_enabled: true,
            biological_invariant_threshold: -35.0,
            digestion_threshold: 40.0,
            ledger_retention_hours: 24.0,
        }
    }
}

/// Feature frame shape.
#[derive(Debug, Clone)]
pub struct FrameCfg {
    pub rows: usize,
    pub min_real_samples: usize,
    pub max_edge_gap_min: f64,
}

impl Default for FrameCfg {
    fn default() -> Self {
        Self {
            rows: 12,
            min_real_samples: 6,
            max_edge_gap_min: 11.0,
        }
    }
}

/// Conditions under which the advisory controllers decline.
#[derive(Debug, Clone)]
pub struct MlGuardCfg {
    pub low_glucose_mg_dl: f64,
    pub low_lookback_min: f64,
}

impl Default for MlGuardCfg {
    fn default() -> Self {
        Self {
            low_glucose_mg_dl: 70.0,
            low_lookback_min: 60.0,
        }
    }
}

/// Immutable settings snapshot. Shared as `Arc<LoopSettings>` and replaced whole.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub closed_loop: bool,
    pub use_ml_controller: bool,
    pub glucose_freshness_min: f64,
    pub pump_freshness_min: f64,
    pub min_loop_interval_min: f64,
    pub temp_basal_duration_min: f64,
    pub target_mg_dl: f64,
    pub shutoff_mg_dl: f64,
    pub max_basal_rate: f64,
    pub basal_schedule: TimeOfDaySchedule,
    pub sensitivity_schedule: TimeOfDaySchedule,
    pub insulin_kind: InsulinKind,
    pub reports_basal_starts: bool,
    pub history_hours: f64,
    pub pid: PidCfg,
    pub micro_bolus: MicroBolusCfg,
    pub safety: SafetyCfg,
    pub frame: FrameCfg,
    pub ml: MlGuardCfg,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            closed_loop: true,
            use_ml_controller: false,
            glucose_freshness_min: 10.0,
            pump_freshness_min: 15.0,
            min_loop_interval_min: 4.2,
            temp_basal_duration_min: 30.0,
            target_mg_dl: 100.0,
            shutoff_mg_dl: 75.0,
            max_basal_rate: 3.0,
            basal_schedule: TimeOfDaySchedule::constant(1.0),
            sensitivity_schedule: TimeOfDaySchedule::constant(50.0),
            insulin_kind: InsulinKind::RapidActingAdult,
            reports_basal_starts: false,
            history_hours: 9.0,
            pid: PidCfg::default(),
            micro_bolus: MicroBolusCfg::default(),
            safety: SafetyCfg::default(),
            frame: FrameCfg::default(),
            ml: MlGuardCfg::default(),
        }
    }
}

impl LoopSettings {
    #[inline]
    pub fn basal_rate_at(&self, at: DateTime<Utc>) -> f64 {
        self.basal_schedule.value_at(at)
    }

    #[inline]
    pub fn sensitivity_at(&self, at: DateTime<Utc>) -> f64 {
        self.sensitivity_schedule.value_at(at)
    }

    /// Temp-basal duration in hours; also the correction horizon of the PID output.
    #[inline]
    pub fn correction_hours(&self) -> f64 {
        self.temp_basal_duration_min / 60.0
    }

    pub fn temp_basal_duration(&self) -> std::time::Duration {
        crate::util::std_minutes(self.temp_basal_duration_min)
    }
}
