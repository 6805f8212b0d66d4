#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and schedule parsing for the closed-loop dosing engine.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The learned basal/sensitivity schedule can be given inline or as a CSV
//!   with strict headers, one row per 4-hour bucket of local time.
use serde::Deserialize;
use std::path::PathBuf;

/// Number of 4-hour buckets in a day.
pub const SCHEDULE_BUCKETS: usize = 6;

/// Schedule CSV schema.
///
/// Expected headers:
/// bucket,basal_rate,insulin_sensitivity
///
/// Example:
/// bucket,basal_rate,insulin_sensitivity
/// 0,0.8,55
/// 1,1.1,45
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScheduleRow {
    pub bucket: usize,
    pub basal_rate: f64,
    pub insulin_sensitivity: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoopCfg {
    /// When false every cycle ends in open loop without touching the pump.
    pub closed_loop: bool,
    /// Program the arbiter-bounded ML rate instead of the physiological one.
    pub use_ml_controller: bool,
    pub micro_bolus_enabled: bool,
    pub biological_invariant_enabled: bool,
    /// Max age of the last CGM reading (minutes).
    pub glucose_freshness_min: f64,
    /// Max age of the last pump sync (minutes).
    pub pump_freshness_min: f64,
    /// Minimum spacing between heartbeat/CGM triggered cycles (minutes).
    pub min_loop_interval_min: f64,
    pub temp_basal_duration_min: f64,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            closed_loop: true,
            use_ml_controller: false,
            micro_bolus_enabled: true,
            biological_invariant_enabled: true,
            glucose_freshness_min: 10.0,
            pump_freshness_min: 15.0,
            min_loop_interval_min: 4.2,
            temp_basal_duration_min: 30.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetsCfg {
    pub target_mg_dl: f64,
    /// Glucose (current or predicted) at or below which delivery is suspended.
    pub shutoff_mg_dl: f64,
    pub max_basal_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Clamp for the accumulated error (mg/dL).
    pub integral_limit: f64,
    /// Derivative/integral only update if the previous glucose is younger than this.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MicroBolusCfg {
    /// Fraction of the temp-basal correction delivered as a micro-bolus.
    pub fraction: f64,
    /// Micro-boluses at or below this size are not issued (units).
    pub min_units: f64,
    pub min_interval_min: f64,
    /// Glucose must be at least target + margin.
    pub glucose_margin_mg_dl: f64,
    /// Prediction below glucose - tolerance counts as clearly falling.
    pub falling_tolerance_mg_dl: f64,
}

impl Default for MicroBolusCfg {
    fn default() -> Self {
        Self {
            fraction: 0.4,
            min_units: 0.025,
            min_interval_min: 4.2,
            glucose_margin_mg_dl: 20.0,
            falling_tolerance_mg_dl: 5.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SafetyCfg {
    pub horizon_hours: f64,
    /// Biological invariant (mg/dL/h) below which all delivery is suppressed.
    pub biological_invariant_threshold: f64,
    /// Delta-glucose error (mg/dL/h) above which digestion is assumed.
    pub digestion_threshold: f64,
    pub ledger_retention_hours: f64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            horizon_hours: 3.0,
            biological_invariant_threshold: -35.0,
            digestion_threshold: 40.0,
            ledger_retention_hours: 24.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsulinKindCfg {
    #[default]
    RapidActingAdult,
    RapidActingChild,
    Fiasp,
    Lyumjev,
    Afrezza,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct InsulinCfg {
    pub kind: InsulinKindCfg,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ScheduleCfg {
    /// Basal rate (U/h) per 4-hour bucket starting at local midnight.
    pub basal_rates: Vec<f64>,
    /// Insulin sensitivity (mg/dL per U) per 4-hour bucket.
    pub insulin_sensitivity: Vec<f64>,
    /// Optional CSV; when present it replaces the inline arrays.
    pub csv: Option<PathBuf>,
    /// Offset of local time from UTC used to pick the bucket.
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PumpCfg {
    /// Pumps that log standing basal explicitly need no basal inference.
    pub reports_basal_starts: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FrameCfg {
    pub rows: usize,
    pub min_real_samples: usize,
    /// Maximum distance between the window edges and the nearest real sample.
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    pub dose_ledger: Option<PathBuf>,
    pub safety_ledger: Option<PathBuf>,
    /// Rolling window of pump events kept in the dose ledger (hours).
    pub history_hours: f64,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            dose_ledger: None,
            safety_ledger: None,
            history_hours: 9.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MlControllerKind {
    #[default]
    None,
    DynamicSensitivity,
    LinearModel,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MlCfg {
    pub controller: MlControllerKind,
    /// JSON weights for the linear model controller.
    pub model_path: Option<PathBuf>,
    /// The ML controllers decline after any reading below this level...
    pub low_glucose_mg_dl: f64,
    /// ...within this many minutes.
    pub low_lookback_min: f64,
}

impl Default for MlCfg {
    fn default() -> Self {
        Self {
            controller: MlControllerKind::None,
            model_path: None,
            low_glucose_mg_dl: 70.0,
            low_lookback_min: 60.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default, rename = "loop")]
    pub loop_cfg: LoopCfg,
    pub targets: TargetsCfg,
    #[serde(default)]
    pub pid: PidCfg,
    #[serde(default)]
    pub micro_bolus: MicroBolusCfg,
    #[serde(default)]
    pub safety: SafetyCfg,
    #[serde(default)]
    pub insulin: InsulinCfg,
    pub schedule: ScheduleCfg,
    #[serde(default)]
    pub pump: PumpCfg,
    #[serde(default)]
    pub frame: FrameCfg,
    #[serde(default)]
    pub storage: StorageCfg,
    #[serde(default)]
    pub ml: MlCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Learned per-bucket basal rates and insulin sensitivities.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub basal_rates: [f64; SCHEDULE_BUCKETS],
    pub insulin_sensitivity: [f64; SCHEDULE_BUCKETS],
}

impl Schedule {
    /// Build from rows; every bucket must appear exactly once.
    pub fn from_rows(rows: &[ScheduleRow]) -> eyre::Result<Self> {
        if rows.len() != SCHEDULE_BUCKETS {
            eyre::bail!(
                "schedule requires exactly {} rows, got {}",
                SCHEDULE_BUCKETS,
                rows.len()
            );
        }
        let mut seen = [false; SCHEDULE_BUCKETS];
        let mut basal_rates = [0.0; SCHEDULE_BUCKETS];
        let mut insulin_sensitivity = [0.0; SCHEDULE_BUCKETS];
        for row in rows {
            if row.bucket >= SCHEDULE_BUCKETS {
                eyre::bail!("schedule bucket {} out of range 0..=5", row.bucket);
            }
            if seen[row.bucket] {
                eyre::bail!("schedule bucket {} appears more than once", row.bucket);
            }
            seen[row.bucket] = true;
            basal_rates[row.bucket] = row.basal_rate;
            insulin_sensitivity[row.bucket] = row.insulin_sensitivity;
        }
        let schedule = Self {
            basal_rates,
            insulin_sensitivity,
        };
        schedule.check()?;
        Ok(schedule)
    }

    fn check(&self) -> eyre::Result<()> {
        for (i, rate) in self.basal_rates.iter().enumerate() {
            if !rate.is_finite() || *rate < 0.0 {
                eyre::bail!("schedule.basal_rates[{i}] must be finite and >= 0");
            }
        }
        for (i, isf) in self.insulin_sensitivity.iter().enumerate() {
            if !isf.is_finite() || *isf <= 0.0 {
                eyre::bail!("schedule.insulin_sensitivity[{i}] must be finite and > 0");
            }
        }
        Ok(())
    }
}

pub fn load_schedule_csv(path: &std::path::Path) -> eyre::Result<Schedule> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open schedule CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["bucket", "basal_rate", "insulin_sensitivity"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "schedule CSV must have headers 'bucket,basal_rate,insulin_sensitivity', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScheduleRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }

    Schedule::from_rows(&rows)
}

impl Config {
    /// Resolve the schedule from the CSV (when configured) or the inline arrays.
    pub fn schedule(&self) -> eyre::Result<Schedule> {
        if let Some(path) = &self.schedule.csv {
            return load_schedule_csv(path);
        }
        if self.schedule.basal_rates.len() != SCHEDULE_BUCKETS {
            eyre::bail!("schedule.basal_rates must have {SCHEDULE_BUCKETS} entries");
        }
        if self.schedule.insulin_sensitivity.len() != SCHEDULE_BUCKETS {
            eyre::bail!("schedule.insulin_sensitivity must have {SCHEDULE_BUCKETS} entries");
        }
        let mut basal_rates = [0.0; SCHEDULE_BUCKETS];
        basal_rates.copy_from_slice(&self.schedule.basal_rates);
        let mut insulin_sensitivity = [0.0; SCHEDULE_BUCKETS];
        insulin_sensitivity.copy_from_slice(&self.schedule.insulin_sensitivity);
        let schedule = Schedule {
            basal_rates,
            insulin_sensitivity,
        };
        schedule.check()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Loop
        let l = &self.loop_cfg;
        if !(l.glucose_freshness_min > 0.0 && l.glucose_freshness_min <= 60.0) {
            eyre::bail!("loop.glucose_freshness_min must be in (0, 60]");
        }
        if !(l.pump_freshness_min > 0.0 && l.pump_freshness_min <= 60.0) {
            eyre::bail!("loop.pump_freshness_min must be in (0, 60]");
        }
        if !(l.min_loop_interval_min >= 0.0 && l.min_loop_interval_min <= 30.0) {
            eyre::bail!("loop.min_loop_interval_min must be in [0, 30]");
        }
        if !(l.temp_basal_duration_min >= 5.0 && l.temp_basal_duration_min <= 120.0) {
            eyre::bail!("loop.temp_basal_duration_min must be in [5, 120]");
        }

        // Targets
        let t = &self.targets;
        if !(t.target_mg_dl >= 70.0 && t.target_mg_dl <= 200.0) {
            eyre::bail!("targets.target_mg_dl must be in [70, 200]");
        }
        if !(t.shutoff_mg_dl >= 40.0 && t.shutoff_mg_dl < t.target_mg_dl) {
            eyre::bail!("targets.shutoff_mg_dl must be >= 40 and below target_mg_dl");
        }
        if !(t.max_basal_rate > 0.0 && t.max_basal_rate <= 35.0) {
            eyre::bail!("targets.max_basal_rate must be in (0, 35]");
        }

        // PID
        let p = &self.pid;
        for (name, v) in [("kp", p.kp), ("ki", p.ki), ("kd", p.kd)] {
            if !v.is_finite() || v < 0.0 {
                eyre::bail!("pid.{name} must be finite and >= 0");
            }
        }
        if !(p.integral_limit > 0.0 && p.integral_limit.is_finite()) {
            eyre::bail!("pid.integral_limit must be > 0");
        }
        if !(p.derivative_max_age_min > 0.0 && p.derivative_max_age_min <= 60.0) {
            eyre::bail!("pid.derivative_max_age_min must be in (0, 60]");
        }

        // Micro-bolus
        let m = &self.micro_bolus;
        if !(m.fraction > 0.0 && m.fraction <= 1.0) {
            eyre::bail!("micro_bolus.fraction must be in (0.0, 1.0]");
        }
        if !(m.min_units >= 0.0 && m.min_units < 1.0) {
            eyre::bail!("micro_bolus.min_units must be in [0.0, 1.0)");
        }
        if !(m.min_interval_min >= 0.0 && m.min_interval_min <= 60.0) {
            eyre::bail!("micro_bolus.min_interval_min must be in [0, 60]");
        }
        for (name, v) in [
            ("glucose_margin_mg_dl", m.glucose_margin_mg_dl),
            ("falling_tolerance_mg_dl", m.falling_tolerance_mg_dl),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                eyre::bail!("micro_bolus.{name} must be finite and >= 0");
            }
        }

        // Safety
        let s = &self.safety;
        if !(s.horizon_hours > 0.0 && s.horizon_hours <= 24.0) {
            eyre::bail!("safety.horizon_hours must be in (0, 24]");
        }
        if !(s.biological_invariant_threshold.is_finite() && s.biological_invariant_threshold < 0.0) {
            eyre::bail!("safety.biological_invariant_threshold must be finite and < 0");
        }
        if !(s.digestion_threshold.is_finite() && s.digestion_threshold > 0.0) {
            eyre::bail!("safety.digestion_threshold must be finite and > 0");
        }
        if !(s.ledger_retention_hours >= s.horizon_hours && s.ledger_retention_hours <= 24.0 * 7.0) {
            eyre::bail!("safety.ledger_retention_hours must be in [safety.horizon_hours, 168]");
        }

        // Frame
        let f = &self.frame;
        if f.rows < 5 {
            eyre::bail!("frame.rows must be >= 5");
        }
        if f.min_real_samples < 2 {
            eyre::bail!("frame.min_real_samples must be >= 2");
        }
        if !(f.max_edge_gap_min > 0.0 && f.max_edge_gap_min <= 60.0) {
            eyre::bail!("frame.max_edge_gap_min must be in (0, 60]");
        }

        // Storage
        if !(self.storage.history_hours >= 6.0 && self.storage.history_hours <= 48.0) {
            eyre::bail!("storage.history_hours must be in [6, 48]");
        }

        // ML
        if self.ml.controller == MlControllerKind::LinearModel && self.ml.model_path.is_none() {
            eyre::bail!("ml.model_path is required for the linear_model controller");
        }
        if !(self.ml.low_lookback_min >= 0.0 && self.ml.low_lookback_min <= 24.0 * 60.0) {
            eyre::bail!("ml.low_lookback_min must be in [0, 1440]");
        }

        // Schedule
        if !(-14 * 60..=14 * 60).contains(&self.schedule.utc_offset_minutes) {
            eyre::bail!("schedule.utc_offset_minutes must be within +/-14h");
        }
        self.schedule()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_rows_must_cover_every_bucket_once() {
        let mut rows: Vec<ScheduleRow> = (0..SCHEDULE_BUCKETS)
            .map(|b| ScheduleRow {
                bucket: b,
                basal_rate: 1.0,
                insulin_sensitivity: 50.0,
            })
            .collect();
        assert!(Schedule::from_rows(&rows).is_ok());
        rows[5].bucket = 4;
        let err = Schedule::from_rows(&rows).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn non_positive_sensitivity_is_rejected() {
        let rows: Vec<ScheduleRow> = (0..SCHEDULE_BUCKETS)
            .map(|b| ScheduleRow {
                bucket: b,
                basal_rate: 1.0,
                insulin_sensitivity: if b == 2 { 0.0 } else { 50.0 },
            })
            .collect();
        let err = Schedule::from_rows(&rows).unwrap_err();
        assert!(err.to_string().contains("insulin_sensitivity[2]"));
    }
}
