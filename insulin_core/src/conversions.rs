//! Conversions bridging `insulin_config` types to `insulin_core` types.

use crate::config::{
    FrameCfg, LoopSettings, MicroBolusCfg, MlGuardCfg, PidCfg, SafetyCfg, TimeOfDaySchedule,
};

// ── PidCfg ───────────────────────────────────────────────────────────────────

impl From<&insulin_config::PidCfg> for PidCfg {
    fn from(c: &insulin_config::PidCfg) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            integral_limit: c.integral_limit,
            derivative_max_age_min: c.derivative_max_age_min,
        }
    }
}

// ── FrameCfg ─────────────────────────────────────────────────────────────────

impl From<&insulin_config::FrameCfg> for FrameCfg {
    fn from(c: &insulin_config::FrameCfg) -> Self {
        Self {
            rows: c.rows,
            min_real_samples: c.min_real_samples,
            max_edge_gap_min: c.max_edge_gap_min,
        }
    }
}

// ── MlGuardCfg ───────────────────────────────────────────────────────────────

impl From<&insulin_config::MlCfg> for MlGuardCfg {
    fn from(c: &insulin_config::MlCfg) -> Self {
        Self {
            low_glucose_mg_dl: c.low_glucose_mg_dl,
            low_lookback_min: c.low_lookback_min,
        }
    }
}

// ── LoopSettings ─────────────────────────────────────────────────────────────

/// Needs the whole config: flags from `[loop]` land in several sections and
/// the schedule may come from a CSV file.
impl TryFrom<&insulin_config::Config> for LoopSettings {
    type Error = eyre::Report;

    fn try_from(c: &insulin_config::Config) -> Result<Self, Self::Error> {
        let schedule = c.schedule()?;
        let offset = c.schedule.utc_offset_minutes;
        let l = &c.loop_cfg;
        let m = &c.micro_bolus;
        let s = &c.safety;
        Ok(Self {
            closed_loop: l.closed_loop,
            use_ml_controller: l.use_ml_controller,
            glucose_freshness_min: l.glucose_freshness_min,
            pump_freshness_min: l.pump_freshness_min,
            min_loop_interval_min: l.min_loop_interval_min,
            temp_basal_duration_min: l.temp_basal_duration_min,
            target_mg_dl: c.targets.target_mg_dl,
            shutoff_mg_dl: c.targets.shutoff_mg_dl,
            max_basal_rate: c.targets.max_basal_rate,
            basal_schedule: TimeOfDaySchedule::new(schedule.basal_rates, offset),
            sensitivity_schedule: TimeOfDaySchedule::new(schedule.insulin_sensitivity, offset),
            insulin_kind: c.insulin.kind.into(),
            reports_basal_starts: c.pump.reports_basal_starts,
            history_hours: c.storage.history_hours,
            pid: (&c.pid).into(),
            micro_bolus: MicroBolusCfg {
                enabled: l.micro_bolus_enabled,
                fraction: m.fraction,
                min_units: m.min_units,
                min_interval_min: m.min_interval_min,
                glucose_margin_mg_dl: m.glucose_margin_mg_dl,
                falling_tolerance_mg_dl: m.falling_tolerance_mg_dl,
            },
            safety: SafetyCfg {
                horizon_hours: s.horizon_hours,
                biological_invariant_enabled: l.biological_invariant_enabled,
                biological_invariant_threshold: s.biological_invariant_threshold,
                digestion_threshold: s.digestion_threshold,
                ledger_retention_hours: s.ledger_retention_hours,
            },
            frame: (&c.frame).into(),
            ml: (&c.ml).into(),
        })
    }
}
