//! Type-state builder for `LoopOrchestrator`.
//!
//! Settings must be provided before `build()` is available. `try_build()`
//! is always available for dynamic checks. Everything else has a default:
//! system clock, no pump, never exercising, no advisory controller and
//! in-memory ledgers.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use eyre::WrapErr;
use insulin_traits::{ActivitySignal, Clock, NeverExercising, PumpManager, SystemClock};

use crate::config::LoopSettings;
use crate::error::{BuildError, Result};
use crate::ledger::DoseLedger;
use crate::ml::DosingController;
use crate::orchestrator::LoopOrchestrator;
use crate::safety::SafetyArbiter;

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct OrchestratorBuilder<S> {
    settings: Option<Arc<LoopSettings>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    pump: Option<Box<dyn PumpManager + Send>>,
    activity: Option<Box<dyn ActivitySignal + Send>>,
    controller: Option<Box<dyn DosingController + Send>>,
    dose_ledger_path: Option<PathBuf>,
    safety_ledger_path: Option<PathBuf>,
    _s: PhantomData<S>,
}

impl Default for OrchestratorBuilder<Missing> {
    fn default() -> Self {
        Self {
            settings: None,
            clock: None,
            pump: None,
            activity: None,
            controller: None,
            dose_ledger_path: None,
            safety_ledger_path: None,
            _s: PhantomData,
        }
    }
}

/// Reject settings the controllers cannot run with.
pub fn validate_settings(s: &LoopSettings) -> std::result::Result<(), BuildError> {
    if !(s.max_basal_rate.is_finite() && s.max_basal_rate > 0.0) {
        return Err(BuildError::InvalidConfig("max_basal_rate must be > 0"));
    }
    if !(s.shutoff_mg_dl < s.target_mg_dl) {
        return Err(BuildError::InvalidConfig("shutoff must be below target"));
    }
    if !(s.temp_basal_duration_min > 0.0) {
        return Err(BuildError::InvalidConfig("temp basal duration must be > 0"));
    }
    if s.frame.rows < 5 {
        return Err(BuildError::InvalidConfig("frame rows must be >= 5"));
    }
    if s.basal_schedule.values().iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(BuildError::InvalidConfig("basal schedule must be finite and >= 0"));
    }
    if s
        .sensitivity_schedule
        .values()
        .iter()
        .any(|v| !v.is_finite() || *v <= 0.0)
    {
        return Err(BuildError::InvalidConfig("sensitivity schedule must be > 0"));
    }
    if !(s.safety.horizon_hours > 0.0 && s.safety.horizon_hours <= 24.0) {
        return Err(BuildError::InvalidConfig("safety horizon must be in (0, 24] h"));
    }
    let threshold = s.safety.biological_invariant_threshold;
    if !(threshold.is_finite() && threshold < 0.0) {
        return Err(BuildError::InvalidConfig(
            "biological invariant threshold must be finite and < 0",
        ));
    }
    let retention = s.safety.ledger_retention_hours;
    if !(retention >= s.safety.horizon_hours && retention <= 24.0 * 7.0) {
        return Err(BuildError::InvalidConfig(
            "safety ledger retention must cover the horizon and be <= 168 h",
        ));
    }
    if !(s.ml.low_lookback_min >= 0.0 && s.ml.low_lookback_min <= 24.0 * 60.0) {
        return Err(BuildError::InvalidConfig("ml low lookback must be in [0, 1440] min"));
    }
    Ok(())
}

impl<S> OrchestratorBuilder<S> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<LoopOrchestrator> {
        let settings = self
            .settings
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSettings))?;
        validate_settings(&settings).map_err(eyre::Report::new)?;

        let ledger = match self.dose_ledger_path {
            Some(p) => DoseLedger::open(&p, &settings)
                .wrap_err_with(|| format!("open dose ledger {}", p.display()))?,
            None => DoseLedger::new(&settings),
        };
        let arbiter = match self.safety_ledger_path {
            Some(p) => SafetyArbiter::open(&p, &settings)
                .wrap_err_with(|| format!("open safety ledger {}", p.display()))?,
            None => SafetyArbiter::new(&settings),
        };

        Ok(LoopOrchestrator::from_parts(
            settings,
            self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
            ledger,
            arbiter,
            self.pump,
            self.activity.unwrap_or_else(|| Box::new(NeverExercising)),
            self.controller,
        ))
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_pump(mut self, pump: impl PumpManager + Send + 'static) -> Self {
        self.pump = Some(Box::new(pump));
        self
    }

    pub fn with_activity(mut self, activity: impl ActivitySignal + Send + 'static) -> Self {
        self.activity = Some(Box::new(activity));
        self
    }

    pub fn with_controller(mut self, controller: Box<dyn DosingController + Send>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Persist the dose ledger at `path`, loading what is already there.
    pub fn with_dose_ledger(mut self, path: impl Into<PathBuf>) -> Self {
        self.dose_ledger_path = Some(path.into());
        self
    }

    /// Persist the safety ledger at `path`, loading what is already there.
    pub fn with_safety_ledger(mut self, path: impl Into<PathBuf>) -> Self {
        self.safety_ledger_path = Some(path.into());
        self
    }
}

impl OrchestratorBuilder<Missing> {
    pub fn with_settings(self, settings: Arc<LoopSettings>) -> OrchestratorBuilder<Set> {
        OrchestratorBuilder {
            settings: Some(settings),
            clock: self.clock,
            pump: self.pump,
            activity: self.activity,
            controller: self.controller,
            dose_ledger_path: self.dose_ledger_path,
            safety_ledger_path: self.safety_ledger_path,
            _s: PhantomData,
        }
    }
}

impl OrchestratorBuilder<Set> {
    /// Validate and build. Only available once settings are set.
    pub fn build(self) -> Result<LoopOrchestrator> {
        self.try_build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_build_without_settings_fails() {
        let err = OrchestratorBuilder::default().try_build().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingSettings)
        ));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = LoopSettings {
            shutoff_mg_dl: 120.0,
            ..LoopSettings::default()
        };
        let err = OrchestratorBuilder::default()
            .with_settings(Arc::new(settings))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("shutoff"));
    }

    #[test]
    fn non_finite_safety_limits_are_rejected() {
        let mut settings = LoopSettings::default();
        settings.safety.biological_invariant_threshold = f64::NAN;
        assert!(validate_settings(&settings).is_err());

        let mut settings = LoopSettings::default();
        settings.safety.ledger_retention_hours = f64::NAN;
        assert!(validate_settings(&settings).is_err());

        let mut settings = LoopSettings::default();
        settings.ml.low_lookback_min = 1e12;
        assert!(validate_settings(&settings).is_err());

        assert!(validate_settings(&LoopSettings::default()).is_ok());
    }
}
