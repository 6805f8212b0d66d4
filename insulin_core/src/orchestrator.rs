//! The loop state machine.
//!
//! One call to `run_cycle` produces exactly one `LoopOutcome`:
//! staleness and device checks first, then both controller paths through
//! guardrails and selection, then the pump command and the safety ledger.
//!
//! A micro-bolus is sent as a zero temp basal followed by the bolus. If the
//! bolus fails, the zero temp basal stays on the pump and is still written
//! to the safety ledger; the cycle reports `PumpError`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use insulin_traits::{
    ActivitySignal, BolusActivation, Clock, GlucoseSample, GlucoseSource, PumpManager,
};

use crate::builder::{Missing, OrchestratorBuilder, validate_settings};
use crate::config::LoopSettings;
use crate::dose_selection::{
    DoseDecision, MicroBolusRequest, SelectionInput, apply_guardrails, micro_bolus_units,
    select_dose,
};
use crate::error::{BuildError, LedgerError};
use crate::frame::build_frame;
use crate::glucose::GlucoseStore;
use crate::ledger::{DoseLedger, PumpEvent};
use crate::ml::{ControllerContext, DosingController};
use crate::pid::{PidController, PidState, glucose_discrepancy, predict_glucose_in_15_minutes};
use crate::pump_error::map_pump_error;
use crate::safety::{SafetyArbiter, SafetyLedgerEntry, SafetyTempBasal};
use crate::status::{CycleReport, LoopOutcome, Trigger};
use crate::util::{minutes, minutes_between};

/// Readings kept in view for prediction when the low lookback is shorter.
const MIN_RECENT_GLUCOSE_MIN: f64 = 30.0;

pub struct LoopOrchestrator {
    settings: Arc<LoopSettings>,
    clock: Arc<dyn Clock + Send + Sync>,
    ledger: DoseLedger,
    glucose: GlucoseStore,
    pump: Option<Box<dyn PumpManager + Send>>,
    activity: Box<dyn ActivitySignal + Send>,
    controller: Option<Box<dyn DosingController + Send>>,
    pid: PidController,
    arbiter: SafetyArbiter,
    last_success: Option<DateTime<Utc>>,
    last_micro_bolus_at: Option<DateTime<Utc>>,
    last_outcome: Option<LoopOutcome>,
}

impl core::fmt::Debug for LoopOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoopOrchestrator")
            .field("has_pump", &self.pump.is_some())
            .field("controller", &self.controller.as_ref().map(|c| c.name()))
            .field("last_success", &self.last_success)
            .field("last_outcome", &self.last_outcome.as_ref().map(LoopOutcome::name))
            .finish_non_exhaustive()
    }
}

/// Per-cycle inputs shared by both controller paths.
struct PathInputs<'a> {
    at: DateTime<Utc>,
    glucose: f64,
    predicted: Option<f64>,
    biological_invariant: Option<f64>,
    exercising: bool,
    last_micro_bolus_at: Option<DateTime<Utc>>,
    settings: &'a LoopSettings,
}

/// Guardrails, micro-bolus sizing and selection for one candidate rate.
fn decide(
    rate: f64,
    safety_result: Option<SafetyTempBasal>,
    inputs: &PathInputs<'_>,
    pump: &dyn PumpManager,
) -> DoseDecision {
    let s = inputs.settings;
    let temp_basal = apply_guardrails(rate, s, pump, inputs.glucose, inputs.predicted);
    let micro_bolus = micro_bolus_units(
        &MicroBolusRequest {
            at: inputs.at,
            glucose: inputs.glucose,
            predicted: inputs.predicted,
            temp_basal,
            last_micro_bolus_at: inputs.last_micro_bolus_at,
        },
        s,
        pump,
    );
    select_dose(
        &SelectionInput {
            temp_basal,
            micro_bolus,
            biological_invariant: inputs.biological_invariant,
            exercising: inputs.exercising,
            safety_result,
        },
        s,
    )
}

impl LoopOrchestrator {
    pub fn builder() -> OrchestratorBuilder<Missing> {
        OrchestratorBuilder::default()
    }

    pub(crate) fn from_parts(
        settings: Arc<LoopSettings>,
        clock: Arc<dyn Clock + Send + Sync>,
        ledger: DoseLedger,
        arbiter: SafetyArbiter,
        pump: Option<Box<dyn PumpManager + Send>>,
        activity: Box<dyn ActivitySignal + Send>,
        controller: Option<Box<dyn DosingController + Send>>,
    ) -> Self {
        Self {
            settings,
            clock,
            ledger,
            glucose: GlucoseStore::new(),
            pump,
            activity,
            controller,
            pid: PidController::new(),
            arbiter,
            last_success: None,
            last_micro_bolus_at: None,
            last_outcome: None,
        }
    }

    pub fn settings(&self) -> &Arc<LoopSettings> {
        &self.settings
    }

    /// Swap in a new settings snapshot. Invalid settings are rejected and
    /// the current snapshot stays in effect.
    pub fn update_settings(&mut self, settings: Arc<LoopSettings>) -> Result<(), BuildError> {
        validate_settings(&settings)?;
        self.ledger.apply_settings(&settings);
        self.arbiter.apply_settings(&settings);
        self.settings = settings;
        tracing::info!("loop settings updated");
        Ok(())
    }

    pub fn record_glucose(&mut self, samples: Vec<GlucoseSample>) {
        self.glucose.add(samples);
    }

    pub fn add_pump_events(
        &mut self,
        events: Vec<PumpEvent>,
        last_sync: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.ledger
            .add_events(events, last_sync, self.settings.insulin_kind)
    }

    pub fn ledger(&self) -> &DoseLedger {
        &self.ledger
    }

    pub fn glucose(&self) -> &GlucoseStore {
        &self.glucose
    }

    pub fn arbiter(&self) -> &SafetyArbiter {
        &self.arbiter
    }

    pub fn pid_state(&self) -> &PidState {
        self.pid.state()
    }

    pub fn last_outcome(&self) -> Option<&LoopOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Run one cycle. Returns `None` when a heartbeat or CGM trigger arrives
    /// within the minimum loop interval of the last successful cycle.
    pub fn run_cycle(&mut self, trigger: Trigger) -> Option<LoopOutcome> {
        let now = self.clock.now();
        if trigger != Trigger::UserRefresh
            && let Some(last) = self.last_success
            && minutes_between(last, now) < self.settings.min_loop_interval_min
        {
            tracing::debug!(?trigger, since_last_min = minutes_between(last, now), "cycle gated");
            return None;
        }

        let outcome = self.evaluate(now);
        match &outcome {
            LoopOutcome::DoseSet(r) => tracing::info!(
                ?trigger,
                outcome = outcome.name(),
                glucose = r.glucose,
                temp_basal = r.programmed.temp_basal,
                micro_bolus = r.programmed.micro_bolus,
                iob = r.iob,
                "loop cycle"
            ),
            LoopOutcome::PumpError { error, .. } => {
                tracing::warn!(?trigger, error = %error, "loop cycle failed to enact dose")
            }
            other => tracing::info!(?trigger, outcome = other.name(), "loop cycle"),
        }
        self.last_outcome = Some(outcome.clone());
        Some(outcome)
    }

    fn evaluate(&mut self, now: DateTime<Utc>) -> LoopOutcome {
        let settings = Arc::clone(&self.settings);
        if !settings.closed_loop {
            return LoopOutcome::OpenLoop;
        }

        let glucose = match self.glucose.last_reading() {
            Some(g) if minutes_between(g.date, now) <= settings.glucose_freshness_min => g,
            other => {
                return LoopOutcome::GlucoseStale {
                    last_reading: other.map(|g| g.date),
                };
            }
        };

        if let Some(pump) = self.pump.as_mut()
            && let Some(synced) = pump.ensure_current_pump_data()
        {
            self.ledger.record_sync(synced);
        }
        let last_sync = self.ledger.last_sync();
        if last_sync.is_none_or(|t| minutes_between(t, now) > settings.pump_freshness_min) {
            return LoopOutcome::PumpStale { last_sync };
        }
        if self.pump.is_none() {
            return LoopOutcome::NoPumpManager;
        }

        let report = self.compute(now, &glucose, &settings);
        self.enact(now, report, &settings)
    }

    fn compute(
        &mut self,
        now: DateTime<Utc>,
        glucose: &GlucoseSample,
        settings: &LoopSettings,
    ) -> CycleReport {
        let iob = self.ledger.insulin_on_board(now);
        let frame = build_frame(&self.glucose, &self.ledger, now, &settings.frame);
        let lookback = settings.ml.low_lookback_min.max(MIN_RECENT_GLUCOSE_MIN);
        let since = now
            .checked_sub_signed(minutes(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = self.glucose.readings_between(since, now);
        let predicted = predict_glucose_in_15_minutes(&recent, now);
        let biological_invariant = frame.as_ref().and_then(|f| glucose_discrepancy(f, settings));

        let pid = self.pid.temp_basal(
            settings,
            glucose,
            settings.target_mg_dl,
            iob,
            frame.as_ref(),
            now,
        );
        let exercising = self.activity.is_exercising(now);
        let ml_rate = self.controller.as_mut().and_then(|c| {
            c.propose(&ControllerContext {
                at: now,
                settings,
                glucose,
                recent_glucose: &recent,
                iob,
                frame: frame.as_ref(),
                exercising,
            })
        });
        let duration = settings.temp_basal_duration();
        let bounded = ml_rate.map(|r| self.arbiter.temp_basal(now, pid.temp_basal, r, duration));

        let inputs = PathInputs {
            at: now,
            glucose: glucose.mg_dl,
            predicted,
            biological_invariant,
            exercising,
            last_micro_bolus_at: self.last_micro_bolus_at,
            settings,
        };
        let (safety, ml) = match self.pump.as_deref() {
            Some(pump) => (
                decide(pid.temp_basal, None, &inputs, pump),
                bounded.map(|b| decide(b.rate, Some(b), &inputs, pump)),
            ),
            None => (DoseDecision::zero(), None),
        };
        let programmed = match ml {
            Some(m) if settings.use_ml_controller => m,
            _ => safety,
        };
        if programmed.biological_invariant_violation {
            tracing::warn!(
                biological_invariant = ?biological_invariant,
                threshold = settings.safety.biological_invariant_threshold,
                "glucose falling faster than insulin explains; suspending delivery"
            );
        }

        CycleReport {
            at: now,
            glucose: glucose.mg_dl,
            predicted_glucose: predicted,
            iob,
            biological_invariant,
            pid,
            ml_rate,
            safety,
            ml,
            programmed,
        }
    }

    fn enact(
        &mut self,
        now: DateTime<Utc>,
        report: CycleReport,
        settings: &LoopSettings,
    ) -> LoopOutcome {
        let Some(pump) = self.pump.as_mut() else {
            return LoopOutcome::NoPumpManager;
        };
        let duration = settings.temp_basal_duration();
        let dose = report.programmed;
        let mut zero_basal_running = false;
        let result = if dose.micro_bolus > 0.0 {
            pump.enact_temp_basal(0.0, duration).and_then(|()| {
                zero_basal_running = true;
                pump.enact_bolus(dose.micro_bolus, BolusActivation::Automatic)
            })
        } else {
            pump.enact_temp_basal(dose.temp_basal, duration)
        };
        if let Err(e) = result {
            // The zero temp basal has replaced the previous dose on the pump.
            if zero_basal_running {
                tracing::warn!(error = %e, "micro-bolus failed after zero temp basal was set");
                self.record_safety_entry(safety_entry(now, &report, settings, 0.0));
            }
            return LoopOutcome::PumpError {
                error: map_pump_error(&*e),
                attempted: Box::new(report),
            };
        }

        self.record_safety_entry(safety_entry(now, &report, settings, dose.micro_bolus));
        self.last_success = Some(now);
        if dose.micro_bolus > 0.0 {
            self.last_micro_bolus_at = Some(now);
        }
        LoopOutcome::DoseSet(Box::new(report))
    }

    fn record_safety_entry(&mut self, entry: SafetyLedgerEntry) {
        if let Err(e) = self.arbiter.record_programmed_dose(entry) {
            tracing::warn!(error = %e, "safety ledger not persisted");
        }
    }
}

/// Safety ledger entry for the dose actually left running on the pump.
fn safety_entry(
    at: DateTime<Utc>,
    report: &CycleReport,
    settings: &LoopSettings,
    micro_bolus_delivered: f64,
) -> SafetyLedgerEntry {
    let dose = report.programmed;
    SafetyLedgerEntry {
        at,
        duration_min: settings.temp_basal_duration_min,
        programmed_temp_basal: dose.temp_basal,
        safety_temp_basal: report.safety.temp_basal,
        ml_temp_basal: report.ml.map(|m| m.temp_basal),
        programmed_micro_bolus: micro_bolus_delivered,
        safety_micro_bolus: report.safety.micro_bolus,
        ml_micro_bolus: report.ml.map(|m| m.micro_bolus),
        biological_invariant_violation: dose.biological_invariant_violation,
    }
}
