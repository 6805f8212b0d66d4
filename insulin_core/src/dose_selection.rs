//! Guardrails and the dose-selection policy.
//!
//! Every candidate rate is rounded to what the pump supports, clamped to
//! `[0, max_basal_rate]` and zeroed at or below the shutoff glucose before
//! the policy picks between suppressing delivery, a micro-bolus or the
//! temp basal. The result never has both a temp basal and a micro-bolus.

use chrono::{DateTime, Utc};
use insulin_traits::PumpManager;
use serde::Serialize;

use crate::config::LoopSettings;
use crate::safety::SafetyTempBasal;
use crate::util::minutes_between;

/// Final dose for one controller path.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DoseDecision {
    pub temp_basal: f64,
    pub micro_bolus: f64,
    pub safety_result: Option<SafetyTempBasal>,
    pub biological_invariant_violation: bool,
}

impl DoseDecision {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Round, clamp and apply the low-glucose shutoff to a candidate rate.
pub fn apply_guardrails(
    rate: f64,
    settings: &LoopSettings,
    pump: &dyn PumpManager,
    glucose: f64,
    predicted: Option<f64>,
) -> f64 {
    let shutoff = settings.shutoff_mg_dl;
    if glucose <= shutoff || predicted.is_some_and(|p| p <= shutoff) {
        return 0.0;
    }
    if !rate.is_finite() {
        return 0.0;
    }
    let max = settings.max_basal_rate.max(0.0);
    let rounded = pump.round_to_supported_basal_rate(rate.clamp(0.0, max));
    if rounded.is_finite() {
        rounded.clamp(0.0, max)
    } else {
        0.0
    }
}

/// Inputs for sizing a micro-bolus.
#[derive(Debug, Clone, Copy)]
pub struct MicroBolusRequest {
    pub at: DateTime<Utc>,
    pub glucose: f64,
    pub predicted: Option<f64>,
    /// Temp basal after guardrails (U/h).
    pub temp_basal: f64,
    pub last_micro_bolus_at: Option<DateTime<Utc>>,
}

/// Micro-bolus equivalent to `fraction` of the temp-basal correction, or 0
/// when any eligibility condition fails.
pub fn micro_bolus_units(req: &MicroBolusRequest, settings: &LoopSettings, pump: &dyn PumpManager) -> f64 {
    let mb = &settings.micro_bolus;
    if let Some(last) = req.last_micro_bolus_at
        && minutes_between(last, req.at) < mb.min_interval_min
    {
        return 0.0;
    }
    if req.glucose < settings.target_mg_dl + mb.glucose_margin_mg_dl {
        return 0.0;
    }
    match req.predicted {
        Some(p) if p >= req.glucose - mb.falling_tolerance_mg_dl => {}
        _ => return 0.0,
    }
    let correction_rate = req.temp_basal - settings.basal_rate_at(req.at);
    if !(correction_rate > 0.0) {
        return 0.0;
    }
    let units = correction_rate * settings.correction_hours() * mb.fraction;
    let rounded = pump.round_to_supported_bolus_volume(units);
    if rounded.is_finite() && rounded > 0.0 {
        rounded
    } else {
        0.0
    }
}

/// Inputs for the selection policy, already through guardrails.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput {
    pub temp_basal: f64,
    pub micro_bolus: f64,
    pub biological_invariant: Option<f64>,
    pub exercising: bool,
    pub safety_result: Option<SafetyTempBasal>,
}

pub fn select_dose(input: &SelectionInput, settings: &LoopSettings) -> DoseDecision {
    let safety = &settings.safety;
    if safety.biological_invariant_enabled
        && input
            .biological_invariant
            .is_some_and(|d| d < safety.biological_invariant_threshold)
    {
        return DoseDecision {
            safety_result: input.safety_result,
            biological_invariant_violation: true,
            ..DoseDecision::zero()
        };
    }
    if settings.micro_bolus.enabled
        && input.micro_bolus > settings.micro_bolus.min_units
        && !input.exercising
    {
        return DoseDecision {
            temp_basal: 0.0,
            micro_bolus: input.micro_bolus,
            safety_result: input.safety_result,
            biological_invariant_violation: false,
        };
    }
    DoseDecision {
        temp_basal: input.temp_basal,
        micro_bolus: 0.0,
        safety_result: input.safety_result,
        biological_invariant_violation: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingPump;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 1, 16, 0, 0).unwrap()
    }

    fn input(temp_basal: f64, micro_bolus: f64, invariant: Option<f64>) -> SelectionInput {
        SelectionInput {
            temp_basal,
            micro_bolus,
            biological_invariant: invariant,
            exercising: false,
            safety_result: None,
        }
    }

    #[test]
    fn guardrails_clamp_and_shut_off() {
        let s = LoopSettings::default();
        let pump = RecordingPump::default();
        assert_eq!(apply_guardrails(9.0, &s, &pump, 150.0, None), 3.0);
        assert_eq!(apply_guardrails(-1.0, &s, &pump, 150.0, None), 0.0);
        assert_eq!(apply_guardrails(f64::NAN, &s, &pump, 150.0, None), 0.0);
        assert_eq!(apply_guardrails(2.0, &s, &pump, 75.0, None), 0.0);
        assert_eq!(apply_guardrails(2.0, &s, &pump, 150.0, Some(70.0)), 0.0);
        assert_eq!(apply_guardrails(1.23, &s, &pump, 150.0, Some(160.0)), 1.2);
    }

    #[test]
    fn micro_bolus_for_high_rising_glucose() {
        let s = LoopSettings::default();
        let pump = RecordingPump::default();
        let req = MicroBolusRequest {
            at: t0(),
            glucose: 180.0,
            predicted: Some(190.0),
            temp_basal: 2.0,
            last_micro_bolus_at: None,
        };
        let units = micro_bolus_units(&req, &s, &pump);
        assert!(units > 0.0);
        assert!((units - 0.2).abs() < 1e-9);
    }

    #[test]
    fn micro_bolus_blocked_by_conditions() {
        let s = LoopSettings::default();
        let pump = RecordingPump::default();
        let base = MicroBolusRequest {
            at: t0(),
            glucose: 180.0,
            predicted: Some(190.0),
            temp_basal: 2.0,
            last_micro_bolus_at: None,
        };
        let recent = MicroBolusRequest {
            last_micro_bolus_at: Some(t0() - Duration::minutes(3)),
            ..base
        };
        let near_target = MicroBolusRequest { glucose: 115.0, ..base };
        let falling = MicroBolusRequest { predicted: Some(170.0), ..base };
        let unknown = MicroBolusRequest { predicted: None, ..base };
        let no_correction = MicroBolusRequest { temp_basal: 1.0, ..base };
        for req in [recent, near_target, falling, unknown, no_correction] {
            assert_eq!(micro_bolus_units(&req, &s, &pump), 0.0, "{req:?}");
        }
    }

    #[test]
    fn invariant_violation_suppresses_everything() {
        let s = LoopSettings::default();
        let d = select_dose(&input(2.0, 0.3, Some(-45.0)), &s);
        assert_eq!(d.temp_basal, 0.0);
        assert_eq!(d.micro_bolus, 0.0);
        assert!(d.biological_invariant_violation);
    }

    #[test]
    fn invariant_ignored_when_disabled() {
        let mut s = LoopSettings::default();
        s.safety.biological_invariant_enabled = false;
        let d = select_dose(&input(2.0, 0.0, Some(-45.0)), &s);
        assert_eq!(d.temp_basal, 2.0);
        assert!(!d.biological_invariant_violation);
    }

    #[test]
    fn micro_bolus_replaces_temp_basal() {
        let s = LoopSettings::default();
        let d = select_dose(&input(2.0, 0.2, Some(-10.0)), &s);
        assert_eq!((d.temp_basal, d.micro_bolus), (0.0, 0.2));
        let tiny = select_dose(&input(2.0, 0.025, None), &s);
        assert_eq!((tiny.temp_basal, tiny.micro_bolus), (2.0, 0.0));
        let mut exercising = input(2.0, 0.2, None);
        exercising.exercising = true;
        assert_eq!(select_dose(&exercising, &s).micro_bolus, 0.0);
    }
}
