//! Physiological controller.
//!
//! A PID loop on glucose error whose integral term accumulates the
//! delta-glucose error (how far glucose moved from what known insulin
//! explains) rather than the raw error. The output is a temp basal rate
//! that delivers the correction over one temp-basal duration on top of the
//! scheduled basal, minus insulin already on board above steady state.

use chrono::{DateTime, Utc};
use insulin_traits::GlucoseSample;
use serde::Serialize;

use crate::config::LoopSettings;
use crate::frame::FeatureFrame;
use crate::util::{STEP_MINUTES, hours_between, minutes_between};

/// Frame rows spanned by the glucose discrepancy (4 steps, 20 minutes).
const DISCREPANCY_ROWS: usize = 5;
/// Points used by the 15-minute glucose prediction.
const PREDICTION_POINTS: usize = 5;

/// Memory carried between cycles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidState {
    pub last_glucose: Option<f64>,
    pub last_glucose_at: Option<DateTime<Utc>>,
    pub accumulated_error: f64,
    last_derivative: f64,
}

/// Terms of one PID evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidResult {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub error: f64,
    pub derivative: f64,
    pub integral: f64,
    pub delta_glucose_error: Option<f64>,
    /// Insulin (U) the controller wants delivered beyond basal.
    pub correction_units: f64,
    /// Unclamped, unrounded rate in U/h.
    pub temp_basal: f64,
}

#[derive(Debug, Default)]
pub struct PidController {
    state: PidState,
}

impl PidController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &PidState {
        &self.state
    }

    /// Evaluate the controller for `glucose` and update its memory.
    ///
    /// The derivative is the change since the previous reading when that
    /// reading is younger than `pid.derivative_max_age_min`; otherwise it is
    /// 0 and the integral is left alone. Re-evaluating the same reading
    /// reuses the previous derivative and does not integrate again.
    pub fn temp_basal(
        &mut self,
        settings: &LoopSettings,
        glucose: &GlucoseSample,
        target: f64,
        iob: f64,
        frame: Option<&FeatureFrame>,
        at: DateTime<Utc>,
    ) -> PidResult {
        let gains = &settings.pid;
        let error = glucose.mg_dl - target;
        let delta_glucose_error = frame.and_then(|f| delta_glucose_error(f, settings));

        let derivative = match (self.state.last_glucose, self.state.last_glucose_at) {
            (Some(_), Some(prev_at)) if glucose.date <= prev_at => self.state.last_derivative,
            (Some(prev), Some(prev_at)) => {
                let age = minutes_between(prev_at, glucose.date);
                if age < gains.derivative_max_age_min {
                    if let Some(dge) = delta_glucose_error {
                        let hours = hours_between(prev_at, glucose.date);
                        self.state.accumulated_error = (self.state.accumulated_error + dge * hours)
                            .clamp(-gains.integral_limit, gains.integral_limit);
                    }
                    glucose.mg_dl - prev
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        if self
            .state
            .last_glucose_at
            .is_none_or(|prev_at| glucose.date > prev_at)
        {
            self.state.last_glucose = Some(glucose.mg_dl);
            self.state.last_glucose_at = Some(glucose.date);
            self.state.last_derivative = derivative;
        }

        let integral = self.state.accumulated_error;
        let basal = settings.basal_rate_at(at);
        let isf = settings.sensitivity_at(at);
        let pid_mg_dl = gains.kp * error + gains.ki * integral + gains.kd * derivative;
        let excess_iob = (iob - settings.insulin_kind.model().steady_state_iob(basal)).max(0.0);
        let correction_units = pid_mg_dl / isf - excess_iob;
        let hours = settings.correction_hours();
        let temp_basal = if hours > 0.0 {
            correction_units / hours + basal
        } else {
            basal
        };

        tracing::debug!(
            error,
            derivative,
            integral,
            excess_iob,
            correction_units,
            temp_basal,
            "pid evaluated"
        );
        PidResult {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            error,
            derivative,
            integral,
            delta_glucose_error,
            correction_units,
            temp_basal,
        }
    }
}

/// Glucose movement not explained by insulin, in mg/dL/h, over the last 4 steps.
///
/// Insulin absorbed is `IOB(start) + delivered - IOB(end)`; net of the
/// scheduled basal need it predicts a glucose change of `-net * ISF`. The
/// result is `(actual - predicted) / hours`. Negative values mean glucose
/// fell faster than insulin explains. This is the biological invariant.
pub fn glucose_discrepancy(frame: &FeatureFrame, settings: &LoopSettings) -> Option<f64> {
    let rows = frame.tail(DISCREPANCY_ROWS);
    if rows.len() < DISCREPANCY_ROWS {
        return None;
    }
    let (first, last) = (rows.first()?, rows.last()?);
    let hours = hours_between(first.time, last.time);
    if hours <= 0.0 {
        return None;
    }
    let delivered: f64 = rows[1..].iter().map(|r| r.insulin_delivered).sum();
    let absorbed = first.iob + delivered - last.iob;
    let basal_need = settings.basal_rate_at(last.time) * hours;
    let predicted_delta = -(absorbed - basal_need) * settings.sensitivity_at(last.time);
    let actual_delta = last.glucose - first.glucose;
    let discrepancy = (actual_delta - predicted_delta) / hours;
    discrepancy.is_finite().then_some(discrepancy)
}

/// The discrepancy with digestion filtered out: `None` while it exceeds
/// `safety.digestion_threshold`, since a meal is being absorbed.
pub fn delta_glucose_error(frame: &FeatureFrame, settings: &LoopSettings) -> Option<f64> {
    glucose_discrepancy(frame, settings).filter(|d| *d <= settings.safety.digestion_threshold)
}

/// Least-squares line through the most recent readings, 15 minutes ahead of `at`.
pub fn predict_glucose_in_15_minutes(samples: &[GlucoseSample], at: DateTime<Utc>) -> Option<f64> {
    let mut recent: Vec<&GlucoseSample> = samples
        .iter()
        .filter(|s| s.date <= at && s.mg_dl.is_finite())
        .collect();
    recent.sort_by_key(|s| s.date);
    let recent = &recent[recent.len().saturating_sub(PREDICTION_POINTS)..];
    if recent.len() < 2 {
        return None;
    }

    let pts: Vec<(f64, f64)> = recent
        .iter()
        .map(|s| (minutes_between(at, s.date), s.mg_dl))
        .collect();
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (x, y) in &pts {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let predicted = intercept + slope * 3.0 * STEP_MINUTES;
    predicted.is_finite().then_some(predicted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRow;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 10, 0, 0).unwrap()
    }

    fn sample(min: i64, mg_dl: f64) -> GlucoseSample {
        GlucoseSample::new(t0() + Duration::minutes(min), mg_dl)
    }

    #[test]
    fn first_evaluation_is_proportional_only() {
        let settings = LoopSettings::default();
        let mut pid = PidController::new();
        let r = pid.temp_basal(&settings, &sample(0, 150.0), 100.0, 0.0, None, t0());
        assert_eq!(r.derivative, 0.0);
        assert_eq!(r.integral, 0.0);
        // 50 mg/dL / 50 ISF = 1 U over 0.5 h, on top of 1 U/h basal
        assert!((r.temp_basal - 3.0).abs() < 1e-9, "{r:?}");
    }

    #[test]
    fn derivative_resets_after_stale_previous_reading() {
        let settings = LoopSettings::default();
        let mut pid = PidController::new();
        pid.temp_basal(&settings, &sample(0, 120.0), 100.0, 0.0, None, t0());
        let fresh = pid.temp_basal(&settings, &sample(5, 130.0), 100.0, 0.0, None, t0());
        assert_eq!(fresh.derivative, 10.0);
        let stale = pid.temp_basal(&settings, &sample(20, 140.0), 100.0, 0.0, None, t0());
        assert_eq!(stale.derivative, 0.0);
    }

    #[test]
    fn repeated_reading_reuses_derivative() {
        let settings = LoopSettings::default();
        let mut pid = PidController::new();
        pid.temp_basal(&settings, &sample(0, 120.0), 100.0, 0.0, None, t0());
        let a = pid.temp_basal(&settings, &sample(5, 126.0), 100.0, 0.0, None, t0());
        let b = pid.temp_basal(&settings, &sample(5, 126.0), 100.0, 0.0, None, t0());
        assert_eq!(a.derivative, b.derivative);
        assert_eq!(a.integral, b.integral);
    }

    #[test]
    fn iob_above_steady_state_reduces_rate() {
        let settings = LoopSettings::default();
        let mut pid = PidController::new();
        let lean = pid.temp_basal(&settings, &sample(0, 150.0), 100.0, 0.0, None, t0());
        let mut pid = PidController::new();
        let loaded = pid.temp_basal(&settings, &sample(0, 150.0), 100.0, 10.0, None, t0());
        assert!(loaded.temp_basal < lean.temp_basal);
    }

    fn flat_frame(glucose_step: f64) -> FeatureFrame {
        let rows = (0..5)
            .map(|k| FrameRow {
                time: t0() + Duration::minutes(5 * k),
                glucose: 120.0 + glucose_step * k as f64,
                insulin_delivered: 0.0,
                iob: 0.0,
            })
            .collect();
        FeatureFrame { rows }
    }

    #[test]
    fn discrepancy_accounts_for_missing_basal() {
        let settings = LoopSettings::default();
        // No insulin at all: basal need of 1/3 U predicts +16.7 mg/dL over 20 min.
        let d = glucose_discrepancy(&flat_frame(0.0), &settings).unwrap();
        assert!((d - (-50.0)).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn digestion_is_filtered() {
        let settings = LoopSettings::default();
        let rising = flat_frame(10.0);
        assert!(glucose_discrepancy(&rising, &settings).unwrap() > 40.0);
        assert!(delta_glucose_error(&rising, &settings).is_none());
    }

    #[test]
    fn prediction_extrapolates_linear_trend() {
        let samples: Vec<_> = (0..5).map(|k| sample(5 * k, 100.0 + 2.0 * k as f64)).collect();
        let at = t0() + Duration::minutes(20);
        let p = predict_glucose_in_15_minutes(&samples, at).unwrap();
        assert!((p - 114.0).abs() < 1e-9, "got {p}");
    }

    #[test]
    fn prediction_needs_two_distinct_points() {
        assert!(predict_glucose_in_15_minutes(&[sample(0, 100.0)], t0()).is_none());
        let same_time = [sample(0, 100.0), sample(0, 110.0)];
        assert!(predict_glucose_in_15_minutes(&same_time, t0()).is_none());
    }
}
