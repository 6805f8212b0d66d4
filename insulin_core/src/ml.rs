//! Advisory dosing controllers.
//!
//! These propose a temp basal rate alongside the physiological controller.
//! They are allowed to decline at any time and are never trusted directly:
//! the safety arbiter bounds how far their output may pull delivery.

use std::path::Path;

use chrono::{DateTime, Utc};
use insulin_traits::GlucoseSample;
use serde::{Deserialize, Serialize};

use crate::config::LoopSettings;
use crate::frame::FeatureFrame;
use crate::util::{hours_between, minutes};

/// Everything an advisory controller may look at in one cycle.
#[derive(Debug, Clone, Copy)]
pub struct ControllerContext<'a> {
    pub at: DateTime<Utc>,
    pub settings: &'a LoopSettings,
    pub glucose: &'a GlucoseSample,
    /// Readings over at least the low-glucose lookback, oldest first.
    pub recent_glucose: &'a [GlucoseSample],
    pub iob: f64,
    pub frame: Option<&'a FeatureFrame>,
    pub exercising: bool,
}

impl ControllerContext<'_> {
    /// Why an advisory controller should stay out of this cycle, if at all.
    pub fn decline_reason(&self) -> Option<&'static str> {
        if self.exercising {
            return Some("exercising");
        }
        let Some(since) = self
            .at
            .checked_sub_signed(minutes(self.settings.ml.low_lookback_min))
        else {
            return Some("low lookback out of range");
        };
        let low = self
            .recent_glucose
            .iter()
            .chain(std::iter::once(self.glucose))
            .any(|s| s.date >= since && s.mg_dl < self.settings.ml.low_glucose_mg_dl);
        if low {
            return Some("recent low glucose");
        }
        if self.frame.is_none() {
            return Some("no feature frame");
        }
        None
    }

    fn excess_iob(&self) -> f64 {
        let basal = self.settings.basal_rate_at(self.at);
        (self.iob - self.settings.insulin_kind.model().steady_state_iob(basal)).max(0.0)
    }
}

/// A controller that proposes a temp basal rate (U/h) or declines.
pub trait DosingController {
    fn name(&self) -> &'static str;
    fn propose(&mut self, ctx: &ControllerContext<'_>) -> Option<f64>;
}

/// Scales insulin sensitivity with glucose on a log curve and re-runs the
/// correction against the glucose projected 15 minutes out.
#[derive(Debug, Clone)]
pub struct DynamicSensitivityController {
    /// Curve constant (mg/dL); 55 suits rapid-acting analogues.
    pub insulin_divisor: f64,
    pub min_ratio: f64,
    pub max_ratio: f64,
}

impl Default for DynamicSensitivityController {
    fn default() -> Self {
        Self {
            insulin_divisor: 55.0,
            min_ratio: 0.5,
            max_ratio: 2.0,
        }
    }
}

impl DynamicSensitivityController {
    /// Multiplier applied to the scheduled ISF at `glucose`; 1.0 at target.
    pub fn sensitivity_ratio(&self, glucose: f64, target: f64) -> f64 {
        let d = self.insulin_divisor;
        let ratio = (target / d + 1.0).ln() / (glucose / d + 1.0).ln();
        if ratio.is_finite() {
            ratio.clamp(self.min_ratio, self.max_ratio)
        } else {
            1.0
        }
    }
}

impl DosingController for DynamicSensitivityController {
    fn name(&self) -> &'static str {
        "dynamic_sensitivity"
    }

    fn propose(&mut self, ctx: &ControllerContext<'_>) -> Option<f64> {
        if let Some(reason) = ctx.decline_reason() {
            tracing::debug!(controller = self.name(), reason, "declined");
            return None;
        }
        let frame = ctx.frame?;
        let rows = frame.tail(4);
        let (first, last) = (rows.first()?, rows.last()?);
        let hours = hours_between(first.time, last.time);
        let trend_per_hour = if hours > 0.0 {
            (last.glucose - first.glucose) / hours
        } else {
            0.0
        };
        let projected = ctx.glucose.mg_dl + trend_per_hour * 0.25;

        let s = ctx.settings;
        let target = s.target_mg_dl;
        let isf = s.sensitivity_at(ctx.at) * self.sensitivity_ratio(projected.max(1.0), target);
        let correction = (projected - target) / isf - ctx.excess_iob();
        let hours = s.correction_hours();
        if hours <= 0.0 {
            return None;
        }
        let rate = correction / hours + s.basal_rate_at(ctx.at);
        rate.is_finite().then_some(rate)
    }
}

/// Weights of a linear dosing model, as exported by offline training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    /// mg/dL above target.
    pub glucose_error: f64,
    /// mg/dL change over the last frame step.
    pub glucose_trend: f64,
    pub iob: f64,
    /// Units delivered over the whole frame.
    pub recent_delivery: f64,
    /// Scheduled basal rate (U/h).
    pub basal: f64,
}

impl LinearModel {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| eyre::eyre!("read model {}: {e}", path.display()))?;
        let model: Self = serde_json::from_slice(&bytes)
            .map_err(|e| eyre::eyre!("parse model {}: {e}", path.display()))?;
        let weights = [
            model.intercept,
            model.glucose_error,
            model.glucose_trend,
            model.iob,
            model.recent_delivery,
            model.basal,
        ];
        if weights.iter().any(|w| !w.is_finite()) {
            eyre::bail!("model {} has non-finite weights", path.display());
        }
        Ok(model)
    }

    pub fn predict(&self, ctx: &ControllerContext<'_>, frame: &FeatureFrame) -> Option<f64> {
        let rows = frame.tail(2);
        let trend = match rows {
            [prev, last] => last.glucose - prev.glucose,
            _ => 0.0,
        };
        let delivered: f64 = frame.rows.iter().map(|r| r.insulin_delivered).sum();
        let rate = self.intercept
            + self.glucose_error * (ctx.glucose.mg_dl - ctx.settings.target_mg_dl)
            + self.glucose_trend * trend
            + self.iob * ctx.iob
            + self.recent_delivery * delivered
            + self.basal * ctx.settings.basal_rate_at(ctx.at);
        rate.is_finite().then_some(rate)
    }
}

/// Runs a `LinearModel` artifact; declines while the artifact is missing.
#[derive(Debug, Clone)]
pub struct LinearModelController {
    model: Option<LinearModel>,
}

impl LinearModelController {
    pub fn new(model: LinearModel) -> Self {
        Self { model: Some(model) }
    }

    /// Load the artifact at `path`. A missing or unreadable artifact is
    /// logged and leaves the controller declining.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let model = match LinearModel::load(path) {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "linear model unavailable; controller will decline");
                None
            }
        };
        Self { model }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }
}

impl DosingController for LinearModelController {
    fn name(&self) -> &'static str {
        "linear_model"
    }

    fn propose(&mut self, ctx: &ControllerContext<'_>) -> Option<f64> {
        let Some(model) = &self.model else {
            tracing::debug!(controller = "linear_model", reason = "no artifact", "declined");
            return None;
        };
        if let Some(reason) = ctx.decline_reason() {
            tracing::debug!(controller = "linear_model", reason, "declined");
            return None;
        }
        model.predict(ctx, ctx.frame?)
    }
}

/// Controller selected by `[ml] controller`, if any.
pub fn controller_from_config(
    kind: insulin_config::MlControllerKind,
    model_path: Option<&Path>,
) -> Option<Box<dyn DosingController + Send>> {
    use insulin_config::MlControllerKind as K;
    match kind {
        K::None => None,
        K::DynamicSensitivity => Some(Box::new(DynamicSensitivityController::default())),
        K::LinearModel => model_path.map(|p| {
            Box::new(LinearModelController::from_path(p)) as Box<dyn DosingController + Send>
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameRow;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 14, 0, 0).unwrap()
    }

    fn frame(glucose: f64) -> FeatureFrame {
        FeatureFrame {
            rows: (0..12)
                .map(|k| FrameRow {
                    time: t0() - Duration::minutes(55 - 5 * k),
                    glucose,
                    insulin_delivered: 0.05,
                    iob: 1.0,
                })
                .collect(),
        }
    }

    fn ctx<'a>(
        settings: &'a LoopSettings,
        glucose: &'a GlucoseSample,
        recent: &'a [GlucoseSample],
        frame: Option<&'a FeatureFrame>,
    ) -> ControllerContext<'a> {
        ControllerContext {
            at: t0(),
            settings,
            glucose,
            recent_glucose: recent,
            iob: 0.0,
            frame,
            exercising: false,
        }
    }

    #[test]
    fn sensitivity_ratio_is_one_at_target_and_shrinks_when_high() {
        let c = DynamicSensitivityController::default();
        assert!((c.sensitivity_ratio(100.0, 100.0) - 1.0).abs() < 1e-12);
        assert!(c.sensitivity_ratio(250.0, 100.0) < 1.0);
        assert!(c.sensitivity_ratio(70.0, 100.0) > 1.0);
    }

    #[test]
    fn dynamic_controller_raises_rate_when_high() {
        let settings = LoopSettings::default();
        let g = GlucoseSample::new(t0(), 200.0);
        let f = frame(200.0);
        let rate = DynamicSensitivityController::default()
            .propose(&ctx(&settings, &g, &[], Some(&f)))
            .unwrap();
        assert!(rate > settings.basal_rate_at(t0()));
    }

    #[test]
    fn controllers_decline_after_recent_low() {
        let settings = LoopSettings::default();
        let g = GlucoseSample::new(t0(), 150.0);
        let recent = [GlucoseSample::new(t0() - Duration::minutes(40), 65.0)];
        let f = frame(150.0);
        let c = ctx(&settings, &g, &recent, Some(&f));
        assert_eq!(c.decline_reason(), Some("recent low glucose"));
        assert!(DynamicSensitivityController::default().propose(&c).is_none());
    }

    #[test]
    fn huge_low_lookback_still_sees_recent_low() {
        let mut settings = LoopSettings::default();
        settings.ml.low_lookback_min = 1e12;
        let g = GlucoseSample::new(t0(), 150.0);
        let recent = [GlucoseSample::new(t0() - Duration::minutes(40), 65.0)];
        let f = frame(150.0);
        let c = ctx(&settings, &g, &recent, Some(&f));
        assert_eq!(c.decline_reason(), Some("recent low glucose"));
    }

    #[test]
    fn old_low_does_not_block() {
        let settings = LoopSettings::default();
        let g = GlucoseSample::new(t0(), 150.0);
        let recent = [GlucoseSample::new(t0() - Duration::minutes(90), 60.0)];
        let f = frame(150.0);
        assert_eq!(ctx(&settings, &g, &recent, Some(&f)).decline_reason(), None);
    }

    #[test]
    fn missing_frame_or_exercise_declines() {
        let settings = LoopSettings::default();
        let g = GlucoseSample::new(t0(), 150.0);
        assert_eq!(ctx(&settings, &g, &[], None).decline_reason(), Some("no feature frame"));
        let f = frame(150.0);
        let mut c = ctx(&settings, &g, &[], Some(&f));
        c.exercising = true;
        assert_eq!(c.decline_reason(), Some("exercising"));
    }

    #[test]
    fn linear_model_without_artifact_declines() {
        let settings = LoopSettings::default();
        let g = GlucoseSample::new(t0(), 150.0);
        let f = frame(150.0);
        let mut c = LinearModelController::from_path("/nonexistent/model.json");
        assert!(!c.is_loaded());
        assert!(c.propose(&ctx(&settings, &g, &[], Some(&f))).is_none());
    }

    #[test]
    fn linear_model_applies_weights() {
        let settings = LoopSettings::default();
        let g = GlucoseSample::new(t0(), 150.0);
        let f = frame(150.0);
        let model = LinearModel {
            intercept: 0.1,
            glucose_error: 0.02,
            glucose_trend: 0.0,
            iob: -0.5,
            recent_delivery: 0.0,
            basal: 1.0,
        };
        let rate = LinearModelController::new(model)
            .propose(&ctx(&settings, &g, &[], Some(&f)))
            .unwrap();
        // 0.1 + 0.02 * 50 + 1.0 * 1.0
        assert!((rate - 2.1).abs() < 1e-9, "got {rate}");
    }
}
