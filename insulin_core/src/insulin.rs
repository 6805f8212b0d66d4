//! Insulin action curves.
//!
//! Each insulin kind maps to an exponential action curve parameterized by
//! total action duration, time of peak activity and an absorption delay.
//! `percent_effect_remaining` is the fraction of a bolus that has not yet
//! acted, as a function of minutes since delivery.

use serde::{Deserialize, Serialize};

use crate::util::STEP_MINUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InsulinKind {
    #[default]
    RapidActingAdult,
    RapidActingChild,
    Fiasp,
    Lyumjev,
    Afrezza,
}

impl InsulinKind {
    pub fn model(self) -> ExponentialInsulinModel {
        match self {
            Self::RapidActingAdult => ExponentialInsulinModel::new(360.0, 75.0, 10.0),
            Self::RapidActingChild => ExponentialInsulinModel::new(360.0, 65.0, 10.0),
            Self::Fiasp | Self::Lyumjev => ExponentialInsulinModel::new(360.0, 55.0, 10.0),
            Self::Afrezza => ExponentialInsulinModel::new(300.0, 29.0, 10.0),
        }
    }
}

impl From<insulin_config::InsulinKindCfg> for InsulinKind {
    fn from(c: insulin_config::InsulinKindCfg) -> Self {
        use insulin_config::InsulinKindCfg as K;
        match c {
            K::RapidActingAdult => Self::RapidActingAdult,
            K::RapidActingChild => Self::RapidActingChild,
            K::Fiasp => Self::Fiasp,
            K::Lyumjev => Self::Lyumjev,
            K::Afrezza => Self::Afrezza,
        }
    }
}

/// Exponential insulin action curve.
///
/// Coefficients are precomputed from `(action_duration, peak)`; all times are
/// in minutes. Requires `peak < action_duration / 2`, which holds for every
/// kind above.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialInsulinModel {
    action_duration: f64,
    peak: f64,
    delay: f64,
    tau: f64,
    a: f64,
    s: f64,
}

impl ExponentialInsulinModel {
    pub fn new(action_duration: f64, peak: f64, delay: f64) -> Self {
        let tau = peak * (1.0 - peak / action_duration) / (1.0 - 2.0 * peak / action_duration);
        let a = 2.0 * tau / action_duration;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-action_duration / tau).exp());
        Self {
            action_duration,
            peak,
            delay,
            tau,
            a,
            s,
        }
    }

    /// Minutes from delivery until the curve reaches zero.
    pub fn effect_duration(&self) -> f64 {
        self.action_duration + self.delay
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    /// Fraction of a dose still to act `minutes` after its delivery.
    ///
    /// 1.0 up to the delay, 0.0 past the action duration, monotone in between.
    pub fn percent_effect_remaining(&self, minutes: f64) -> f64 {
        let t = minutes - self.delay;
        if t.is_nan() || t <= 0.0 {
            return 1.0;
        }
        if t >= self.action_duration {
            return 0.0;
        }
        let (tau, a, s, td) = (self.tau, self.a, self.s, self.action_duration);
        let remaining =
            1.0 - s * (1.0 - a) * ((t * t / (tau * td * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0);
        remaining.clamp(0.0, 1.0)
    }

    /// IOB carried by an indefinitely long basal at `units_per_hour`,
    /// delivered in 5-minute pulses, measured just before the next pulse.
    pub fn steady_state_iob(&self, units_per_hour: f64) -> f64 {
        if !units_per_hour.is_finite() || units_per_hour <= 0.0 {
            return 0.0;
        }
        let pulse = units_per_hour * STEP_MINUTES / 60.0;
        let steps = (self.effect_duration() / STEP_MINUTES).ceil() as usize;
        (1..=steps)
            .map(|k| pulse * self.percent_effect_remaining(k as f64 * STEP_MINUTES))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_is_one_through_delay_and_zero_after_duration() {
        let m = InsulinKind::RapidActingAdult.model();
        assert_eq!(m.percent_effect_remaining(-5.0), 1.0);
        assert_eq!(m.percent_effect_remaining(10.0), 1.0);
        assert_eq!(m.percent_effect_remaining(370.0), 0.0);
        assert_eq!(m.percent_effect_remaining(1_000.0), 0.0);
    }

    #[test]
    fn curve_decreases_monotonically() {
        for kind in [
            InsulinKind::RapidActingAdult,
            InsulinKind::RapidActingChild,
            InsulinKind::Fiasp,
            InsulinKind::Afrezza,
        ] {
            let m = kind.model();
            let mut prev = 1.0;
            for minute in 0..400 {
                let v = m.percent_effect_remaining(minute as f64);
                assert!(v <= prev + 1e-12, "{kind:?} not monotone at {minute}");
                prev = v;
            }
        }
    }

    #[test]
    fn faster_insulin_acts_sooner() {
        let adult = InsulinKind::RapidActingAdult.model();
        let fiasp = InsulinKind::Fiasp.model();
        assert!(fiasp.percent_effect_remaining(90.0) < adult.percent_effect_remaining(90.0));
    }

    #[test]
    fn steady_state_iob_scales_with_rate() {
        let m = InsulinKind::RapidActingAdult.model();
        let one = m.steady_state_iob(1.0);
        assert!(one > 1.0 && one < 6.0, "got {one}");
        assert!((m.steady_state_iob(2.0) - 2.0 * one).abs() < 1e-9);
        assert_eq!(m.steady_state_iob(0.0), 0.0);
        assert_eq!(m.steady_state_iob(f64::NAN), 0.0);
    }
}
