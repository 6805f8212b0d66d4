//! Minimal glucose response model.
//!
//! Glucose moves by the insulin absorbed in excess of the basal need times
//! the sensitivity, plus carbohydrate absorption and a constant drift.
//! Insulin absorption follows the same action curve the dosing engine uses.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use insulin_core::{ExponentialInsulinModel, InsulinKind};

/// Lowest value the model reports, like a CGM's "LO" floor.
pub const GLUCOSE_FLOOR: f64 = 39.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatientParams {
    pub initial_glucose: f64,
    /// mg/dL drop per unit absorbed.
    pub insulin_sensitivity: f64,
    /// Insulin that holds glucose flat (U/h).
    pub basal_need: f64,
    /// mg/dL rise per gram of carbohydrate.
    pub carb_sensitivity: f64,
    /// Minutes over which a meal is absorbed.
    pub carb_absorption_min: f64,
    /// Unexplained glucose drift (mg/dL/h).
    pub drift_mg_dl_per_hour: f64,
    pub insulin_kind: InsulinKind,
}

impl Default for PatientParams {
    fn default() -> Self {
        Self {
            initial_glucose: 120.0,
            insulin_sensitivity: 50.0,
            basal_need: 1.0,
            carb_sensitivity: 4.0,
            carb_absorption_min: 120.0,
            drift_mg_dl_per_hour: 0.0,
            insulin_kind: InsulinKind::RapidActingAdult,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pulse {
    at: DateTime<Utc>,
    units: f64,
}

#[derive(Debug, Clone, Copy)]
struct Meal {
    at: DateTime<Utc>,
    grams: f64,
}

#[derive(Debug)]
struct State {
    params: PatientParams,
    model: ExponentialInsulinModel,
    glucose: f64,
    now: DateTime<Utc>,
    pulses: Vec<Pulse>,
    meals: Vec<Meal>,
}

/// Shared handle to one simulated patient. Clones observe the same body.
#[derive(Debug, Clone)]
pub struct Patient {
    state: Arc<Mutex<State>>,
}

impl Patient {
    /// Patient at steady state at `at`: prior basal delivery is already on board.
    pub fn new(params: PatientParams, at: DateTime<Utc>) -> Self {
        let model = params.insulin_kind.model();
        let step = Duration::minutes(5);
        let steps = (model.effect_duration() / 5.0).ceil() as i32;
        let pulses = (1..=steps)
            .rev()
            .map(|k| Pulse {
                at: at - step * k,
                units: params.basal_need * 5.0 / 60.0,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(State {
                params,
                model,
                glucose: params.initial_glucose,
                now: at,
                pulses,
                meals: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn glucose(&self) -> f64 {
        self.state().glucose
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.state().now
    }

    pub fn params(&self) -> PatientParams {
        self.state().params
    }

    /// Start of the basal history the patient was created with.
    pub fn steady_since(&self) -> DateTime<Utc> {
        let s = self.state();
        s.pulses.first().map_or(s.now, |p| p.at)
    }

    /// Insulin entering the body at `at`.
    pub fn deliver(&self, at: DateTime<Utc>, units: f64) {
        if units > 0.0 && units.is_finite() {
            self.state().pulses.push(Pulse { at, units });
        }
    }

    pub fn eat(&self, at: DateTime<Utc>, grams: f64) {
        if grams > 0.0 && grams.is_finite() {
            self.state().meals.push(Meal { at, grams });
        }
    }

    /// Integrate glucose forward to `to`.
    pub fn advance(&self, to: DateTime<Utc>) {
        let mut s = self.state();
        if to <= s.now {
            return;
        }
        let from = s.now;
        let hours = (to - from).num_milliseconds() as f64 / 3_600_000.0;
        let model = s.model;
        let absorbed: f64 = s
            .pulses
            .iter()
            .map(|p| {
                let since = |t: DateTime<Utc>| (t - p.at).num_milliseconds() as f64 / 60_000.0;
                if p.at >= to {
                    return 0.0;
                }
                let before = if p.at >= from {
                    1.0
                } else {
                    model.percent_effect_remaining(since(from))
                };
                p.units * (before - model.percent_effect_remaining(since(to)))
            })
            .sum();
        let absorption = s.params.carb_absorption_min.max(1.0);
        let carbs: f64 = s
            .meals
            .iter()
            .map(|m| {
                let done = |t: DateTime<Utc>| {
                    ((t - m.at).num_milliseconds() as f64 / 60_000.0 / absorption).clamp(0.0, 1.0)
                };
                m.grams * (done(to) - done(from))
            })
            .sum();

        let p = s.params;
        let delta = -(absorbed - p.basal_need * hours) * p.insulin_sensitivity
            + carbs * p.carb_sensitivity
            + p.drift_mg_dl_per_hour * hours;
        s.glucose = (s.glucose + delta).max(GLUCOSE_FLOOR);
        s.now = to;

        let horizon = to - Duration::minutes(model.effect_duration().ceil() as i64);
        s.pulses.retain(|p| p.at >= horizon);
        s.meals
            .retain(|m| (to - m.at).num_milliseconds() as f64 / 60_000.0 <= absorption);
        tracing::trace!(glucose = s.glucose, absorbed, carbs, "patient advanced");
    }
}
