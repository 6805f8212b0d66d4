//! Simulated CGM reading the patient's glucose with bounded noise.

use chrono::{DateTime, Utc};
use insulin_traits::{GlucoseSample, GlucoseSource, GlucoseTrend};

use crate::patient::{GLUCOSE_FLOOR, Patient};

/// Highest value the sensor reports.
pub const SENSOR_CEILING: f64 = 400.0;

#[derive(Debug, Clone)]
pub struct SimulatedCgm {
    patient: Patient,
    noise_mg_dl: f64,
    rng: u64,
    history: Vec<GlucoseSample>,
}

impl SimulatedCgm {
    pub fn new(patient: Patient, noise_mg_dl: f64, seed: u64) -> Self {
        Self {
            patient,
            noise_mg_dl: noise_mg_dl.max(0.0),
            rng: seed.max(1),
            history: Vec::new(),
        }
    }

    // xorshift64, uniform in [-1, 1)
    fn next_noise(&mut self) -> f64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }

    /// Take a reading at `at`. The patient must already be advanced to `at`.
    pub fn sample(&mut self, at: DateTime<Utc>) -> GlucoseSample {
        let noise = self.next_noise() * self.noise_mg_dl;
        let mg_dl = (self.patient.glucose() + noise)
            .round()
            .clamp(GLUCOSE_FLOOR, SENSOR_CEILING);
        let trend = self.history.last().map(|prev| {
            let minutes = (at - prev.date).num_seconds() as f64 / 60.0;
            let rate = if minutes > 0.0 {
                (mg_dl - prev.mg_dl) / minutes
            } else {
                0.0
            };
            trend_for(rate)
        });
        let sample = GlucoseSample {
            date: at,
            mg_dl,
            trend,
        };
        self.history.push(sample);
        sample
    }
}

fn trend_for(mg_dl_per_min: f64) -> GlucoseTrend {
    match mg_dl_per_min {
        r if r >= 3.0 => GlucoseTrend::UpUpUp,
        r if r >= 2.0 => GlucoseTrend::UpUp,
        r if r >= 1.0 => GlucoseTrend::Up,
        r if r > -1.0 => GlucoseTrend::Flat,
        r if r > -2.0 => GlucoseTrend::Down,
        r if r > -3.0 => GlucoseTrend::DownDown,
        _ => GlucoseTrend::DownDownDown,
    }
}

impl GlucoseSource for SimulatedCgm {
    fn last_reading(&self) -> Option<GlucoseSample> {
        self.history.last().copied()
    }

    fn readings_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<GlucoseSample> {
        self.history
            .iter()
            .filter(|s| s.date >= start && s.date <= end)
            .copied()
            .collect()
    }
}
