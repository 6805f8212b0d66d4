//! Feature frames: glucose and insulin on a regular 5-minute grid.
//!
//! Rows are oldest first and the last row sits exactly at the reference
//! time. Glucose is linearly interpolated between real CGM readings and
//! held flat outside their span.

use chrono::{DateTime, Utc};
use insulin_traits::{GlucoseSample, GlucoseSource};

use crate::config::FrameCfg;
use crate::ledger::DoseLedger;
use crate::util::{STEP_MINUTES, minutes, minutes_between};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRow {
    pub time: DateTime<Utc>,
    pub glucose: f64,
    /// Units delivered in `[time - 5 min, time)`, quantized like IOB.
    pub insulin_delivered: f64,
    pub iob: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub rows: Vec<FrameRow>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn last(&self) -> Option<&FrameRow> {
        self.rows.last()
    }

    /// The most recent `n` rows (fewer when the frame is shorter).
    pub fn tail(&self, n: usize) -> &[FrameRow] {
        &self.rows[self.rows.len().saturating_sub(n)..]
    }
}

/// Build a frame of `cfg.rows` rows ending at `at`.
///
/// Returns `None` when fewer than `cfg.min_real_samples` readings fall in
/// the window, when the first or last reading is further than
/// `cfg.max_edge_gap_min` from the matching window edge, or when two
/// readings share a timestamp around an interpolated row.
pub fn build_frame(
    glucose: &dyn GlucoseSource,
    ledger: &DoseLedger,
    at: DateTime<Utc>,
    cfg: &FrameCfg,
) -> Option<FeatureFrame> {
    if cfg.rows == 0 {
        return None;
    }
    let step = minutes(STEP_MINUTES);
    let span = minutes(STEP_MINUTES * (cfg.rows - 1) as f64);
    let window_start = at - span;
    let edge_gap = minutes(cfg.max_edge_gap_min);

    let samples: Vec<GlucoseSample> = glucose
        .readings_between(window_start - edge_gap, at)
        .into_iter()
        .filter(|s| s.mg_dl.is_finite())
        .collect();
    let real = samples
        .iter()
        .filter(|s| s.date >= window_start && s.date <= at)
        .count();
    if real < cfg.min_real_samples {
        tracing::debug!(real, required = cfg.min_real_samples, "frame: not enough CGM data");
        return None;
    }
    let (first, last) = (samples.first()?, samples.last()?);
    if first.date > window_start + edge_gap || last.date < at - edge_gap {
        tracing::debug!(first = %first.date, last = %last.date, "frame: readings do not bracket window");
        return None;
    }

    let view = ledger.view(at);
    let mut rows = Vec::with_capacity(cfg.rows);
    for k in 0..cfg.rows {
        let time = window_start + step * k as i32;
        let glucose = interpolate(&samples, time)?;
        rows.push(FrameRow {
            time,
            glucose,
            insulin_delivered: view.insulin_delivered(time - step, time),
            iob: view.insulin_on_board(time),
        });
        tracing::trace!(%time, glucose, "frame row");
    }
    Some(FeatureFrame { rows })
}

/// Linear interpolation over time-ordered `samples`, clamped at both ends.
fn interpolate(samples: &[GlucoseSample], t: DateTime<Utc>) -> Option<f64> {
    let (first, last) = (samples.first()?, samples.last()?);
    if t <= first.date {
        return Some(first.mg_dl);
    }
    if t >= last.date {
        return Some(last.mg_dl);
    }
    let after = samples.partition_point(|s| s.date < t);
    let next = samples.get(after)?;
    if next.date == t {
        return Some(next.mg_dl);
    }
    let prev = samples.get(after.checked_sub(1)?)?;
    let dt = minutes_between(prev.date, next.date);
    if dt <= 0.0 {
        return None;
    }
    let frac = minutes_between(prev.date, t) / dt;
    Some(prev.mg_dl + (next.mg_dl - prev.mg_dl) * frac)
}
