//! Safety arbiter: an insulin envelope around the advisory controller.
//!
//! Every enacted dose is recorded together with what the physiological
//! path alone would have programmed. The difference is the insulin
//! attributable to the advisory signal. Over any horizon window that
//! attribution stays within `+/- max_basal_rate * horizon`; once the
//! headroom is spent the arbiter returns the physiological rate.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atomic::write_json_atomic;
use crate::config::LoopSettings;
use crate::error::LedgerError;
use crate::util::{duration_hours, minutes, overlap_hours};

/// One enacted dosing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLedgerEntry {
    pub at: DateTime<Utc>,
    pub duration_min: f64,
    pub programmed_temp_basal: f64,
    pub safety_temp_basal: f64,
    #[serde(default)]
    pub ml_temp_basal: Option<f64>,
    pub programmed_micro_bolus: f64,
    pub safety_micro_bolus: f64,
    #[serde(default)]
    pub ml_micro_bolus: Option<f64>,
    #[serde(default)]
    pub biological_invariant_violation: bool,
}

impl SafetyLedgerEntry {
    /// Entry for a plain temp basal with no micro-bolus.
    pub fn temp_basal(at: DateTime<Utc>, duration_min: f64, programmed: f64, safety: f64) -> Self {
        Self {
            at,
            duration_min,
            programmed_temp_basal: programmed,
            safety_temp_basal: safety,
            ml_temp_basal: None,
            programmed_micro_bolus: 0.0,
            safety_micro_bolus: 0.0,
            ml_micro_bolus: None,
            biological_invariant_violation: false,
        }
    }

    fn programmed_end(&self) -> DateTime<Utc> {
        self.at + minutes(self.duration_min.max(0.0))
    }
}

/// Advisory-attributable insulin in a window, split by sign.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MlAttribution {
    /// Sum of positive contributions (U).
    pub positive: f64,
    /// Sum of negative contributions (U, <= 0).
    pub negative: f64,
}

impl MlAttribution {
    pub fn net(&self) -> f64 {
        self.positive + self.negative
    }

    fn add(&mut self, units: f64) {
        if units > 0.0 {
            self.positive += units;
        } else {
            self.negative += units;
        }
    }
}

/// Output of `SafetyArbiter::temp_basal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafetyTempBasal {
    /// Rate to program for the advisory path (U/h).
    pub rate: f64,
    /// Net advisory insulin over the horizon before this decision (U).
    pub ml_insulin_last_3h: f64,
}

#[derive(Debug)]
pub struct SafetyArbiter {
    entries: Vec<SafetyLedgerEntry>,
    path: Option<PathBuf>,
    max_basal_rate: f64,
    horizon_hours: f64,
    retention_hours: f64,
}

impl SafetyArbiter {
    pub fn new(settings: &LoopSettings) -> Self {
        Self {
            entries: Vec::new(),
            path: None,
            max_basal_rate: settings.max_basal_rate,
            horizon_hours: settings.safety.horizon_hours,
            retention_hours: settings.safety.ledger_retention_hours,
        }
    }

    /// Arbiter persisted at `path`; loads existing entries when the file exists.
    pub fn open(path: impl Into<PathBuf>, settings: &LoopSettings) -> Result<Self, LedgerError> {
        let path = path.into();
        let mut arbiter = Self::new(settings);
        arbiter.entries = load_entries(&path)?;
        arbiter.entries.sort_by_key(|e| e.at);
        arbiter.path = Some(path);
        Ok(arbiter)
    }

    pub fn apply_settings(&mut self, settings: &LoopSettings) {
        self.max_basal_rate = settings.max_basal_rate;
        self.horizon_hours = settings.safety.horizon_hours;
        self.retention_hours = settings.safety.ledger_retention_hours;
    }

    pub fn entries(&self) -> &[SafetyLedgerEntry] {
        &self.entries
    }

    /// Bound on advisory insulin in either direction over one horizon (U).
    pub fn bound(&self) -> f64 {
        self.max_basal_rate * self.horizon_hours
    }

    /// Advisory-attributable insulin over `[at - horizon, at]`.
    ///
    /// A temp basal counts from its start until the earlier of its
    /// programmed end and the next entry. A micro-bolus counts when it falls
    /// inside the window.
    pub fn ml_attribution(&self, at: DateTime<Utc>) -> MlAttribution {
        let window_start = at - minutes(self.horizon_hours * 60.0);
        let mut out = MlAttribution::default();
        for (i, e) in self.entries.iter().enumerate() {
            let end = match self.entries.get(i + 1) {
                Some(next) => e.programmed_end().min(next.at),
                None => e.programmed_end(),
            };
            let tb = (e.programmed_temp_basal - e.safety_temp_basal)
                * overlap_hours(e.at, end, window_start, at);
            out.add(tb);
            if e.at >= window_start && e.at <= at {
                out.add(e.programmed_micro_bolus - e.safety_micro_bolus);
            }
        }
        out
    }

    /// Bound the advisory rate so the insulin it adds over `duration` fits the
    /// remaining headroom.
    pub fn temp_basal(
        &self,
        at: DateTime<Utc>,
        safety_rate: f64,
        ml_rate: f64,
        duration: std::time::Duration,
    ) -> SafetyTempBasal {
        let attribution = self.ml_attribution(at);
        let ml_insulin_last_3h = attribution.net();
        let hours = duration_hours(duration);
        if !(hours > 0.0) || !ml_rate.is_finite() || !safety_rate.is_finite() {
            return SafetyTempBasal {
                rate: safety_rate,
                ml_insulin_last_3h,
            };
        }
        let bound = self.bound();
        let upper = (bound - attribution.positive).max(0.0);
        let lower = -(bound + attribution.negative).max(0.0);
        let requested = (ml_rate - safety_rate) * hours;
        let allowed = requested.clamp(lower, upper);
        if allowed != requested {
            tracing::debug!(requested, allowed, upper, lower, "advisory delta clamped to headroom");
        }
        SafetyTempBasal {
            rate: safety_rate + allowed / hours,
            ml_insulin_last_3h,
        }
    }

    /// Append an enacted decision, prune to the retention window and persist.
    /// On a persistence failure the entry is kept in memory.
    pub fn record_programmed_dose(&mut self, entry: SafetyLedgerEntry) -> Result<(), LedgerError> {
        let cutoff = entry.at - minutes(self.retention_hours * 60.0);
        let idx = self.entries.partition_point(|e| e.at <= entry.at);
        self.entries.insert(idx, entry);
        self.entries.retain(|e| e.at >= cutoff);
        self.persist()
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_json_atomic(path, &self.entries).map_err(|source| {
            tracing::warn!(path = %path.display(), error = %source, "safety ledger write failed; continuing in memory");
            LedgerError::Persist {
                what: "safety ledger",
                source,
            }
        })
    }
}

fn load_entries(path: &Path) -> Result<Vec<SafetyLedgerEntry>, LedgerError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(LedgerError::Load {
                what: "safety ledger",
                reason: e.to_string(),
            });
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| LedgerError::Load {
        what: "safety ledger",
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 6, 0, 0).unwrap()
    }

    fn half_hour() -> std::time::Duration {
        std::time::Duration::from_secs(30 * 60)
    }

    #[test]
    fn identical_rates_attribute_nothing() {
        let mut a = SafetyArbiter::new(&LoopSettings::default());
        a.record_programmed_dose(SafetyLedgerEntry::temp_basal(t0(), 30.0, 1.2, 1.2))
            .unwrap();
        let r = a.temp_basal(t0() + Duration::minutes(20), 1.2, 1.2, half_hour());
        assert_eq!(r.ml_insulin_last_3h, 0.0);
        assert_eq!(r.rate, 1.2);
    }

    #[test]
    fn temp_basal_ends_at_next_entry() {
        let mut a = SafetyArbiter::new(&LoopSettings::default());
        a.record_programmed_dose(SafetyLedgerEntry::temp_basal(t0(), 30.0, 3.0, 1.0))
            .unwrap();
        a.record_programmed_dose(SafetyLedgerEntry::temp_basal(
            t0() + Duration::minutes(15),
            30.0,
            1.0,
            1.0,
        ))
        .unwrap();
        let attr = a.ml_attribution(t0() + Duration::hours(1));
        // 2 U/h over 15 minutes
        assert!((attr.positive - 0.5).abs() < 1e-9);
        assert_eq!(attr.negative, 0.0);
    }

    #[test]
    fn exhausted_headroom_returns_safety_rate() {
        let settings = LoopSettings {
            max_basal_rate: 1.0,
            ..LoopSettings::default()
        };
        let mut a = SafetyArbiter::new(&settings);
        // 3 U/h over safety for an hour = 3 U = the whole 1 U/h * 3 h bound
        a.record_programmed_dose(SafetyLedgerEntry::temp_basal(t0(), 60.0, 3.0, 0.0))
            .unwrap();
        let r = a.temp_basal(t0() + Duration::hours(1), 0.5, 2.0, half_hour());
        assert!((r.rate - 0.5).abs() < 1e-12);
        assert!((r.ml_insulin_last_3h - 3.0).abs() < 1e-9);
        // Reducing delivery is still allowed.
        let down = a.temp_basal(t0() + Duration::hours(1), 0.5, 0.0, half_hour());
        assert_eq!(down.rate, 0.0);
    }

    #[test]
    fn degenerate_duration_returns_safety_rate() {
        let a = SafetyArbiter::new(&LoopSettings::default());
        let r = a.temp_basal(t0(), 0.8, 2.5, std::time::Duration::ZERO);
        assert_eq!(r.rate, 0.8);
    }

    #[test]
    fn entries_older_than_retention_are_pruned() {
        let mut a = SafetyArbiter::new(&LoopSettings::default());
        a.record_programmed_dose(SafetyLedgerEntry::temp_basal(t0(), 30.0, 1.0, 1.0))
            .unwrap();
        a.record_programmed_dose(SafetyLedgerEntry::temp_basal(
            t0() + Duration::hours(25),
            30.0,
            1.0,
            1.0,
        ))
        .unwrap();
        assert_eq!(a.entries().len(), 1);
    }
}
