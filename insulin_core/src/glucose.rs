//! In-memory CGM history owned by the loop.

use chrono::{DateTime, Duration, Utc};
use insulin_traits::{GlucoseSample, GlucoseSource};

/// Readings kept, relative to the newest one.
const RETENTION_HOURS: i64 = 24;

/// Time-ordered CGM readings, one per timestamp.
#[derive(Debug, Default, Clone)]
pub struct GlucoseStore {
    samples: Vec<GlucoseSample>,
}

impl GlucoseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert readings; a reading with an existing timestamp replaces it.
    /// Non-finite or non-positive values are dropped.
    pub fn add(&mut self, readings: impl IntoIterator<Item = GlucoseSample>) {
        for r in readings {
            if !r.mg_dl.is_finite() || r.mg_dl <= 0.0 {
                tracing::debug!(date = %r.date, mg_dl = r.mg_dl, "dropping invalid glucose reading");
                continue;
            }
            match self.samples.binary_search_by_key(&r.date, |s| s.date) {
                Ok(i) => self.samples[i] = r,
                Err(i) => self.samples.insert(i, r),
            }
        }
        if let Some(newest) = self.samples.last().map(|s| s.date) {
            let cutoff = newest - Duration::hours(RETENTION_HOURS);
            self.samples.retain(|s| s.date >= cutoff);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl GlucoseSource for GlucoseStore {
    fn last_reading(&self) -> Option<GlucoseSample> {
        self.samples.last().copied()
    }

    fn readings_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<GlucoseSample> {
        let lo = self.samples.partition_point(|s| s.date < start);
        let hi = self.samples.partition_point(|s| s.date <= end);
        if lo >= hi {
            return Vec::new();
        }
        self.samples[lo..hi].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keeps_order_and_replaces_duplicates() {
        let t = Utc.with_ymd_and_hms(2024, 2, 2, 8, 0, 0).unwrap();
        let mut store = GlucoseStore::new();
        store.add([
            GlucoseSample::new(t + Duration::minutes(10), 120.0),
            GlucoseSample::new(t, 100.0),
            GlucoseSample::new(t + Duration::minutes(5), f64::NAN),
        ]);
        store.add([GlucoseSample::new(t, 105.0)]);
        assert_eq!(store.len(), 2);
        let between = store.readings_between(t, t + Duration::minutes(10));
        assert_eq!(between[0].mg_dl, 105.0);
        assert_eq!(store.last_reading().map(|s| s.mg_dl), Some(120.0));
        assert!(store.readings_between(t + Duration::minutes(11), t).is_empty());
    }
}
