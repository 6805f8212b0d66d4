use chrono::{DateTime, Utc};
use insulin_traits::ActivitySignal;

/// Exercise during fixed `[start, end)` windows.
#[derive(Debug, Clone, Default)]
pub struct SimulatedActivity {
    windows: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SimulatedActivity {
    pub fn new(windows: Vec<(DateTime<Utc>, DateTime<Utc>)>) -> Self {
        Self { windows }
    }
}

impl ActivitySignal for SimulatedActivity {
    fn is_exercising(&self, at: DateTime<Utc>) -> bool {
        self.windows.iter().any(|(start, end)| *start <= at && at < *end)
    }
}
