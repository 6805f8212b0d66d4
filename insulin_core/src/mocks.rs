//! Test and helper mocks for insulin_core

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use insulin_traits::{ActivitySignal, BolusActivation, BoxError, PumpManager};

/// A command the loop sent to the pump.
#[derive(Debug, Clone, PartialEq)]
pub enum PumpCommand {
    TempBasal { units_per_hour: f64, duration: Duration },
    Bolus { units: f64, activation: BolusActivation },
}

/// Pump that records every command. Clones share state, so a test can keep
/// one handle while the loop owns another.
///
/// Rates and volumes round down to 0.05 U steps.
#[derive(Debug, Clone, Default)]
pub struct RecordingPump {
    commands: Arc<Mutex<Vec<PumpCommand>>>,
    fail_with: Arc<Mutex<Option<String>>>,
    fail_bolus_with: Arc<Mutex<Option<String>>>,
    last_sync: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl RecordingPump {
    pub fn synced_at(at: DateTime<Utc>) -> Self {
        let pump = Self::default();
        pump.set_last_sync(Some(at));
        pump
    }

    pub fn set_last_sync(&self, at: Option<DateTime<Utc>>) {
        if let Ok(mut g) = self.last_sync.lock() {
            *g = at;
        }
    }

    /// Make every following command fail with `message` (`None` to recover).
    pub fn set_failure(&self, message: Option<&str>) {
        if let Ok(mut g) = self.fail_with.lock() {
            *g = message.map(str::to_owned);
        }
    }

    /// Like `set_failure`, but only bolus commands fail.
    pub fn set_bolus_failure(&self, message: Option<&str>) {
        if let Ok(mut g) = self.fail_bolus_with.lock() {
            *g = message.map(str::to_owned);
        }
    }

    pub fn commands(&self) -> Vec<PumpCommand> {
        self.commands.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn execute(&self, cmd: PumpCommand) -> Result<(), BoxError> {
        if let Ok(g) = self.fail_with.lock()
            && let Some(msg) = g.as_ref()
        {
            return Err(Box::new(std::io::Error::other(msg.clone())));
        }
        if let Ok(mut g) = self.commands.lock() {
            g.push(cmd);
        }
        Ok(())
    }
}

fn floor_to_twentieth(x: f64) -> f64 {
    ((x * 20.0) + 1e-9).floor().max(0.0) / 20.0
}

impl PumpManager for RecordingPump {
    fn round_to_supported_basal_rate(&self, units_per_hour: f64) -> f64 {
        floor_to_twentieth(units_per_hour)
    }

    fn round_to_supported_bolus_volume(&self, units: f64) -> f64 {
        floor_to_twentieth(units)
    }

    fn enact_temp_basal(&mut self, units_per_hour: f64, duration: Duration) -> Result<(), BoxError> {
        self.execute(PumpCommand::TempBasal {
            units_per_hour,
            duration,
        })
    }

    fn enact_bolus(&mut self, units: f64, activation: BolusActivation) -> Result<(), BoxError> {
        if let Ok(g) = self.fail_bolus_with.lock()
            && let Some(msg) = g.as_ref()
        {
            return Err(Box::new(std::io::Error::other(msg.clone())));
        }
        self.execute(PumpCommand::Bolus { units, activation })
    }

    fn ensure_current_pump_data(&mut self) -> Option<DateTime<Utc>> {
        self.last_sync.lock().ok().and_then(|g| *g)
    }
}

/// Activity signal with a fixed answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedActivity(pub bool);

impl ActivitySignal for FixedActivity {
    fn is_exercising(&self, _at: DateTime<Utc>) -> bool {
        self.0
    }
}
