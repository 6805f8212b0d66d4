//! Simulated insulin pump.
//!
//! Delivers scheduled basal, temp basals and boluses into a `Patient` and
//! reports what it did as `PumpEvent`s, the way a pump history read would.
//! Running temp basals are reported as mutable entries and replaced by an
//! immutable entry with the same sync id once they finish or are cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use insulin_core::config::TimeOfDaySchedule;
use insulin_core::{DoseEntry, PumpEvent};
use insulin_traits::{BolusActivation, BoxError, Clock, PumpManager};

use crate::error::SimFault;
use crate::patient::Patient;

/// Rate and volume increment the simulated hardware supports (U, U/h).
pub const PUMP_INCREMENT: f64 = 0.05;
/// Highest programmable temp basal (U/h).
pub const PUMP_MAX_RATE: f64 = 30.0;

#[derive(Debug, Clone)]
struct RunningTemp {
    sync_id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    rate: f64,
}

#[derive(Debug)]
struct State {
    schedule: TimeOfDaySchedule,
    delivered_until: DateTime<Utc>,
    temp: Option<RunningTemp>,
    events: Vec<PumpEvent>,
    last_sync: Option<DateTime<Utc>>,
    fault: Option<SimFault>,
    offline: bool,
    next_id: u64,
    total_delivered: f64,
}

/// Shared handle to one simulated pump. The loop owns one clone, the
/// simulation driver keeps another to advance delivery and read history.
#[derive(Clone)]
pub struct SimulatedPump {
    clock: Arc<dyn Clock + Send + Sync>,
    patient: Patient,
    state: Arc<Mutex<State>>,
}

impl core::fmt::Debug for SimulatedPump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SimulatedPump")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn floor_to_increment(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let steps = ((x / PUMP_INCREMENT) + 1e-9).floor().max(0.0);
    steps / PUMP_INCREMENT.recip()
}

impl SimulatedPump {
    /// Pump running `schedule` from the clock's current time. The history
    /// opens with a resume at the start of the patient's basal history so
    /// the scheduled basal already on board can be reconstructed.
    pub fn new(
        clock: impl Clock + Send + Sync + 'static,
        patient: Patient,
        schedule: TimeOfDaySchedule,
    ) -> Self {
        let now = clock.now();
        let resumed = patient.steady_since();
        let state = State {
            schedule,
            delivered_until: now,
            temp: None,
            events: vec![PumpEvent::dose(DoseEntry::resume(resumed, "sim-resume-0"))],
            last_sync: None,
            fault: None,
            offline: false,
            next_id: 1,
            total_delivered: 0.0,
        };
        Self {
            clock: Arc::new(clock),
            patient,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every following command with `fault` (`None` to recover).
    pub fn set_fault(&self, fault: Option<SimFault>) {
        self.state().fault = fault;
    }

    /// While offline, history reads fail and the last sync time stays put.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Take the history accumulated since the last call.
    pub fn drain_events(&self) -> Vec<PumpEvent> {
        std::mem::take(&mut self.state().events)
    }

    /// Units delivered since the pump started, basal included.
    pub fn total_delivered(&self) -> f64 {
        self.state().total_delivered
    }

    /// Rate currently being delivered (U/h).
    pub fn current_rate(&self) -> f64 {
        let now = self.clock.now();
        let s = self.state();
        match &s.temp {
            Some(t) if now < t.end => t.rate,
            _ => s.schedule.value_at(now),
        }
    }

    /// Deliver basal insulin up to `to`.
    pub fn advance(&self, to: DateTime<Utc>) {
        let mut s = self.state();
        self.deliver_until(&mut s, to);
    }

    fn deliver_until(&self, s: &mut State, to: DateTime<Utc>) {
        loop {
            let from = s.delivered_until;
            if let Some(t) = s.temp.take_if(|t| t.end <= from) {
                s.events.push(finished_temp(&t, t.end));
            }
            if from >= to {
                break;
            }
            let (until, rate) = match &s.temp {
                Some(t) => (t.end.min(to), t.rate),
                None => match s.schedule.segments(from, to).first() {
                    Some((_, end, rate)) => (*end, *rate),
                    None => (to, 0.0),
                },
            };
            let units = rate * (until - from).num_milliseconds() as f64 / 3_600_000.0;
            self.patient.deliver(from, units);
            s.total_delivered += units;
            s.delivered_until = until;
        }
    }

    fn check_fault(&self, s: &State) -> Result<(), BoxError> {
        match s.fault {
            Some(fault) => Err(Box::new(fault)),
            None => Ok(()),
        }
    }
}

fn finished_temp(t: &RunningTemp, end: DateTime<Utc>) -> PumpEvent {
    let elapsed = end - t.start;
    let entry = DoseEntry::temp_basal(t.start, elapsed, t.rate, t.sync_id.clone());
    let delivered = entry.programmed_units;
    PumpEvent::dose(entry.with_delivered(delivered))
}

impl PumpManager for SimulatedPump {
    fn round_to_supported_basal_rate(&self, units_per_hour: f64) -> f64 {
        floor_to_increment(units_per_hour.min(PUMP_MAX_RATE))
    }

    fn round_to_supported_bolus_volume(&self, units: f64) -> f64 {
        floor_to_increment(units)
    }

    fn enact_temp_basal(&mut self, units_per_hour: f64, duration: Duration) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut s = self.state();
        self.check_fault(&s)?;
        self.deliver_until(&mut s, now);

        if let Some(running) = s.temp.take() {
            s.events.push(finished_temp(&running, now));
        }
        let rate = self.round_to_supported_basal_rate(units_per_hour);
        let duration = chrono::Duration::from_std(duration)?;
        let sync_id = format!("sim-tb-{}", s.next_id);
        s.next_id += 1;
        s.events.push(PumpEvent::dose(
            DoseEntry::temp_basal(now, duration, rate, sync_id.clone()).mutable(),
        ));
        s.temp = Some(RunningTemp {
            sync_id,
            start: now,
            end: now + duration,
            rate,
        });
        tracing::debug!(rate, minutes = duration.num_minutes(), "sim pump temp basal");
        Ok(())
    }

    fn enact_bolus(&mut self, units: f64, activation: BolusActivation) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut s = self.state();
        self.check_fault(&s)?;
        self.deliver_until(&mut s, now);

        let units = self.round_to_supported_bolus_volume(units);
        if units <= 0.0 {
            return Ok(());
        }
        let sync_id = format!("sim-bolus-{}", s.next_id);
        s.next_id += 1;
        self.patient.deliver(now, units);
        s.total_delivered += units;
        s.events
            .push(PumpEvent::dose(DoseEntry::bolus(now, units, sync_id).with_delivered(units)));
        tracing::debug!(units, ?activation, "sim pump bolus");
        Ok(())
    }

    fn ensure_current_pump_data(&mut self) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let mut s = self.state();
        if !s.offline {
            self.deliver_until(&mut s, now);
            s.last_sync = Some(now);
        }
        s.last_sync
    }
}
