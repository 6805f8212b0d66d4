//! Closed-loop simulation driver.
//!
//! Advances a manual clock in 5-minute steps. Each step delivers pump
//! insulin, moves the patient forward, takes a CGM reading, hands the
//! reading and new pump history to a `LoopService` and runs one cycle.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use eyre::WrapErr;
use insulin_core::{DosingController, LoopOrchestrator, LoopOutcome, LoopService, LoopSettings, Trigger};
use insulin_traits::Clock;
use insulin_traits::test_clock::TestClock;
use serde::Serialize;

use crate::activity::SimulatedActivity;
use crate::cgm::SimulatedCgm;
use crate::error::SimFault;
use crate::patient::{Patient, PatientParams};
use crate::pump::SimulatedPump;

const STEP_MIN: i64 = 5;
const CYCLE_TIMEOUT: StdDuration = StdDuration::from_secs(10);
/// Time-in-range bounds (mg/dL).
pub const RANGE_LOW: f64 = 70.0;
pub const RANGE_HIGH: f64 = 180.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MealEvent {
    /// Minutes after the simulation starts.
    pub at_min: i64,
    pub grams: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultWindow {
    pub start_min: i64,
    pub end_min: i64,
    pub fault: SimFault,
}

#[derive(Debug, Clone)]
pub struct SimulationCfg {
    pub start: DateTime<Utc>,
    pub hours: f64,
    pub patient: PatientParams,
    pub meals: Vec<MealEvent>,
    /// `(start_min, end_min)` exercise windows.
    pub exercise: Vec<(i64, i64)>,
    pub pump_faults: Vec<FaultWindow>,
    pub cgm_noise_mg_dl: f64,
    pub seed: u64,
    /// Persist the dose ledger here.
    pub dose_ledger: Option<PathBuf>,
    /// Persist the safety ledger here.
    pub safety_ledger: Option<PathBuf>,
    /// Stop early once set; the summary covers the cycles run so far.
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            start: Utc
                .with_ymd_and_hms(2024, 1, 1, 6, 0, 0)
                .single()
                .unwrap_or_else(Utc::now),
            hours: 6.0,
            patient: PatientParams::default(),
            meals: Vec::new(),
            exercise: Vec::new(),
            pump_faults: Vec::new(),
            cgm_noise_mg_dl: 0.0,
            seed: 1,
            dose_ledger: None,
            safety_ledger: None,
            shutdown: None,
        }
    }
}

/// One simulated cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub at: DateTime<Utc>,
    pub glucose: f64,
    pub outcome: &'static str,
    pub temp_basal: Option<f64>,
    pub micro_bolus: Option<f64>,
    pub iob: Option<f64>,
    pub biological_invariant_violation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub cycles: Vec<CycleRecord>,
    pub outcomes: BTreeMap<&'static str, usize>,
    pub min_glucose: f64,
    pub max_glucose: f64,
    pub mean_glucose: f64,
    pub time_in_range_pct: f64,
    pub insulin_delivered: f64,
}

impl SimulationSummary {
    fn from_cycles(cycles: Vec<CycleRecord>, insulin_delivered: f64) -> Self {
        let mut outcomes = BTreeMap::new();
        for c in &cycles {
            *outcomes.entry(c.outcome).or_insert(0) += 1;
        }
        let n = cycles.len().max(1) as f64;
        let glucose = cycles.iter().map(|c| c.glucose);
        let in_range = cycles
            .iter()
            .filter(|c| (RANGE_LOW..=RANGE_HIGH).contains(&c.glucose))
            .count();
        Self {
            min_glucose: glucose.clone().fold(f64::INFINITY, f64::min),
            max_glucose: glucose.clone().fold(f64::NEG_INFINITY, f64::max),
            mean_glucose: glucose.sum::<f64>() / n,
            time_in_range_pct: in_range as f64 * 100.0 / n,
            insulin_delivered,
            outcomes,
            cycles,
        }
    }
}

fn at_min(start: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    start + Duration::minutes(minutes)
}

/// Run the loop against a simulated patient for `cfg.hours`.
pub fn run(
    settings: Arc<LoopSettings>,
    controller: Option<Box<dyn DosingController + Send>>,
    cfg: &SimulationCfg,
) -> eyre::Result<SimulationSummary> {
    let clock = TestClock::new(cfg.start);
    let patient = Patient::new(cfg.patient, cfg.start);
    let pump = SimulatedPump::new(clock.clone(), patient.clone(), settings.basal_schedule.clone());
    let mut cgm = SimulatedCgm::new(patient.clone(), cfg.cgm_noise_mg_dl, cfg.seed);
    let activity = SimulatedActivity::new(
        cfg.exercise
            .iter()
            .map(|(s, e)| (at_min(cfg.start, *s), at_min(cfg.start, *e)))
            .collect(),
    );
    for meal in &cfg.meals {
        patient.eat(at_min(cfg.start, meal.at_min), meal.grams);
    }

    let mut builder = LoopOrchestrator::builder()
        .with_settings(Arc::clone(&settings))
        .with_clock(clock.clone())
        .with_pump(pump.clone())
        .with_activity(activity);
    if let Some(c) = controller {
        builder = builder.with_controller(c);
    }
    if let Some(path) = &cfg.dose_ledger {
        builder = builder.with_dose_ledger(path.clone());
    }
    if let Some(path) = &cfg.safety_ledger {
        builder = builder.with_safety_ledger(path.clone());
    }
    let service = LoopService::spawn(builder.build().wrap_err("build simulated loop")?);

    let steps = (cfg.hours * 60.0 / STEP_MIN as f64).round().max(0.0) as i64;
    let mut cycles = Vec::with_capacity(steps as usize);
    for step in 1..=steps {
        if cfg.shutdown.as_ref().is_some_and(|f| f.load(Ordering::Relaxed)) {
            tracing::warn!(step, "simulation interrupted");
            break;
        }
        clock.advance_minutes(STEP_MIN);
        let now = clock.now();
        let minute = step * STEP_MIN;
        pump.set_fault(
            cfg.pump_faults
                .iter()
                .find(|f| f.start_min <= minute && minute < f.end_min)
                .map(|f| f.fault),
        );
        pump.advance(now);
        patient.advance(now);
        let reading = cgm.sample(now);

        service.record_glucose(vec![reading])?;
        let events = pump.drain_events();
        if !events.is_empty() {
            service.add_pump_events(events, now)?;
        }
        let outcome = service
            .trigger_and_wait(Trigger::GlucoseReading, CYCLE_TIMEOUT)
            .wrap_err_with(|| format!("cycle at {now}"))?;
        cycles.push(record(now, reading.mg_dl, outcome.as_ref()));
    }
    drop(service);

    let summary = SimulationSummary::from_cycles(cycles, pump.total_delivered());
    tracing::info!(
        cycles = summary.cycles.len(),
        mean = summary.mean_glucose,
        tir = summary.time_in_range_pct,
        insulin = summary.insulin_delivered,
        "simulation finished"
    );
    Ok(summary)
}

fn record(at: DateTime<Utc>, glucose: f64, outcome: Option<&LoopOutcome>) -> CycleRecord {
    let report = outcome.and_then(LoopOutcome::report);
    CycleRecord {
        at,
        glucose,
        outcome: outcome.map_or("gated", LoopOutcome::name),
        temp_basal: report.map(|r| r.programmed.temp_basal),
        micro_bolus: report.map(|r| r.programmed.micro_bolus),
        iob: report.map(|r| r.iob),
        biological_invariant_violation: report
            .is_some_and(|r| r.programmed.biological_invariant_violation),
    }
}
