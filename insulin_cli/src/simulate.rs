//! Simulated closed loop: config mapping, scenario assembly and reporting.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use eyre::WrapErr;
use insulin_core::LoopSettings;
use insulin_core::ml::controller_from_config;
use insulin_sim::{MealEvent, PatientParams, SimulationCfg, SimulationSummary};

/// Scenario knobs taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct SimulateArgs {
    pub hours: f64,
    pub start_glucose: f64,
    pub meals: Vec<MealEvent>,
    pub exercise: Vec<(i64, i64)>,
    pub noise: f64,
    pub seed: u64,
    pub persist: bool,
}

pub fn run_simulate(
    cfg: &insulin_config::Config,
    settings: Arc<LoopSettings>,
    args: SimulateArgs,
    shutdown: Arc<AtomicBool>,
) -> eyre::Result<SimulationSummary> {
    if !(args.hours > 0.0 && args.hours <= 72.0) {
        eyre::bail!("simulate --hours must be in (0, 72]");
    }
    let mut sim = SimulationCfg {
        hours: args.hours,
        meals: args.meals,
        exercise: args.exercise,
        cgm_noise_mg_dl: args.noise.max(0.0),
        seed: args.seed,
        shutdown: Some(shutdown),
        ..SimulationCfg::default()
    };
    // The simulated patient needs exactly the scheduled basal, so a
    // correctly configured loop holds glucose flat.
    sim.patient = PatientParams {
        initial_glucose: args.start_glucose,
        basal_need: settings.basal_rate_at(sim.start),
        insulin_sensitivity: settings.sensitivity_at(sim.start),
        insulin_kind: settings.insulin_kind,
        ..PatientParams::default()
    };
    if args.persist {
        sim.dose_ledger.clone_from(&cfg.storage.dose_ledger);
        sim.safety_ledger.clone_from(&cfg.storage.safety_ledger);
        if sim.dose_ledger.is_none() && sim.safety_ledger.is_none() {
            tracing::warn!("--persist given but [storage] names no ledger paths");
        }
    }

    let controller = controller_from_config(cfg.ml.controller, cfg.ml.model_path.as_deref());
    tracing::info!(
        hours = sim.hours,
        start_glucose = sim.patient.initial_glucose,
        meals = sim.meals.len(),
        controller = controller.as_ref().map_or("none", |c| c.name()),
        "simulation start"
    );
    insulin_sim::scenario::run(settings, controller, &sim).wrap_err("simulation failed")
}

/// Plain-text summary for the console.
pub fn render_summary(summary: &SimulationSummary) -> String {
    let outcomes = summary
        .outcomes
        .iter()
        .map(|(name, n)| format!("{name}={n}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "Simulation complete: {} cycles\nGlucose min/mean/max: {:.0} / {:.0} / {:.0} mg/dL\nTime in range: {:.1}%\nInsulin delivered: {:.2} U\nOutcomes: {outcomes}",
        summary.cycles.len(),
        summary.min_glucose,
        summary.mean_glucose,
        summary.max_glucose,
        summary.time_in_range_pct,
        summary.insulin_delivered,
    )
}

/// Summary as a JSON line; per-cycle records are emitted separately.
pub fn summary_json(summary: &SimulationSummary) -> serde_json::Value {
    serde_json::json!({
        "cycles": summary.cycles.len(),
        "outcomes": summary.outcomes,
        "min_glucose": summary.min_glucose,
        "mean_glucose": summary.mean_glucose,
        "max_glucose": summary.max_glucose,
        "time_in_range_pct": summary.time_in_range_pct,
        "insulin_delivered": summary.insulin_delivered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn summary() -> SimulationSummary {
        let mut outcomes = BTreeMap::new();
        outcomes.insert("dose_set", 11);
        outcomes.insert("pump_error", 1);
        SimulationSummary {
            cycles: Vec::new(),
            outcomes,
            min_glucose: 98.4,
            max_glucose: 143.2,
            mean_glucose: 117.0,
            time_in_range_pct: 100.0,
            insulin_delivered: 1.234,
        }
    }

    #[test]
    fn summary_renders_outcome_counts() {
        let text = render_summary(&summary());
        assert!(text.contains("Outcomes: dose_set=11 pump_error=1"));
        assert!(text.contains("Insulin delivered: 1.23 U"));
        assert_eq!(summary_json(&summary())["outcomes"]["pump_error"], 1);
    }
}
