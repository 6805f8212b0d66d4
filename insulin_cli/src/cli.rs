//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use insulin_sim::MealEvent;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Loop limits in effect for the current run (for JSON error details).
pub static LAST_LIMITS: OnceLock<CliLimits> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliLimits {
    pub target_mg_dl: f64,
    pub shutoff_mg_dl: f64,
    pub max_basal_rate: f64,
}

#[derive(Parser, Debug)]
#[command(name = "insulin", version, about = "Closed-loop insulin dosing CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/insulin_config.toml")]
    pub config: PathBuf,

    /// Print results as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the closed loop against a simulated patient, CGM and pump
    Simulate {
        /// Simulated hours
        #[arg(long, default_value_t = 6.0)]
        hours: f64,
        /// Glucose at the start of the run (mg/dL)
        #[arg(long, value_name = "MG_DL", default_value_t = 120.0)]
        start_glucose: f64,
        /// Meal as MINUTE:GRAMS after the start; repeatable
        #[arg(long, value_name = "MIN:GRAMS", value_parser = parse_meal)]
        meal: Vec<MealEvent>,
        /// Exercise window as START:END minutes after the start; repeatable
        #[arg(long, value_name = "START:END", value_parser = parse_window)]
        exercise: Vec<(i64, i64)>,
        /// CGM noise amplitude (mg/dL)
        #[arg(long, value_name = "MG_DL", default_value_t = 0.0)]
        noise: f64,
        /// Seed for CGM noise
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Persist the ledgers at the [storage] paths
        #[arg(long, action = ArgAction::SetTrue)]
        persist: bool,
        /// Print every cycle, not just the summary
        #[arg(long, action = ArgAction::SetTrue)]
        cycles: bool,
    },
    /// Insulin on board and recent delivery from a persisted dose ledger
    Iob {
        /// Dose ledger JSON (defaults to storage.dose_ledger)
        #[arg(long, value_name = "FILE")]
        ledger: Option<PathBuf>,
        /// Evaluation time, RFC 3339 (defaults to now)
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
        /// Window for delivered insulin, ending at the evaluation time
        #[arg(long, value_name = "HOURS", default_value_t = 1.0)]
        window_hours: f64,
    },
    /// Validate config, schedule, model artifact and ledgers
    SelfCheck,
    /// Health check for operational monitoring
    Health,
}

fn split_pair(s: &str) -> Result<(&str, &str), String> {
    s.split_once(':')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| format!("expected A:B, got '{s}'"))
}

pub fn parse_meal(s: &str) -> Result<MealEvent, String> {
    let (at, grams) = split_pair(s)?;
    let at_min = at
        .parse::<i64>()
        .map_err(|e| format!("meal minute '{at}': {e}"))?;
    let grams = grams
        .parse::<f64>()
        .map_err(|e| format!("meal grams '{grams}': {e}"))?;
    if at_min < 0 || !(grams > 0.0 && grams.is_finite()) {
        return Err(format!("meal '{s}' needs minute >= 0 and grams > 0"));
    }
    Ok(MealEvent { at_min, grams })
}

pub fn parse_window(s: &str) -> Result<(i64, i64), String> {
    let (start, end) = split_pair(s)?;
    let start = start
        .parse::<i64>()
        .map_err(|e| format!("window start '{start}': {e}"))?;
    let end = end
        .parse::<i64>()
        .map_err(|e| format!("window end '{end}': {e}"))?;
    if start < 0 || end <= start {
        return Err(format!("window '{s}' needs 0 <= start < end"));
    }
    Ok((start, end))
}
