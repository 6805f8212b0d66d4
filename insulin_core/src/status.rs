//! Outcome of one loop cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dose_selection::DoseDecision;
use crate::error::LoopError;
use crate::pid::PidResult;

/// What triggered a cycle. Heartbeat and CGM triggers honour the minimum
/// loop interval; a user refresh always runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    PumpHeartbeat,
    GlucoseReading,
    UserRefresh,
}

/// Everything computed in a cycle that reached dose selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub glucose: f64,
    pub predicted_glucose: Option<f64>,
    pub iob: f64,
    pub biological_invariant: Option<f64>,
    pub pid: PidResult,
    pub ml_rate: Option<f64>,
    /// Physiological path after guardrails and selection.
    pub safety: DoseDecision,
    /// Arbiter-bounded advisory path, when the advisory controller proposed.
    pub ml: Option<DoseDecision>,
    /// What was (or would have been) sent to the pump.
    pub programmed: DoseDecision,
}

/// Terminal state of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    OpenLoop,
    GlucoseStale { last_reading: Option<DateTime<Utc>> },
    PumpStale { last_sync: Option<DateTime<Utc>> },
    NoPumpManager,
    /// The pump rejected the command; nothing counts as enacted.
    PumpError { error: LoopError, attempted: Box<CycleReport> },
    DoseSet(Box<CycleReport>),
}

impl LoopOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenLoop => "open_loop",
            Self::GlucoseStale { .. } => "glucose_stale",
            Self::PumpStale { .. } => "pump_stale",
            Self::NoPumpManager => "no_pump_manager",
            Self::PumpError { .. } => "pump_error",
            Self::DoseSet(_) => "dose_set",
        }
    }

    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            Self::PumpError { attempted, .. } => Some(&**attempted),
            Self::DoseSet(r) => Some(&**r),
            _ => None,
        }
    }
}
