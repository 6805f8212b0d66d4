#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Closed-loop insulin dosing engine (device-agnostic).
//!
//! All device interactions go through `insulin_traits::GlucoseSource`,
//! `insulin_traits::PumpManager` and `insulin_traits::ActivitySignal`.
//!
//! ## Architecture
//!
//! - **Insulin model**: Exponential action curve per insulin kind (`insulin` module)
//! - **Dose ledger**: Pump history, basal inference, IOB and delivery (`ledger` module)
//! - **Feature frame**: 5-minute grid of glucose, delivery and IOB (`frame` module)
//! - **PID**: Physiological controller and biological invariant (`pid` module)
//! - **Advisory controllers**: Pluggable ML rate proposals (`ml` module)
//! - **Safety arbiter**: Bounds advisory insulin against the PID path (`safety` module)
//! - **Selection**: Guardrails, micro-bolus sizing and policy (`dose_selection` module)
//! - **Orchestrator**: One cycle per trigger, one outcome per cycle (`orchestrator` module)
//! - **Service**: Serialized background worker around the orchestrator (`service` module)
//!
//! ## Units
//!
//! Glucose is mg/dL, insulin is U, rates are U/h and all timestamps are UTC.
//! Schedules resolve local time through a fixed UTC offset.

pub mod atomic;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod dose_selection;
pub mod error;
pub mod frame;
pub mod glucose;
pub mod insulin;
pub mod ledger;
pub mod mocks;
pub mod ml;
pub mod orchestrator;
pub mod pid;
pub mod pump_error;
pub mod safety;
pub mod service;
pub mod status;
pub mod util;

pub use builder::{Missing, OrchestratorBuilder, Set};
pub use config::LoopSettings;
pub use dose_selection::DoseDecision;
pub use error::{BuildError, LedgerError, LoopError, Report, Result};
pub use frame::{FeatureFrame, FrameRow, build_frame};
pub use glucose::GlucoseStore;
pub use insulin::{ExponentialInsulinModel, InsulinKind};
pub use ledger::{DoseEntry, DoseKind, DoseLedger, PumpEvent, PumpEventKind};
pub use ml::{ControllerContext, DosingController};
pub use orchestrator::LoopOrchestrator;
pub use pid::{PidController, PidResult};
pub use safety::{SafetyArbiter, SafetyLedgerEntry, SafetyTempBasal};
pub use service::LoopService;
pub use status::{CycleReport, LoopOutcome, Trigger};
