//! Simulated devices for the dosing loop.
//!
//! A `Patient` holds a minimal glucose response model. `SimulatedPump`
//! delivers insulin into it and reports pump history, `SimulatedCgm` reads
//! it back and `SimulatedActivity` marks exercise windows. `scenario::run`
//! wires them to a `LoopService` for an end-to-end closed loop.

pub mod activity;
pub mod cgm;
pub mod error;
pub mod patient;
pub mod pump;
pub mod scenario;

pub use activity::SimulatedActivity;
pub use cgm::SimulatedCgm;
pub use error::SimFault;
pub use patient::{Patient, PatientParams};
pub use pump::SimulatedPump;
pub use scenario::{CycleRecord, FaultWindow, MealEvent, SimulationCfg, SimulationSummary};
