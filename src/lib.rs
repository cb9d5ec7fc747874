//! Virtual patient physiology under medication: glucose-insulin regulation,
//! drug PK/PD, immune-inflammation and cardiovascular dynamics integrated over
//! a timeline of doses and meals.

pub mod config;
pub mod drugs;
pub mod error;
pub mod models;
pub mod output;
pub mod patient;
pub mod schedule;
pub mod simulation;

pub use drugs::{preset, DrugKinetics, DrugModel, MechanismClass};
pub use error::{TwinError, TwinResult};
pub use models::{State, StateComponent};
pub use patient::{Archetype, PatientProfile, ProfileOverrides};
pub use schedule::{EventSchedule, ScheduledEvent};
pub use simulation::{
    AlertThresholds, Calibration, CalibrationSettings, Comparison, FitReport, ObservedSeries,
    ScenarioComparator, SimulationEngine, SimulationOptions, TimeSpan, Trajectory,
    TrajectoryMetrics,
};

/// Simulates one schedule from the patient's baseline with default options.
pub fn simulate(
    profile: &PatientProfile,
    schedule: &EventSchedule,
    span: TimeSpan,
    sampling_interval: f64,
) -> TwinResult<Trajectory> {
    SimulationEngine::default().simulate(profile, schedule, span, sampling_interval)
}

/// Runs labelled schedules against one patient on a shared grid with default options.
pub fn compare(
    profile: &PatientProfile,
    scenarios: &[(String, EventSchedule)],
    span: TimeSpan,
    sampling_interval: f64,
) -> TwinResult<Comparison> {
    ScenarioComparator::default().compare(profile, scenarios, span, sampling_interval)
}
