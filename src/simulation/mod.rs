pub mod alerts;
pub mod calibration;
pub mod comparison;
pub mod fit;
pub mod integrator;
pub mod metrics;
pub mod trajectory;

use crate::drugs::INTERACTION_TABLE;
use crate::error::{invalid, TwinError, TwinResult};
use crate::models::physiology::occupancy_of;
use crate::models::{ActiveDose, ActiveInputs, ActiveMeal, PhysiologyModel, State};
use crate::patient::PatientProfile;
use crate::schedule::{EventSchedule, ScheduledEvent};
use integrator::{integrate, AcceptedStep, IntegratorOptions, OdeSystem, StepBudget};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

pub use alerts::{Alert, AlertKind, AlertThreshold, AlertThresholds};
pub use calibration::{
    CalibratedParameter, Calibration, CalibrationResult, CalibrationSettings, ParameterEstimate,
};
pub use comparison::{Comparison, ScenarioComparator, ScenarioOutcome};
pub use fit::{FitMetrics, FitReport, Observation, ObservedSeries};
pub use metrics::{CohortSummary, MetricDelta, OrganImpact, TrajectoryMetrics};
pub use trajectory::{DetectedInteraction, DrugLevel, Sample, SimulationWarning, Trajectory};

/// Occupancy above which a drug class counts as active for interaction reporting.
const INTERACTION_OCCUPANCY: f64 = 0.05;

/// Largest output grid a single run may request.
pub const MAX_SAMPLES: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
}

impl TimeSpan {
    pub fn new(start: f64, end: f64) -> TwinResult<Self> {
        let span = Self { start, end };
        span.validate()?;
        Ok(span)
    }

    /// `[0, hours]`.
    pub fn hours(hours: f64) -> TwinResult<Self> {
        Self::new(0.0, hours)
    }

    pub fn validate(&self) -> TwinResult<()> {
        if !self.start.is_finite() || !self.end.is_finite() || self.end <= self.start {
            return invalid(format!(
                "Time span [{}, {}] must be finite with end > start",
                self.start, self.end
            ));
        }
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    /// Output grid `start + i·interval` up to and including `end`.
    ///
    /// At most [`MAX_SAMPLES`] points; a finer grid is rejected before allocation.
    pub fn sample_times(&self, interval: f64) -> TwinResult<Vec<f64>> {
        self.validate()?;
        if !interval.is_finite() || interval <= 0.0 || interval > self.duration() {
            return invalid(format!(
                "Sampling interval {} must be positive and no longer than the span ({} h)",
                interval,
                self.duration()
            ));
        }
        let steps = (self.duration() / interval + 1e-9).floor();
        if !steps.is_finite() || steps >= MAX_SAMPLES as f64 {
            return invalid(format!(
                "Sampling every {} h over {} h needs more than {} samples",
                interval,
                self.duration(),
                MAX_SAMPLES
            ));
        }
        let count = steps as usize;
        Ok((0..=count).map(|i| self.start + i as f64 * interval).collect())
    }
}

/// Accuracy and budget settings of the integrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Largest step, hours.
    pub max_step: f64,
    /// Smallest step before the run is declared unstable, hours.
    pub min_step: f64,
    /// Attempted steps allowed per run, rejected steps included.
    pub max_steps: usize,
    pub max_wall_time: Option<Duration>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-8,
            max_step: 0.25,
            min_step: 1e-10,
            max_steps: 200_000,
            max_wall_time: None,
        }
    }
}

impl SimulationOptions {
    pub fn validate(&self) -> TwinResult<()> {
        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return invalid("rtol must be finite and > 0");
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return invalid("atol must be finite and > 0");
        }
        if !self.min_step.is_finite() || self.min_step <= 0.0 || !(self.max_step > self.min_step) {
            return invalid("Step bounds must satisfy 0 < min_step < max_step");
        }
        if self.max_steps == 0 {
            return invalid("max_steps must be > 0");
        }
        Ok(())
    }

    fn integrator(&self) -> IntegratorOptions {
        IntegratorOptions {
            rtol: self.rtol,
            atol: self.atol,
            h_min: self.min_step,
            h_max: self.max_step,
        }
    }
}

struct Forced<'a> {
    model: &'a PhysiologyModel,
    inputs: &'a ActiveInputs,
}

impl OdeSystem for Forced<'_> {
    fn ndim(&self) -> usize {
        self.model.dimension()
    }

    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) {
        self.model.rhs(t, y, self.inputs, dydt);
    }
}

/// Collects output samples on the fixed grid as the integrator advances.
struct Sampler<'a> {
    model: &'a PhysiologyModel,
    grid: Vec<f64>,
    next: usize,
    tolerance: f64,
    samples: Vec<Sample>,
    /// Class occupancy at each sample, for interaction reporting.
    occupancy: Vec<[f64; 4]>,
    scratch: Vec<f64>,
}

impl<'a> Sampler<'a> {
    fn new(model: &'a PhysiologyModel, grid: Vec<f64>, tolerance: f64) -> Self {
        Self {
            model,
            samples: Vec::with_capacity(grid.len()),
            occupancy: Vec::with_capacity(grid.len()),
            scratch: vec![0.0; model.dimension()],
            grid,
            next: 0,
            tolerance,
        }
    }

    fn record(&mut self, time: f64, y: &[f64]) {
        let drugs = self
            .model
            .drugs()
            .enumerate()
            .map(|(slot, drug)| {
                let (plasma, tissue) = self.model.drug_levels(y, slot);
                DrugLevel {
                    drug: drug.name().to_string(),
                    plasma,
                    tissue,
                }
            })
            .collect();
        self.samples.push(Sample {
            time,
            state: self.model.aggregate(y),
            drugs,
        });
        self.occupancy.push(self.model.class_occupancy(y));
    }

    /// Emits every grid time up to `time` from the exact state `y`.
    fn at(&mut self, time: f64, y: &[f64]) {
        while self.next < self.grid.len() && self.grid[self.next] <= time + self.tolerance {
            let t = self.grid[self.next];
            self.record(t, y);
            self.next += 1;
        }
    }

    fn on_step(&mut self, step: &AcceptedStep<'_>) {
        while self.next < self.grid.len() && self.grid[self.next] <= step.t1 + self.tolerance {
            let t = self.grid[self.next];
            let mut scratch = std::mem::take(&mut self.scratch);
            step.interpolate(t, &mut scratch);
            self.record(t, &scratch);
            self.scratch = scratch;
            self.next += 1;
        }
    }
}

/// Integrates a patient's physiology over a schedule of doses and meals.
#[derive(Debug, Clone, Default)]
pub struct SimulationEngine {
    options: SimulationOptions,
}

impl SimulationEngine {
    pub fn new(options: SimulationOptions) -> TwinResult<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    /// Runs from the profile's baseline state.
    pub fn simulate(
        &self,
        profile: &PatientProfile,
        schedule: &EventSchedule,
        span: TimeSpan,
        sampling_interval: f64,
    ) -> TwinResult<Trajectory> {
        self.simulate_from(profile, &profile.baseline_state(), schedule, span, sampling_interval)
    }

    pub fn simulate_from(
        &self,
        profile: &PatientProfile,
        initial: &State,
        schedule: &EventSchedule,
        span: TimeSpan,
        sampling_interval: f64,
    ) -> TwinResult<Trajectory> {
        let grid = span.sample_times(sampling_interval)?;
        let drugs = schedule.drugs()?;
        let model = PhysiologyModel::new(profile, &drugs);
        let mut y = model.expand(initial)?;

        info!(
            "Simulating {} patient over [{}, {}] h with {} doses of {} drugs and {} meals",
            profile.archetype(),
            span.start,
            span.end,
            schedule.doses().count(),
            drugs.len(),
            schedule.meals().count()
        );

        let slot_of = |name: &str| drugs.iter().position(|d| d.name() == name);

        // In-range events become timed input activations; the rest are reported.
        let mut warnings = Vec::new();
        let mut activations: Vec<(f64, Activation)> = Vec::new();
        for (index, event) in schedule.events().iter().enumerate() {
            let time = event.time();
            if !span.contains(time) {
                let warning = SimulationWarning::ScheduleOutOfRange {
                    event_index: index,
                    description: event.to_string(),
                    time,
                    start: span.start,
                    end: span.end,
                };
                warn!("{}", warning);
                warnings.push(warning);
                continue;
            }
            let activation = match event {
                ScheduledEvent::Dose(dose) => match slot_of(dose.drug.name()) {
                    Some(slot) => Activation::Dose(ActiveDose {
                        slot,
                        amount: dose.amount,
                        time,
                    }),
                    None => {
                        return invalid(format!(
                            "Dose references unknown drug '{}'",
                            dose.drug.name()
                        ))
                    }
                },
                ScheduledEvent::Meal(meal) => Activation::Meal(ActiveMeal {
                    carbs: meal.carbs,
                    time,
                }),
            };
            activations.push((time, activation));
        }

        let tolerance = 1e-9 * span.duration();
        let mut sampler = Sampler::new(&model, grid, tolerance);
        let mut inputs = ActiveInputs::default();
        let mut pending = activations.into_iter().peekable();
        let mut budget = StepBudget::new(
            self.options.max_steps,
            // A deadline past the clock's range means no deadline.
            self.options
                .max_wall_time
                .and_then(|d| Instant::now().checked_add(d)),
        );
        let integrator = self.options.integrator();
        let mut h = 0.0;
        let mut t = span.start;
        sampler.at(t, &y);

        loop {
            while let Some((_, activation)) = pending.next_if(|(time, _)| *time <= t) {
                debug!("t={:.4} h: applying {:?}", t, activation);
                match activation {
                    Activation::Dose(dose) => inputs.doses.push(dose),
                    Activation::Meal(meal) => inputs.meals.push(meal),
                }
                // New forcing starts here; let the controller pick a fresh step.
                h = 0.0;
            }

            if t >= span.end {
                break;
            }

            let boundary = pending.peek().map_or(span.end, |(time, _)| *time);
            let system = Forced {
                model: &model,
                inputs: &inputs,
            };
            debug!("Integrating segment [{:.4}, {:.4}] h", t, boundary);

            let result = integrate(
                &system,
                &mut y,
                t,
                boundary,
                &mut h,
                &integrator,
                &mut budget,
                |step| sampler.on_step(step),
            );

            if let Err(failure) = result {
                let state = model.aggregate(&y);
                let partial = Trajectory::new(sampler.samples, warnings, vec![]);
                return Err(TwinError::NumericalInstability {
                    time: failure.time,
                    state,
                    reason: failure.reason.to_string(),
                    partial: Box::new(partial),
                });
            }
            t = boundary;
        }

        // Grid points rounded past the end take the final state.
        sampler.at(f64::INFINITY, &y);

        let interactions = detect_interactions(&sampler.samples, &sampler.occupancy);
        for interaction in &interactions {
            warn!(
                "Drug interaction ({:?} severity) from t={:.2} h: {}",
                interaction.severity, interaction.first_detected, interaction.description
            );
        }

        info!(
            "Simulation finished: {} samples, {} integrator steps",
            sampler.samples.len(),
            budget.steps_taken()
        );

        Ok(Trajectory::new(sampler.samples, warnings, interactions))
    }
}

#[derive(Debug, Clone, Copy)]
enum Activation {
    Dose(ActiveDose),
    Meal(ActiveMeal),
}

fn detect_interactions(samples: &[Sample], occupancy: &[[f64; 4]]) -> Vec<DetectedInteraction> {
    INTERACTION_TABLE
        .iter()
        .filter_map(|interaction| {
            samples
                .iter()
                .zip(occupancy)
                .find(|(_, occ)| {
                    occupancy_of(occ, interaction.affected) >= INTERACTION_OCCUPANCY
                        && occupancy_of(occ, interaction.modulator) >= INTERACTION_OCCUPANCY
                })
                .map(|(sample, _)| DetectedInteraction {
                    affected: interaction.affected,
                    modulator: interaction.modulator,
                    severity: interaction.severity,
                    description: interaction.description,
                    recommendation: interaction.recommendation,
                    first_detected: sample.time,
                })
        })
        .collect()
}
