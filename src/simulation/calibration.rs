//! Fitting patient parameters to observed data.
//!
//! Each calibrated parameter is searched inside its physiological range
//! through a logistic map, so the Nelder-Mead simplex moves freely in an
//! unbounded space while every evaluated profile stays valid.

use super::fit::{relative_squared_error, FitReport, ObservedSeries};
use super::{SimulationEngine, TimeSpan};
use crate::error::{invalid, TwinError, TwinResult};
use crate::patient::{archetypes, PatientProfile, PhysiologicalParameters};
use crate::schedule::EventSchedule;
use argmin::core::{CostFunction, Error, Executor};
use argmin::solver::neldermead::NelderMead;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Cost of a candidate whose simulation fails.
const FAILED_RUN_COST: f64 = 1e12;

/// Offset of each extra simplex vertex, in logistic coordinates.
const SIMPLEX_STEP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibratedParameter {
    InsulinSensitivity,
    MealAbsorptionRate,
    InsulinClearance,
    RenalFunction,
    LiverFunction,
    ImmuneResponse,
}

impl CalibratedParameter {
    pub const ALL: [CalibratedParameter; 6] = [
        CalibratedParameter::InsulinSensitivity,
        CalibratedParameter::MealAbsorptionRate,
        CalibratedParameter::InsulinClearance,
        CalibratedParameter::RenalFunction,
        CalibratedParameter::LiverFunction,
        CalibratedParameter::ImmuneResponse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CalibratedParameter::InsulinSensitivity => "insulin_sensitivity",
            CalibratedParameter::MealAbsorptionRate => "meal_absorption_rate",
            CalibratedParameter::InsulinClearance => "insulin_clearance",
            CalibratedParameter::RenalFunction => "renal_function",
            CalibratedParameter::LiverFunction => "liver_function",
            CalibratedParameter::ImmuneResponse => "immune_response",
        }
    }

    pub fn get(&self, params: &PhysiologicalParameters) -> f64 {
        match self {
            CalibratedParameter::InsulinSensitivity => params.insulin_sensitivity,
            CalibratedParameter::MealAbsorptionRate => params.meal_absorption_rate,
            CalibratedParameter::InsulinClearance => params.insulin_clearance,
            CalibratedParameter::RenalFunction => params.renal_function,
            CalibratedParameter::LiverFunction => params.liver_function,
            CalibratedParameter::ImmuneResponse => params.immune_response,
        }
    }

    pub fn set(&self, params: &mut PhysiologicalParameters, value: f64) {
        let target = match self {
            CalibratedParameter::InsulinSensitivity => &mut params.insulin_sensitivity,
            CalibratedParameter::MealAbsorptionRate => &mut params.meal_absorption_rate,
            CalibratedParameter::InsulinClearance => &mut params.insulin_clearance,
            CalibratedParameter::RenalFunction => &mut params.renal_function,
            CalibratedParameter::LiverFunction => &mut params.liver_function,
            CalibratedParameter::ImmuneResponse => &mut params.immune_response,
        };
        *target = value;
    }

    /// Search interval: the parameter's physiological validity range.
    pub fn bounds(&self) -> TwinResult<(f64, f64)> {
        match archetypes::range_of(self.name()) {
            Some(range) => Ok(range),
            None => invalid(format!("No validity range defined for {}", self.name())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub parameters: Vec<CalibratedParameter>,
    pub max_iterations: u64,
    /// Simplex cost spread at which the search stops.
    pub tolerance: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            parameters: CalibratedParameter::ALL.to_vec(),
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl CalibrationSettings {
    pub fn validate(&self) -> TwinResult<()> {
        if self.parameters.is_empty() {
            return invalid("Calibration needs at least one parameter");
        }
        for (i, parameter) in self.parameters.iter().enumerate() {
            if self.parameters[..i].contains(parameter) {
                return invalid(format!("Parameter {} is calibrated twice", parameter.name()));
            }
        }
        if self.max_iterations == 0 {
            return invalid("Calibration max_iterations must be > 0");
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return invalid("Calibration tolerance must be finite and > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEstimate {
    pub parameter: CalibratedParameter,
    pub initial: f64,
    pub calibrated: f64,
    /// Relative change from the initial value, percent.
    pub change_pct: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationResult {
    pub profile: PatientProfile,
    pub estimates: Vec<ParameterEstimate>,
    /// Sum of squared relative errors before and after.
    pub initial_cost: f64,
    pub final_cost: f64,
    pub iterations: u64,
    /// Fit of the calibrated profile.
    pub fit: FitReport,
}

impl CalibrationResult {
    pub fn estimate(&self, parameter: CalibratedParameter) -> Option<&ParameterEstimate> {
        self.estimates.iter().find(|e| e.parameter == parameter)
    }
}

/// One scenario's run against measured data, ready to be fitted.
pub struct Calibration<'a> {
    engine: &'a SimulationEngine,
    profile: &'a PatientProfile,
    schedule: &'a EventSchedule,
    span: TimeSpan,
    sampling_interval: f64,
    observed: &'a [ObservedSeries],
}

impl<'a> Calibration<'a> {
    pub fn new(
        engine: &'a SimulationEngine,
        profile: &'a PatientProfile,
        schedule: &'a EventSchedule,
        span: TimeSpan,
        sampling_interval: f64,
        observed: &'a [ObservedSeries],
    ) -> TwinResult<Self> {
        if observed.is_empty() {
            return invalid("Calibration needs observed data");
        }
        span.sample_times(sampling_interval)?;
        Ok(Self {
            engine,
            profile,
            schedule,
            span,
            sampling_interval,
            observed,
        })
    }

    pub fn run(&self, settings: &CalibrationSettings) -> TwinResult<CalibrationResult> {
        settings.validate()?;

        let mut bounds = Vec::with_capacity(settings.parameters.len());
        for parameter in &settings.parameters {
            bounds.push(parameter.bounds()?);
        }
        let objective = Objective {
            calibration: self,
            parameters: &settings.parameters,
            bounds: &bounds,
        };

        let initial = self.profile.parameters();
        let start: Vec<f64> = settings
            .parameters
            .iter()
            .zip(&bounds)
            .map(|(p, &(lo, hi))| to_unbounded(p.get(initial), lo, hi))
            .collect();

        let baseline = self.simulate(self.profile)?;
        let initial_cost = relative_squared_error(&baseline, self.observed)?;
        info!(
            "Calibrating {} parameters of a {} patient against {} observed series \
             (initial cost {:.6})",
            settings.parameters.len(),
            self.profile.archetype(),
            self.observed.len(),
            initial_cost
        );

        let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(simplex_around(&start))
            .with_sd_tolerance(settings.tolerance)
            .map_err(calibration_error)?;
        let res = Executor::new(objective.clone(), solver)
            .configure(|state| state.max_iters(settings.max_iterations))
            .run()
            .map_err(calibration_error)?;

        let best = res.state.best_param.unwrap_or(start);
        let iterations = res.state.iter;
        let profile = objective.profile_at(&best)?;

        let calibrated = self.simulate(&profile)?;
        let final_cost = relative_squared_error(&calibrated, self.observed)?;
        if final_cost > initial_cost {
            // Only possible when the start sat on a bound and was pulled inside.
            warn!(
                "Calibration ended at cost {:.6} above the starting cost {:.6}",
                final_cost, initial_cost
            );
        }
        let fit = FitReport::new("calibrated", &calibrated, self.observed)?;

        let estimates = settings
            .parameters
            .iter()
            .zip(&bounds)
            .map(|(&parameter, &(lower, upper))| {
                let before = parameter.get(initial);
                let after = parameter.get(profile.parameters());
                ParameterEstimate {
                    parameter,
                    initial: before,
                    calibrated: after,
                    change_pct: (after - before) / before * 100.0,
                    lower,
                    upper,
                }
            })
            .collect();

        info!(
            "Calibration finished after {} iterations: cost {:.6} -> {:.6}",
            iterations, initial_cost, final_cost
        );
        Ok(CalibrationResult {
            profile,
            estimates,
            initial_cost,
            final_cost,
            iterations,
            fit,
        })
    }

    fn simulate(&self, profile: &PatientProfile) -> TwinResult<super::Trajectory> {
        self.engine
            .simulate(profile, self.schedule, self.span, self.sampling_interval)
    }
}

#[derive(Clone)]
struct Objective<'c, 'a> {
    calibration: &'c Calibration<'a>,
    parameters: &'c [CalibratedParameter],
    bounds: &'c [(f64, f64)],
}

impl Objective<'_, '_> {
    fn profile_at(&self, point: &[f64]) -> TwinResult<PatientProfile> {
        let base = self.calibration.profile;
        let mut params = base.parameters().clone();
        for ((parameter, &(lo, hi)), &z) in self.parameters.iter().zip(self.bounds).zip(point) {
            parameter.set(&mut params, to_bounded(z, lo, hi));
        }
        PatientProfile::new(base.archetype(), params)
    }
}

impl CostFunction for Objective<'_, '_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, point: &Self::Param) -> Result<Self::Output, Error> {
        let cost = self
            .profile_at(point)
            .and_then(|profile| self.calibration.simulate(&profile))
            .and_then(|trajectory| relative_squared_error(&trajectory, self.calibration.observed));
        match cost {
            Ok(cost) if cost.is_finite() => Ok(cost),
            Ok(_) => Ok(FAILED_RUN_COST),
            Err(e) => {
                debug!("Calibration candidate {:?} failed: {}", point, e);
                Ok(FAILED_RUN_COST)
            }
        }
    }
}

fn calibration_error(e: Error) -> TwinError {
    TwinError::Calibration(e.to_string())
}

fn to_bounded(z: f64, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) / (1.0 + (-z).exp())
}

fn to_unbounded(value: f64, lo: f64, hi: f64) -> f64 {
    let u = ((value - lo) / (hi - lo)).clamp(1e-3, 1.0 - 1e-3);
    (u / (1.0 - u)).ln()
}

fn simplex_around(start: &[f64]) -> Vec<Vec<f64>> {
    let mut vertices = vec![start.to_vec()];
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += SIMPLEX_STEP;
        vertices.push(vertex);
    }
    vertices
}
