use super::alerts::{Alert, AlertThresholds};
use crate::drugs::{MechanismClass, Severity};
use crate::models::{State, StateComponent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concentrations of one drug at a sample time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugLevel {
    pub drug: String,
    pub plasma: f64,
    pub tissue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub state: State,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drugs: Vec<DrugLevel>,
}

impl Sample {
    pub fn values(&self) -> [(&'static str, f64); 8] {
        self.state.named_values()
    }

    pub fn drug(&self, name: &str) -> Option<&DrugLevel> {
        self.drugs.iter().find(|d| d.drug == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimulationWarning {
    /// Event outside the simulated span; it was ignored.
    ScheduleOutOfRange {
        event_index: usize,
        description: String,
        time: f64,
        start: f64,
        end: f64,
    },
}

impl fmt::Display for SimulationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationWarning::ScheduleOutOfRange {
                event_index,
                description,
                time,
                start,
                end,
            } => write!(
                f,
                "event #{} ({}) at t={} h lies outside [{}, {}] and was ignored",
                event_index, description, time, start, end
            ),
        }
    }
}

/// A drug interaction that became active during the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedInteraction {
    pub affected: MechanismClass,
    pub modulator: MechanismClass,
    pub severity: Severity,
    pub description: &'static str,
    pub recommendation: &'static str,
    /// First sample time at which both classes were pharmacologically active.
    pub first_detected: f64,
}

/// Time series produced by one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    samples: Vec<Sample>,
    warnings: Vec<SimulationWarning>,
    interactions: Vec<DetectedInteraction>,
}

impl Trajectory {
    pub(crate) fn new(
        samples: Vec<Sample>,
        warnings: Vec<SimulationWarning>,
        interactions: Vec<DetectedInteraction>,
    ) -> Self {
        Self {
            samples,
            warnings,
            interactions,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn warnings(&self) -> &[SimulationWarning] {
        &self.warnings
    }

    pub fn interactions(&self) -> &[DetectedInteraction] {
        &self.interactions
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }

    pub fn column(&self, component: StateComponent) -> Vec<f64> {
        self.samples.iter().map(|s| s.state.get(component)).collect()
    }

    /// Tissue concentration of one drug over time; zero where it is not modelled.
    pub fn drug_tissue(&self, drug: &str) -> Vec<f64> {
        self.samples
            .iter()
            .map(|s| s.drug(drug).map(|d| d.tissue).unwrap_or(0.0))
            .collect()
    }

    pub fn final_state(&self) -> Option<&State> {
        self.samples.last().map(|s| &s.state)
    }

    /// `(time, value)` of the maximum of `component`.
    pub fn peak(&self, component: StateComponent) -> Option<(f64, f64)> {
        self.samples
            .iter()
            .map(|s| (s.time, s.state.get(component)))
            .fold(None, |best, (t, v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((t, v)),
            })
    }

    /// `(time, value)` of the minimum of `component`.
    pub fn trough(&self, component: StateComponent) -> Option<(f64, f64)> {
        self.samples
            .iter()
            .map(|s| (s.time, s.state.get(component)))
            .fold(None, |best, (t, v)| match best {
                Some((_, bv)) if bv <= v => best,
                _ => Some((t, v)),
            })
    }

    /// Trapezoidal area under `component` over the sampled span.
    pub fn auc(&self, component: StateComponent) -> f64 {
        self.samples
            .windows(2)
            .map(|w| {
                let dt = w[1].time - w[0].time;
                dt * (w[0].state.get(component) + w[1].state.get(component)) / 2.0
            })
            .sum()
    }

    /// Excursions outside the bands of `thresholds`.
    pub fn alerts(&self, thresholds: &AlertThresholds) -> Vec<Alert> {
        thresholds.scan(self)
    }

    /// Mean of `component` over the samples; zero when empty.
    pub fn mean(&self, component: StateComponent) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.state.get(component)).sum::<f64>() / self.samples.len() as f64
    }

    /// First sample time after the glucose peak where glucose is back within
    /// `tolerance` (fraction) of `baseline`.
    pub fn time_to_baseline(&self, baseline: f64, tolerance: f64) -> Option<f64> {
        let (peak_time, _) = self.peak(StateComponent::Glucose)?;
        self.samples
            .iter()
            .filter(|s| s.time >= peak_time)
            .find(|s| s.state.glucose <= baseline * (1.0 + tolerance))
            .map(|s| s.time)
    }
}
