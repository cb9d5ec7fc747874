//! Agreement between measured patient data and a simulated trajectory.

use super::Trajectory;
use crate::error::{invalid, TwinResult};
use crate::models::StateComponent;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Hours on the simulation clock.
    pub time: f64,
    pub value: f64,
}

/// Time-ordered measurements of one state component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedSeries {
    component: StateComponent,
    observations: Vec<Observation>,
}

impl ObservedSeries {
    pub fn new(component: StateComponent, mut observations: Vec<Observation>) -> TwinResult<Self> {
        if observations.is_empty() {
            return invalid(format!("No observations of {}", component.name()));
        }
        if let Some(bad) = observations
            .iter()
            .find(|o| !o.time.is_finite() || !o.value.is_finite())
        {
            return invalid(format!(
                "Observation of {} at t={} has non-finite time or value",
                component.name(),
                bad.time
            ));
        }
        observations.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(Self {
            component,
            observations,
        })
    }

    /// From `(time, value)` pairs.
    pub fn from_points(component: StateComponent, points: &[(f64, f64)]) -> TwinResult<Self> {
        let observations = points
            .iter()
            .map(|&(time, value)| Observation { time, value })
            .collect();
        Self::new(component, observations)
    }

    pub fn component(&self) -> StateComponent {
        self.component
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Last observation time.
    pub fn end(&self) -> f64 {
        self.observations.last().map_or(0.0, |o| o.time)
    }
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    component: StateComponent,
    time: f64,
    value: f64,
}

/// Reads a `component,time,value` CSV into one series per component,
/// in order of first appearance.
pub fn load_observations<P: AsRef<Path>>(path: P) -> TwinResult<Vec<ObservedSeries>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut grouped: Vec<(StateComponent, Vec<Observation>)> = Vec::new();

    for record in reader.deserialize() {
        let record: ObservationRecord = record?;
        let observation = Observation {
            time: record.time,
            value: record.value,
        };
        match grouped.iter_mut().find(|(c, _)| *c == record.component) {
            Some((_, observations)) => observations.push(observation),
            None => grouped.push((record.component, vec![observation])),
        }
    }

    if grouped.is_empty() {
        return invalid("Observation file contains no rows");
    }
    grouped
        .into_iter()
        .map(|(component, observations)| ObservedSeries::new(component, observations))
        .collect()
}

/// Simulated value of `component` at `time`, linearly interpolated between
/// samples and held at the first/last sample outside the sampled range.
pub fn simulated_at(trajectory: &Trajectory, component: StateComponent, time: f64) -> Option<f64> {
    let samples = trajectory.samples();
    let first = samples.first()?;
    let last = samples.last()?;
    if time <= first.time {
        return Some(first.state.get(component));
    }
    if time >= last.time {
        return Some(last.state.get(component));
    }

    let after = samples.partition_point(|s| s.time <= time);
    let (a, b) = (&samples[after - 1], &samples[after]);
    let weight = (time - a.time) / (b.time - a.time);
    let (va, vb) = (a.state.get(component), b.state.get(component));
    Some(va + weight * (vb - va))
}

/// Error statistics of one observed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub component: StateComponent,
    pub n_observations: usize,
    pub rmse: f64,
    pub mae: f64,
    /// Mean absolute percentage error over non-zero observations.
    pub mape: Option<f64>,
    /// Pearson correlation; `None` with fewer than two points or no variance.
    pub correlation: Option<f64>,
}

impl FitMetrics {
    pub fn compute(trajectory: &Trajectory, series: &ObservedSeries) -> TwinResult<Self> {
        let pairs = paired(trajectory, series)?;
        let n = pairs.len() as f64;

        let rmse = (pairs.iter().map(|(o, s)| (o - s).powi(2)).sum::<f64>() / n).sqrt();
        let mae = pairs.iter().map(|(o, s)| (o - s).abs()).sum::<f64>() / n;

        let relative: Vec<f64> = pairs
            .iter()
            .filter(|(o, _)| *o != 0.0)
            .map(|(o, s)| ((o - s) / o).abs())
            .collect();
        let mape = (!relative.is_empty())
            .then(|| relative.iter().sum::<f64>() / relative.len() as f64 * 100.0);

        Ok(Self {
            component: series.component,
            n_observations: pairs.len(),
            rmse,
            mae,
            mape,
            correlation: correlation(&pairs),
        })
    }
}

/// Fit of one scenario's trajectory to every observed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub scenario: String,
    pub metrics: Vec<FitMetrics>,
}

impl FitReport {
    pub fn new(
        scenario: &str,
        trajectory: &Trajectory,
        observed: &[ObservedSeries],
    ) -> TwinResult<Self> {
        let metrics = observed
            .iter()
            .map(|series| FitMetrics::compute(trajectory, series))
            .collect::<TwinResult<_>>()?;
        Ok(Self {
            scenario: scenario.to_string(),
            metrics,
        })
    }

    pub fn get(&self, component: StateComponent) -> Option<&FitMetrics> {
        self.metrics.iter().find(|m| m.component == component)
    }
}

/// Sum of squared relative errors over every non-zero observation.
pub fn relative_squared_error(
    trajectory: &Trajectory,
    observed: &[ObservedSeries],
) -> TwinResult<f64> {
    let mut total = 0.0;
    for series in observed {
        for (o, s) in paired(trajectory, series)? {
            if o != 0.0 {
                total += ((s - o) / o).powi(2);
            }
        }
    }
    Ok(total)
}

/// `(observed, simulated)` pairs.
fn paired(trajectory: &Trajectory, series: &ObservedSeries) -> TwinResult<Vec<(f64, f64)>> {
    series
        .observations
        .iter()
        .map(|o| match simulated_at(trajectory, series.component, o.time) {
            Some(simulated) => Ok((o.value, simulated)),
            None => invalid("Cannot compare observations with an empty trajectory"),
        })
        .collect()
}

fn correlation(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_o = pairs.iter().map(|(o, _)| o).sum::<f64>() / n;
    let mean_s = pairs.iter().map(|(_, s)| s).sum::<f64>() / n;

    let (mut cov, mut var_o, mut var_s) = (0.0, 0.0, 0.0);
    for (o, s) in pairs {
        cov += (o - mean_o) * (s - mean_s);
        var_o += (o - mean_o).powi(2);
        var_s += (s - mean_s).powi(2);
    }
    if var_o == 0.0 || var_s == 0.0 {
        return None;
    }
    Some(cov / (var_o * var_s).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::State;
    use crate::simulation::Sample;
    use approx::assert_relative_eq;

    fn glucose(points: &[(f64, f64)]) -> Trajectory {
        let samples = points
            .iter()
            .map(|&(time, g)| {
                let mut state = State::from_array([0.0; 8]);
                state.glucose = g;
                Sample {
                    time,
                    state,
                    drugs: vec![],
                }
            })
            .collect();
        Trajectory::new(samples, vec![], vec![])
    }

    fn series(component: StateComponent, points: &[(f64, f64)]) -> ObservedSeries {
        ObservedSeries::from_points(component, points).unwrap()
    }

    #[test]
    fn test_interpolation_between_and_beyond_samples() {
        let traj = glucose(&[(0.0, 100.0), (1.0, 140.0), (2.0, 120.0)]);
        let at = |t| simulated_at(&traj, StateComponent::Glucose, t).unwrap();
        assert_relative_eq!(at(0.25), 110.0);
        assert_relative_eq!(at(1.0), 140.0);
        assert_relative_eq!(at(1.5), 130.0);
        assert_relative_eq!(at(-1.0), 100.0);
        assert_relative_eq!(at(5.0), 120.0);
        assert_eq!(simulated_at(&glucose(&[]), StateComponent::Glucose, 1.0), None);
    }

    #[test]
    fn test_error_statistics() {
        let traj = glucose(&[(0.0, 100.0), (1.0, 150.0), (2.0, 120.0)]);
        let observed = series(StateComponent::Glucose, &[(0.0, 110.0), (1.0, 140.0), (2.0, 120.0)]);
        let fit = FitMetrics::compute(&traj, &observed).unwrap();

        assert_eq!(fit.n_observations, 3);
        assert_relative_eq!(fit.rmse, (200.0f64 / 3.0).sqrt());
        assert_relative_eq!(fit.mae, 20.0 / 3.0);
        let mape = (10.0 / 110.0 + 10.0 / 140.0) / 3.0 * 100.0;
        assert_relative_eq!(fit.mape.unwrap(), mape, max_relative = 1e-12);
        assert!(fit.correlation.unwrap() > 0.9);
    }

    #[test]
    fn test_perfect_fit() {
        let traj = glucose(&[(0.0, 100.0), (1.0, 150.0), (2.0, 120.0)]);
        let observed = series(StateComponent::Glucose, &[(0.5, 125.0), (2.0, 120.0)]);
        let fit = FitMetrics::compute(&traj, &observed).unwrap();
        assert_eq!(fit.rmse, 0.0);
        assert_eq!(fit.mape, Some(0.0));
        assert_relative_eq!(fit.correlation.unwrap(), 1.0, max_relative = 1e-12);
        assert_eq!(relative_squared_error(&traj, &[observed]).unwrap(), 0.0);
    }

    #[test]
    fn test_degenerate_statistics_are_absent() {
        let traj = glucose(&[(0.0, 100.0), (1.0, 100.0)]);
        let zeros = series(StateComponent::Glucose, &[(0.0, 0.0), (1.0, 0.0)]);
        let fit = FitMetrics::compute(&traj, &zeros).unwrap();
        assert_eq!(fit.mape, None);
        assert_eq!(fit.correlation, None);
        assert_relative_eq!(fit.mae, 100.0);
    }

    #[test]
    fn test_series_validation_and_ordering() {
        assert!(ObservedSeries::from_points(StateComponent::Insulin, &[]).is_err());
        assert!(ObservedSeries::from_points(StateComponent::Insulin, &[(f64::NAN, 1.0)]).is_err());

        let insulin = series(StateComponent::Insulin, &[(2.0, 12.0), (0.5, 10.0)]);
        assert_eq!(insulin.observations()[0].time, 0.5);
        assert_eq!(insulin.end(), 2.0);
    }

    #[test]
    fn test_load_observations_groups_by_component() {
        let path = std::env::temp_dir()
            .join(format!("patient_twin_observed_{}.csv", std::process::id()));
        std::fs::write(
            &path,
            "component,time,value\nglucose,1.0,150\nheart_rate,0.0,72\nglucose,0.0,98\n",
        )
        .unwrap();

        let series = load_observations(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].component(), StateComponent::Glucose);
        assert_eq!(series[0].observations()[0], Observation { time: 0.0, value: 98.0 });
        assert_eq!(series[1].component(), StateComponent::HeartRate);
    }
}
