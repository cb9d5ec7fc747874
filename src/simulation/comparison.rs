use super::metrics::{MetricDelta, TrajectoryMetrics};
use super::{SimulationEngine, SimulationOptions, TimeSpan, Trajectory};
use crate::error::{invalid, TwinError, TwinResult};
use crate::patient::PatientProfile;
use crate::schedule::EventSchedule;
use log::{info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};

pub type ScenarioOutcome = Result<Trajectory, TwinError>;

/// Runs several schedules against one patient on a shared time grid.
#[derive(Debug, Clone, Default)]
pub struct ScenarioComparator {
    engine: SimulationEngine,
}

impl ScenarioComparator {
    pub fn new(options: SimulationOptions) -> TwinResult<Self> {
        Ok(Self {
            engine: SimulationEngine::new(options)?,
        })
    }

    /// Each scenario runs independently in parallel; a failing label does not
    /// affect the others.
    pub fn compare(
        &self,
        profile: &PatientProfile,
        scenarios: &[(String, EventSchedule)],
        span: TimeSpan,
        sampling_interval: f64,
    ) -> TwinResult<Comparison> {
        let sample_times = span.sample_times(sampling_interval)?;

        let mut seen = HashSet::new();
        for (label, _) in scenarios {
            if !seen.insert(label.as_str()) {
                return invalid(format!("Duplicate scenario label '{}'", label));
            }
        }

        info!("Comparing {} scenarios", scenarios.len());

        let outcomes: Vec<(String, ScenarioOutcome)> = scenarios
            .par_iter()
            .map(|(label, schedule)| {
                let outcome = self.engine.simulate(profile, schedule, span, sampling_interval);
                if let Err(e) = &outcome {
                    warn!("Scenario '{}' failed: {}", label, e);
                }
                (label.clone(), outcome)
            })
            .collect();

        let labels = outcomes.iter().map(|(label, _)| label.clone()).collect();
        let comparison = Comparison {
            labels,
            sample_times,
            outcomes: outcomes.into_iter().collect(),
        };
        info!(
            "Comparison finished: {} succeeded, {} failed",
            comparison.successes().count(),
            comparison.failures().count()
        );
        Ok(comparison)
    }
}

#[derive(Debug)]
pub struct Comparison {
    labels: Vec<String>,
    sample_times: Vec<f64>,
    outcomes: BTreeMap<String, ScenarioOutcome>,
}

impl Comparison {
    /// Labels in the order the scenarios were given.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Grid shared by every successful trajectory.
    pub fn sample_times(&self) -> &[f64] {
        &self.sample_times
    }

    pub fn outcomes(&self) -> &BTreeMap<String, ScenarioOutcome> {
        &self.outcomes
    }

    pub fn get(&self, label: &str) -> Option<&ScenarioOutcome> {
        self.outcomes.get(label)
    }

    pub fn trajectory(&self, label: &str) -> Option<&Trajectory> {
        self.outcomes.get(label).and_then(|o| o.as_ref().ok())
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &Trajectory)> {
        self.outcomes
            .iter()
            .filter_map(|(label, outcome)| outcome.as_ref().ok().map(|t| (label.as_str(), t)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &TwinError)> {
        self.outcomes
            .iter()
            .filter_map(|(label, outcome)| outcome.as_ref().err().map(|e| (label.as_str(), e)))
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// All trajectories, or `ComparisonPartialFailure` naming the failed labels.
    pub fn into_complete(self) -> TwinResult<BTreeMap<String, Trajectory>> {
        let failed: Vec<String> = self.failures().map(|(label, _)| label.to_string()).collect();
        if !failed.is_empty() {
            return Err(TwinError::ComparisonPartialFailure { failed });
        }
        self.outcomes
            .into_iter()
            .map(|(label, outcome)| outcome.map(|t| (label, t)))
            .collect()
    }

    /// Metrics of every successful label.
    pub fn metrics(&self, profile: &PatientProfile) -> BTreeMap<String, TrajectoryMetrics> {
        self.successes()
            .map(|(label, traj)| {
                (label.to_string(), TrajectoryMetrics::from_trajectory(traj, profile))
            })
            .collect()
    }

    /// Metric differences `other − reference`; `None` if either label failed or is unknown.
    pub fn delta(
        &self,
        profile: &PatientProfile,
        reference: &str,
        other: &str,
    ) -> Option<MetricDelta> {
        let reference_metrics =
            TrajectoryMetrics::from_trajectory(self.trajectory(reference)?, profile);
        let other_metrics = TrajectoryMetrics::from_trajectory(self.trajectory(other)?, profile);
        Some(MetricDelta::between(reference, &reference_metrics, other, &other_metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::Archetype;

    fn scenarios() -> Vec<(String, EventSchedule)> {
        vec![
            ("fasting".to_string(), EventSchedule::empty()),
            (
                "breakfast".to_string(),
                EventSchedule::builder().meal(50.0, 1.0).build().unwrap(),
            ),
        ]
    }

    #[test]
    fn test_all_labels_share_the_grid() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let comparison = ScenarioComparator::default()
            .compare(&profile, &scenarios(), TimeSpan::hours(6.0).unwrap(), 0.25)
            .unwrap();

        assert!(comparison.is_complete());
        assert_eq!(comparison.labels(), ["fasting", "breakfast"]);
        for (_, traj) in comparison.successes() {
            assert_eq!(traj.times(), comparison.sample_times());
        }
        let delta = comparison.delta(&profile, "fasting", "breakfast").unwrap();
        assert!(delta.peak_glucose > 0.0);
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let mut input = scenarios();
        input.push(("fasting".to_string(), EventSchedule::empty()));
        let err = ScenarioComparator::default()
            .compare(&profile, &input, TimeSpan::hours(6.0).unwrap(), 0.25)
            .unwrap_err();
        assert!(matches!(err, TwinError::InvalidParameter(_)));
    }

    #[test]
    fn test_failed_label_does_not_abort_siblings() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let heavy = EventSchedule::builder()
            .meal(80.0, 0.0)
            .meal(80.0, 3.0)
            .meal(80.0, 6.0)
            .build()
            .unwrap();
        let input = vec![
            ("fasting".to_string(), EventSchedule::empty()),
            ("heavy".to_string(), heavy),
        ];
        // The flat run coasts on long steps; the meals force short ones.
        let options = SimulationOptions {
            max_step: 12.0,
            max_steps: 25,
            ..Default::default()
        };
        let comparison = ScenarioComparator::new(options)
            .unwrap()
            .compare(&profile, &input, TimeSpan::hours(12.0).unwrap(), 0.5)
            .unwrap();

        assert!(comparison.trajectory("fasting").is_some());
        let failed: Vec<&str> = comparison.failures().map(|(label, _)| label).collect();
        assert_eq!(failed, ["heavy"]);
        match comparison.into_complete() {
            Err(TwinError::ComparisonPartialFailure { failed }) => assert_eq!(failed, ["heavy"]),
            other => panic!("unexpected {:?}", other.map(|m| m.len())),
        }
    }
}
