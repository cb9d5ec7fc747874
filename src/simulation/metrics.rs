use super::Trajectory;
use crate::models::StateComponent;
use crate::patient::PatientProfile;
use serde::{Deserialize, Serialize};

pub const HYPERGLYCAEMIA_THRESHOLD: f64 = 180.0; // mg/dL
pub const HYPOGLYCAEMIA_THRESHOLD: f64 = 70.0; // mg/dL
/// Fractional band around baseline glucose that counts as recovered.
pub const BASELINE_TOLERANCE: f64 = 0.05;

/// Clinical summary of one trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryMetrics {
    pub glucose_mean: f64,
    pub glucose_min: f64,
    pub glucose_max: f64,
    pub glucose_sd: f64,
    pub time_hyperglycaemic_pct: f64,
    pub time_hypoglycaemic_pct: f64,
    pub time_in_range_pct: f64,
    pub peak_glucose: f64,
    pub peak_glucose_time: f64,
    pub time_to_baseline: Option<f64>,
    /// AUC of total plasma drug, mg·h/L.
    pub drug_exposure: f64,
    /// AUC of inflammation, a.u.·h.
    pub inflammation_burden: f64,
    pub heart_rate_sd: f64,
    pub blood_pressure_sd: f64,
    pub health_score: f64,
    pub organ_impact: OrganImpact,
}

impl TrajectoryMetrics {
    pub fn from_trajectory(trajectory: &Trajectory, profile: &PatientProfile) -> Self {
        let glucose = trajectory.column(StateComponent::Glucose);
        let n = glucose.len().max(1) as f64;
        let share = |pred: fn(f64) -> bool| {
            glucose.iter().filter(|g| pred(**g)).count() as f64 / n * 100.0
        };

        let hyper = share(|g| g > HYPERGLYCAEMIA_THRESHOLD);
        let hypo = share(|g| g < HYPOGLYCAEMIA_THRESHOLD);
        let in_range = share(|g| (HYPOGLYCAEMIA_THRESHOLD..=HYPERGLYCAEMIA_THRESHOLD).contains(&g));

        let (peak_glucose_time, peak_glucose) =
            trajectory.peak(StateComponent::Glucose).unwrap_or((0.0, 0.0));
        let glucose_sd = std_dev(&glucose);
        let inflammation_burden = trajectory.auc(StateComponent::Inflammation);

        let health_score = (100.0 - 0.3 * hyper - 0.5 * hypo - 0.2 * glucose_sd
            - 10.0 * inflammation_burden / 1000.0)
            .clamp(0.0, 100.0);

        let glucose_mean = mean(&glucose);
        let drug_exposure = trajectory.auc(StateComponent::DrugPlasma);
        let heart_rate_sd = std_dev(&trajectory.column(StateComponent::HeartRate));
        let blood_pressure_sd = std_dev(&trajectory.column(StateComponent::BloodPressure));
        let inflammation_mean = trajectory.mean(StateComponent::Inflammation);
        let p = profile.parameters();

        let organ_impact = OrganImpact {
            heart: 0.3 * impact(heart_rate_sd / 3.0)
                + 0.3 * impact(blood_pressure_sd / 5.0)
                + 0.4 * impact(inflammation_mean / 20.0),
            pancreas: 0.7 * impact((glucose_mean - 100.0) / 15.0) + 0.3 * impact(glucose_sd / 10.0),
            kidney: 0.5 * impact((1.0 - p.renal_function) * 10.0)
                + 0.3 * impact(drug_exposure / 100.0)
                + 0.2 * impact(inflammation_mean / 20.0),
            liver: 0.4 * impact((1.0 - p.liver_function) * 10.0)
                + 0.3 * impact(drug_exposure / 100.0)
                + 0.3 * impact(trajectory.mean(StateComponent::DrugTissue) / 10.0),
            immune: 0.4 * impact(inflammation_mean / 20.0)
                + 0.3 * impact((p.immune_response - 0.5) * 10.0)
                + 0.3 * impact(inflammation_burden / 300.0),
        };

        Self {
            glucose_mean,
            glucose_min: glucose.iter().copied().fold(f64::INFINITY, f64::min),
            glucose_max: peak_glucose,
            glucose_sd,
            time_hyperglycaemic_pct: hyper,
            time_hypoglycaemic_pct: hypo,
            time_in_range_pct: in_range,
            peak_glucose,
            peak_glucose_time,
            time_to_baseline: trajectory
                .time_to_baseline(profile.baseline_glucose(), BASELINE_TOLERANCE),
            drug_exposure,
            inflammation_burden,
            heart_rate_sd,
            blood_pressure_sd,
            health_score,
            organ_impact,
        }
    }

    pub const NAMES: [&'static str; 20] = [
        "glucose_mean",
        "glucose_min",
        "glucose_max",
        "glucose_sd",
        "time_hyperglycaemic_pct",
        "time_hypoglycaemic_pct",
        "time_in_range_pct",
        "peak_glucose",
        "peak_glucose_time",
        "time_to_baseline",
        "drug_exposure",
        "inflammation_burden",
        "heart_rate_sd",
        "blood_pressure_sd",
        "health_score",
        "heart_impact",
        "pancreas_impact",
        "kidney_impact",
        "liver_impact",
        "immune_impact",
    ];

    /// Values in [`Self::NAMES`] order; a missing time-to-baseline is NaN.
    pub fn values(&self) -> [f64; 20] {
        [
            self.glucose_mean,
            self.glucose_min,
            self.glucose_max,
            self.glucose_sd,
            self.time_hyperglycaemic_pct,
            self.time_hypoglycaemic_pct,
            self.time_in_range_pct,
            self.peak_glucose,
            self.peak_glucose_time,
            self.time_to_baseline.unwrap_or(f64::NAN),
            self.drug_exposure,
            self.inflammation_burden,
            self.heart_rate_sd,
            self.blood_pressure_sd,
            self.health_score,
            self.organ_impact.heart,
            self.organ_impact.pancreas,
            self.organ_impact.kidney,
            self.organ_impact.liver,
            self.organ_impact.immune,
        ]
    }

    pub fn named_values(&self) -> [(&'static str, f64); 20] {
        let values = self.values();
        std::array::from_fn(|i| (Self::NAMES[i], values[i]))
    }
}

/// Load on each organ system, 0 (none) to 10 (maximal).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrganImpact {
    /// Heart-rate and blood-pressure variability plus mean inflammation.
    pub heart: f64,
    /// Mean glucose above 100 mg/dL and glucose variability.
    pub pancreas: f64,
    /// Renal impairment, drug exposure and inflammation.
    pub kidney: f64,
    /// Hepatic impairment, drug exposure and tissue drug levels.
    pub liver: f64,
    /// Inflammation, immune reactivity and inflammatory burden.
    pub immune: f64,
}

impl OrganImpact {
    /// `(organ, score)` pairs, most affected first.
    pub fn ranked(&self) -> Vec<(&'static str, f64)> {
        let mut organs = vec![
            ("heart", self.heart),
            ("pancreas", self.pancreas),
            ("kidney", self.kidney),
            ("liver", self.liver),
            ("immune", self.immune),
        ];
        organs.sort_by(|a, b| b.1.total_cmp(&a.1));
        organs
    }
}

fn impact(factor: f64) -> f64 {
    factor.clamp(0.0, 10.0)
}

/// `other − reference` for the headline metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub reference: String,
    pub other: String,
    pub peak_glucose: f64,
    pub glucose_mean: f64,
    pub time_in_range_pct: f64,
    /// `None` unless both scenarios returned to baseline.
    pub time_to_baseline: Option<f64>,
    pub drug_exposure: f64,
    pub inflammation_burden: f64,
    pub health_score: f64,
}

impl MetricDelta {
    pub fn between(
        reference_label: &str,
        reference: &TrajectoryMetrics,
        other_label: &str,
        other: &TrajectoryMetrics,
    ) -> Self {
        Self {
            reference: reference_label.to_string(),
            other: other_label.to_string(),
            peak_glucose: other.peak_glucose - reference.peak_glucose,
            glucose_mean: other.glucose_mean - reference.glucose_mean,
            time_in_range_pct: other.time_in_range_pct - reference.time_in_range_pct,
            time_to_baseline: other
                .time_to_baseline
                .zip(reference.time_to_baseline)
                .map(|(o, r)| o - r),
            drug_exposure: other.drug_exposure - reference.drug_exposure,
            inflammation_burden: other.inflammation_burden - reference.inflammation_burden,
            health_score: other.health_score - reference.health_score,
        }
    }
}

/// Mean and SD of metrics across a cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortSummary {
    pub n_patients: usize,
    pub peak_glucose_mean: f64,
    pub peak_glucose_sd: f64,
    pub time_in_range_mean: f64,
    pub time_in_range_sd: f64,
    pub drug_exposure_mean: f64,
    pub drug_exposure_sd: f64,
    pub health_score_mean: f64,
    pub health_score_sd: f64,
}

impl CohortSummary {
    pub fn from_metrics(metrics: &[TrajectoryMetrics]) -> Self {
        let peak: Vec<f64> = metrics.iter().map(|m| m.peak_glucose).collect();
        let in_range: Vec<f64> = metrics.iter().map(|m| m.time_in_range_pct).collect();
        let exposure: Vec<f64> = metrics.iter().map(|m| m.drug_exposure).collect();
        let score: Vec<f64> = metrics.iter().map(|m| m.health_score).collect();

        Self {
            n_patients: metrics.len(),
            peak_glucose_mean: mean(&peak),
            peak_glucose_sd: std_dev(&peak),
            time_in_range_mean: mean(&in_range),
            time_in_range_sd: std_dev(&in_range),
            drug_exposure_mean: mean(&exposure),
            drug_exposure_sd: std_dev(&exposure),
            health_score_mean: mean(&score),
            health_score_sd: std_dev(&score),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        0.0
    } else {
        let mean_val = mean(values);
        let squares = values.iter().map(|v| (v - mean_val).powi(2)).sum::<f64>();
        let variance = squares / (values.len() - 1) as f64;
        variance.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::State;
    use crate::patient::Archetype;
    use crate::simulation::Sample;
    use approx::assert_relative_eq;

    fn flat(glucose: &[f64]) -> Trajectory {
        let samples = glucose
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let mut state = State::from_array([0.0; 8]);
                state.glucose = *g;
                state.inflammation = 5.0;
                state.heart_rate = 70.0;
                state.blood_pressure = 120.0;
                Sample {
                    time: i as f64,
                    state,
                    drugs: vec![],
                }
            })
            .collect();
        Trajectory::new(samples, vec![], vec![])
    }

    #[test]
    fn test_glycaemic_bands() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let traj = flat(&[60.0, 100.0, 200.0, 100.0]);
        let metrics = TrajectoryMetrics::from_trajectory(&traj, &profile);
        assert_relative_eq!(metrics.time_hypoglycaemic_pct, 25.0);
        assert_relative_eq!(metrics.time_hyperglycaemic_pct, 25.0);
        assert_relative_eq!(metrics.time_in_range_pct, 50.0);
        assert_relative_eq!(metrics.glucose_min, 60.0);
        assert_relative_eq!(metrics.peak_glucose, 200.0);
        assert_relative_eq!(metrics.peak_glucose_time, 2.0);
        assert_eq!(metrics.time_to_baseline, Some(3.0));
        assert_relative_eq!(metrics.inflammation_burden, 15.0);
        assert_relative_eq!(metrics.heart_rate_sd, 0.0);
    }

    #[test]
    fn test_health_score_is_perfect_at_flat_baseline() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let metrics = TrajectoryMetrics::from_trajectory(&flat(&[100.0; 5]), &profile);
        // Only the inflammation term (AUC 20) subtracts.
        assert_relative_eq!(metrics.health_score, 100.0 - 10.0 * 20.0 / 1000.0);
    }

    #[test]
    fn test_organ_impact_at_flat_baseline() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let organs = TrajectoryMetrics::from_trajectory(&flat(&[100.0; 5]), &profile).organ_impact;
        // Mean inflammation 5 scores 0.25; burden 20 scores 20/300.
        assert_relative_eq!(organs.heart, 0.4 * 0.25);
        assert_relative_eq!(organs.pancreas, 0.0);
        assert_relative_eq!(organs.kidney, 0.2 * 0.25);
        assert_relative_eq!(organs.liver, 0.0);
        assert_relative_eq!(
            organs.immune,
            0.4 * 0.25 + 0.3 * 5.0 + 0.3 * (20.0 / 300.0),
            max_relative = 1e-12
        );
        assert_eq!(organs.ranked()[0].0, "immune");
    }

    #[test]
    fn test_organ_impact_tracks_glycaemia_and_organ_function() {
        let renal = PatientProfile::from_archetype(Archetype::Renal);
        let standard = PatientProfile::from_archetype(Archetype::Standard);
        let high = flat(&[250.0, 300.0, 250.0]);

        let renal_impact = TrajectoryMetrics::from_trajectory(&high, &renal).organ_impact;
        let standard_impact = TrajectoryMetrics::from_trajectory(&high, &standard).organ_impact;
        assert!(renal_impact.kidney > standard_impact.kidney);
        assert!(renal_impact.liver > standard_impact.liver);
        // Mean 266.7 saturates the glucose factor.
        let variability = impact(std_dev(&[250.0, 300.0, 250.0]) / 10.0);
        assert_relative_eq!(standard_impact.pancreas, 0.7 * 10.0 + 0.3 * variability);
    }

    #[test]
    fn test_metric_names_match_values() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let metrics = TrajectoryMetrics::from_trajectory(&flat(&[100.0, 150.0]), &profile);
        let named = metrics.named_values();
        assert_eq!(named.len(), TrajectoryMetrics::NAMES.len());
        assert_eq!(named[15], ("heart_impact", metrics.organ_impact.heart));
        assert_eq!(named[19].0, "immune_impact");
    }

    #[test]
    fn test_delta_sign_convention() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let low = TrajectoryMetrics::from_trajectory(&flat(&[100.0, 120.0, 100.0]), &profile);
        let high = TrajectoryMetrics::from_trajectory(&flat(&[100.0, 160.0, 100.0]), &profile);
        let delta = MetricDelta::between("low", &low, "high", &high);
        assert_relative_eq!(delta.peak_glucose, 40.0);
        assert_eq!(delta.time_to_baseline, Some(0.0));
    }

    #[test]
    fn test_cohort_summary() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let metrics = vec![
            TrajectoryMetrics::from_trajectory(&flat(&[100.0, 140.0]), &profile),
            TrajectoryMetrics::from_trajectory(&flat(&[100.0, 160.0]), &profile),
        ];
        let summary = CohortSummary::from_metrics(&metrics);
        assert_eq!(summary.n_patients, 2);
        assert_relative_eq!(summary.peak_glucose_mean, 150.0);
        assert_relative_eq!(summary.peak_glucose_sd, 200.0_f64.sqrt());
    }
}
