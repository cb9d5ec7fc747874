use crate::error::TwinResult;
use crate::models::StateComponent;
use crate::patient::PatientProfile;
use crate::simulation::{
    Alert, AlertThresholds, CalibrationResult, CohortSummary, Comparison, DetectedInteraction,
    FitReport, MetricDelta, SimulationWarning, TrajectoryMetrics,
};
use chrono::Utc;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Metrics of one label for one virtual patient.
#[derive(Debug, Clone, Serialize)]
pub struct CohortRecord {
    pub patient_id: usize,
    pub weight: f64,
    pub age: f64,
    pub insulin_sensitivity: f64,
    pub label: String,
    pub metrics: Option<TrajectoryMetrics>,
}

#[derive(Serialize)]
struct ComparisonReport<'a> {
    generated_at: String,
    patient: &'a PatientProfile,
    sample_times: &'a [f64],
    scenarios: Vec<ScenarioReport<'a>>,
    deltas: Vec<MetricDelta>,
}

#[derive(Serialize)]
struct ScenarioReport<'a> {
    label: &'a str,
    status: &'static str,
    error: Option<String>,
    metrics: Option<TrajectoryMetrics>,
    warnings: &'a [SimulationWarning],
    interactions: &'a [DetectedInteraction],
    alerts: Vec<Alert>,
}

/// Optional report sections beyond the scenario comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportExtras<'a> {
    pub cohort: Option<&'a [(String, CohortSummary)]>,
    pub fit: Option<&'a FitReport>,
    pub calibration: Option<&'a CalibrationResult>,
}

pub fn save_results<P: AsRef<Path>>(
    comparison: &Comparison,
    profile: &PatientProfile,
    thresholds: &AlertThresholds,
    output_dir: P,
) -> TwinResult<()> {
    let output_path = output_dir.as_ref();

    save_trajectories(comparison, &output_path.join("trajectories.csv"))?;
    save_metrics(comparison, profile, &output_path.join("metrics.csv"))?;
    save_alerts(comparison, thresholds, &output_path.join("alerts.csv"))?;
    save_comparison(comparison, profile, thresholds, &output_path.join("comparison.json"))?;

    info!("All results saved to {:?}", output_path);
    Ok(())
}

fn save_trajectories<P: AsRef<Path>>(comparison: &Comparison, path: P) -> TwinResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["LABEL".to_string(), "TIME".to_string()];
    header.extend(StateComponent::ALL.iter().map(|c| c.name().to_uppercase()));
    writer.write_record(&header)?;

    for label in comparison.labels() {
        let Some(trajectory) = comparison.trajectory(label) else {
            continue;
        };
        for sample in trajectory.samples() {
            let mut record = vec![label.clone(), sample.time.to_string()];
            record.extend(sample.state.as_array().iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn save_metrics<P: AsRef<Path>>(
    comparison: &Comparison,
    profile: &PatientProfile,
    path: P,
) -> TwinResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let metrics = comparison.metrics(profile);

    let mut header_written = false;
    for label in comparison.labels() {
        let Some(m) = metrics.get(label) else {
            continue;
        };
        let values = m.named_values();
        if !header_written {
            let mut header = vec!["LABEL".to_string()];
            header.extend(values.iter().map(|(name, _)| name.to_uppercase()));
            writer.write_record(&header)?;
            header_written = true;
        }
        let mut record = vec![label.clone()];
        record.extend(values.iter().map(|(_, v)| format_metric(*v)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn save_alerts<P: AsRef<Path>>(
    comparison: &Comparison,
    thresholds: &AlertThresholds,
    path: P,
) -> TwinResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "LABEL", "COMPONENT", "KIND", "ONSET", "UNTIL", "VALUE", "THRESHOLD", "UNIT",
    ])?;

    for (label, trajectory) in comparison.successes() {
        for alert in trajectory.alerts(thresholds) {
            writer.write_record([
                label.to_string(),
                alert.component.name().to_string(),
                format!("{:?}", alert.kind).to_lowercase(),
                alert.time.to_string(),
                alert.until.to_string(),
                format_metric(alert.value),
                alert.threshold.to_string(),
                alert.component.unit().to_string(),
            ])?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn save_comparison<P: AsRef<Path>>(
    comparison: &Comparison,
    profile: &PatientProfile,
    thresholds: &AlertThresholds,
    path: P,
) -> TwinResult<()> {
    let metrics = comparison.metrics(profile);

    let scenarios = comparison
        .labels()
        .iter()
        .filter_map(|label| comparison.get(label).map(|outcome| (label, outcome)))
        .map(|(label, outcome)| match outcome {
            Ok(trajectory) => ScenarioReport {
                label,
                status: "ok",
                error: None,
                metrics: metrics.get(label).cloned(),
                warnings: trajectory.warnings(),
                interactions: trajectory.interactions(),
                alerts: trajectory.alerts(thresholds),
            },
            Err(e) => ScenarioReport {
                label,
                status: "failed",
                error: Some(e.to_string()),
                metrics: None,
                warnings: e.partial_trajectory().map(|t| t.warnings()).unwrap_or(&[]),
                interactions: &[],
                alerts: Vec::new(),
            },
        })
        .collect();

    // Deltas against the first label
    let deltas = match comparison.labels().split_first() {
        Some((reference, others)) => others
            .iter()
            .filter_map(|other| comparison.delta(profile, reference, other))
            .collect(),
        None => Vec::new(),
    };

    let report = ComparisonReport {
        generated_at: Utc::now().to_rfc3339(),
        patient: profile,
        sample_times: comparison.sample_times(),
        scenarios,
        deltas,
    };

    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &report)?;
    Ok(())
}

pub fn save_cohort_metrics<P: AsRef<Path>>(records: &[CohortRecord], path: P) -> TwinResult<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let fixed = ["PATIENT_ID", "WEIGHT", "AGE", "INSULIN_SENSITIVITY", "LABEL", "STATUS"];
    let mut header: Vec<String> = fixed
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(TrajectoryMetrics::NAMES.iter().map(|name| name.to_uppercase()));
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![
            record.patient_id.to_string(),
            record.weight.to_string(),
            record.age.to_string(),
            record.insulin_sensitivity.to_string(),
            record.label.clone(),
        ];
        match &record.metrics {
            Some(m) => {
                row.push("ok".to_string());
                row.extend(m.values().iter().map(|v| format_metric(*v)));
            }
            None => {
                row.push("failed".to_string());
                row.extend(TrajectoryMetrics::NAMES.iter().map(|_| String::new()));
            }
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Observed-vs-simulated error statistics, one row per component.
pub fn save_fit<P: AsRef<Path>>(fit: &FitReport, path: P) -> TwinResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "SCENARIO", "COMPONENT", "UNIT", "N", "RMSE", "MAE", "MAPE", "CORRELATION",
    ])?;

    for m in &fit.metrics {
        writer.write_record([
            fit.scenario.clone(),
            m.component.name().to_string(),
            m.component.unit().to_string(),
            m.n_observations.to_string(),
            format_metric(m.rmse),
            format_metric(m.mae),
            m.mape.map_or(String::new(), format_metric),
            m.correlation.map_or(String::new(), format_metric),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn save_calibration<P: AsRef<Path>>(result: &CalibrationResult, path: P) -> TwinResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, result)?;
    Ok(())
}

fn format_metric(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        format!("{:.4}", value)
    }
}

const SCENARIO_TABLE_HEADER: &str = concat!(
    "| Scenario | Peak glucose (mg/dL) | Peak time (h) | Time in range (%) ",
    "| Time to baseline (h) | Drug exposure (mg*h/L) | Health score |\n",
    "|---|---|---|---|---|---|---|\n",
);

/// Markdown summary of a comparison, plus whichever extras are present.
pub fn generate_report<P: AsRef<Path>>(
    comparison: &Comparison,
    profile: &PatientProfile,
    thresholds: &AlertThresholds,
    extras: ReportExtras<'_>,
    output_dir: P,
) -> TwinResult<()> {
    let output_path = output_dir.as_ref();
    let report_path = output_path.join("simulation_report.md");
    let metrics = comparison.metrics(profile);
    let times = comparison.sample_times();

    let mut content = format!(
        r#"# Patient Simulation Report

## Simulation Overview
- **Generated**: {}
- **Archetype**: {}
- **Weight**: {:.1} kg, **Age**: {:.0} years
- **Baseline glucose**: {:.1} mg/dL
- **Time span**: {:.2} h to {:.2} h ({} samples)

## Scenario Metrics
{}"#,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        profile.archetype(),
        profile.weight(),
        profile.age(),
        profile.baseline_glucose(),
        times.first().copied().unwrap_or(0.0),
        times.last().copied().unwrap_or(0.0),
        times.len(),
        SCENARIO_TABLE_HEADER,
    );

    for label in comparison.labels() {
        match metrics.get(label) {
            Some(m) => content.push_str(&format!(
                "| {} | {:.1} | {:.2} | {:.1} | {} | {:.2} | {:.1} |\n",
                label,
                m.peak_glucose,
                m.peak_glucose_time,
                m.time_in_range_pct,
                m.time_to_baseline.map_or("not reached".to_string(), |t| format!("{:.2}", t)),
                m.drug_exposure,
                m.health_score,
            )),
            None => content.push_str(&format!("| {} | failed | | | | | |\n", label)),
        }
    }

    let mut organs = String::new();
    for label in comparison.labels() {
        if let Some(m) = metrics.get(label) {
            let o = &m.organ_impact;
            let (worst, _) = o.ranked()[0];
            organs.push_str(&format!(
                "| {} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {} |\n",
                label, o.heart, o.pancreas, o.kidney, o.liver, o.immune, worst
            ));
        }
    }
    if !organs.is_empty() {
        content.push_str("\n## Organ Impact (0-10)\n");
        content.push_str(concat!(
            "| Scenario | Heart | Pancreas | Kidney | Liver | Immune | Most affected |\n",
            "|---|---|---|---|---|---|---|\n",
        ));
        content.push_str(&organs);
    }

    let mut alerts = String::new();
    for (label, trajectory) in comparison.successes() {
        for alert in trajectory.alerts(thresholds) {
            alerts.push_str(&format!("- **{}**: {}\n", label, alert));
        }
    }
    if !alerts.is_empty() {
        content.push_str("\n## Alerts\n");
        content.push_str(&alerts);
    }

    let failures: Vec<_> = comparison.failures().collect();
    if !failures.is_empty() {
        content.push_str("\n## Failed Scenarios\n");
        for (label, error) in failures {
            content.push_str(&format!("- **{}**: {}\n", label, error));
        }
    }

    let mut interactions = String::new();
    for (label, trajectory) in comparison.successes() {
        for i in trajectory.interactions() {
            interactions.push_str(&format!(
                "- **{}**: {} + {} ({:?}, from t={:.2} h). {}. {}.\n",
                label,
                i.affected,
                i.modulator,
                i.severity,
                i.first_detected,
                i.description,
                i.recommendation
            ));
        }
    }
    if !interactions.is_empty() {
        content.push_str("\n## Drug Interactions\n");
        content.push_str(&interactions);
    }

    if let Some(fit) = extras.fit {
        content.push_str(&format!(
            concat!(
                "\n## Model Fit ({})\n",
                "| Component | N | RMSE | MAE | MAPE (%) | Correlation |\n",
                "|---|---|---|---|---|---|\n",
            ),
            fit.scenario
        ));
        for m in &fit.metrics {
            content.push_str(&format!(
                "| {} ({}) | {} | {:.3} | {:.3} | {} | {} |\n",
                m.component.name(),
                m.component.unit(),
                m.n_observations,
                m.rmse,
                m.mae,
                m.mape.map_or("n/a".to_string(), |v| format!("{:.1}", v)),
                m.correlation.map_or("n/a".to_string(), |v| format!("{:.3}", v)),
            ));
        }
    }

    if let Some(calibration) = extras.calibration {
        content.push_str(&format!(
            concat!(
                "\n## Calibration\n- Iterations: {}\n- Cost: {:.6} -> {:.6}\n\n",
                "| Parameter | Initial | Calibrated | Change (%) | Bounds |\n",
                "|---|---|---|---|---|\n",
            ),
            calibration.iterations, calibration.initial_cost, calibration.final_cost
        ));
        for e in &calibration.estimates {
            content.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:+.1} | [{}, {}] |\n",
                e.parameter.name(),
                e.initial,
                e.calibrated,
                e.change_pct,
                e.lower,
                e.upper
            ));
        }
    }

    if let Some(summaries) = extras.cohort {
        content.push_str("\n## Virtual Cohort\n");
        for (label, summary) in summaries {
            content.push_str(&format!(
                r#"### {}
- Patients: {}
- Peak glucose: {:.1} ± {:.1} mg/dL
- Time in range: {:.1} ± {:.1} %
- Drug exposure: {:.2} ± {:.2} mg*h/L
- Health score: {:.1} ± {:.1}
"#,
                label,
                summary.n_patients,
                summary.peak_glucose_mean,
                summary.peak_glucose_sd,
                summary.time_in_range_mean,
                summary.time_in_range_sd,
                summary.drug_exposure_mean,
                summary.drug_exposure_sd,
                summary.health_score_mean,
                summary.health_score_sd,
            ));
        }
    }

    content.push_str(
        r#"
## Files Generated
- `trajectories.csv`: state time series for every successful scenario
- `metrics.csv`: clinical metrics per scenario
- `alerts.csv`: out-of-band episodes per scenario
- `comparison.json`: per-scenario status, metrics, alerts, warnings, interactions and deltas
"#,
    );
    if extras.fit.is_some() {
        content.push_str("- `fit_metrics.csv`: observed vs simulated error statistics\n");
    }
    if extras.calibration.is_some() {
        content.push_str("- `calibration.json`: calibrated profile and parameter estimates\n");
    }
    if extras.cohort.is_some() {
        content.push_str("- `cohort_metrics.csv`: metrics per virtual patient and scenario\n");
    }

    std::fs::write(report_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patient::Archetype;
    use crate::schedule::EventSchedule;
    use crate::simulation::{
        CalibratedParameter, Calibration, CalibrationSettings, ObservedSeries, ScenarioComparator,
        SimulationEngine, TimeSpan,
    };
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("patient_twin_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_outputs_written() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let scenarios = vec![
            ("fasting".to_string(), EventSchedule::empty()),
            ("meal".to_string(), EventSchedule::builder().meal(50.0, 0.5).build().unwrap()),
        ];
        let comparison = ScenarioComparator::default()
            .compare(&profile, &scenarios, TimeSpan::hours(4.0).unwrap(), 0.5)
            .unwrap();

        let thresholds = AlertThresholds::default()
            .with_band(StateComponent::Glucose, 70.0, 101.0)
            .unwrap();

        let dir = scratch_dir("outputs");
        save_results(&comparison, &profile, &thresholds, &dir).unwrap();
        generate_report(&comparison, &profile, &thresholds, ReportExtras::default(), &dir).unwrap();

        let trajectories = std::fs::read_to_string(dir.join("trajectories.csv")).unwrap();
        // header + 9 samples per label
        assert_eq!(trajectories.lines().count(), 1 + 2 * 9);
        assert!(trajectories.starts_with("LABEL,TIME,GLUCOSE"));

        let json = read_json(&dir.join("comparison.json"));
        assert_eq!(json["scenarios"][1]["label"], "meal");
        assert_eq!(json["deltas"][0]["other"], "meal");
        assert!(json["generated_at"].is_string());

        assert!(json["scenarios"][0]["alerts"].as_array().unwrap().is_empty());
        assert_eq!(json["scenarios"][1]["alerts"][0]["component"], "glucose");
        assert!(json["scenarios"][1]["metrics"]["organ_impact"]["pancreas"].is_number());

        let alerts = std::fs::read_to_string(dir.join("alerts.csv")).unwrap();
        assert!(alerts.lines().nth(1).unwrap().starts_with("meal,glucose,high,"));

        let report = std::fs::read_to_string(dir.join("simulation_report.md")).unwrap();
        assert!(report.contains("| meal |"));
        assert!(report.contains("## Organ Impact"));
        assert!(report.contains("- **meal**: glucose high"));
        assert!(!report.contains("## Calibration"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_fit_and_calibration_outputs() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let schedule = EventSchedule::builder().meal(50.0, 0.5).build().unwrap();
        let span = TimeSpan::hours(4.0).unwrap();
        let engine = SimulationEngine::default();
        let traj = engine.simulate(&profile, &schedule, span, 0.5).unwrap();
        let points = [(0.0, 95.0), (2.0, 130.0)];
        let observed = vec![ObservedSeries::from_points(StateComponent::Glucose, &points).unwrap()];
        let fit = FitReport::new("meal", &traj, &observed).unwrap();

        let settings = CalibrationSettings {
            parameters: vec![CalibratedParameter::InsulinSensitivity],
            max_iterations: 5,
            ..Default::default()
        };
        let calibration = Calibration::new(&engine, &profile, &schedule, span, 0.5, &observed)
            .unwrap()
            .run(&settings)
            .unwrap();

        let dir = scratch_dir("fit");
        save_fit(&fit, dir.join("fit_metrics.csv")).unwrap();
        save_calibration(&calibration, dir.join("calibration.json")).unwrap();

        let csv = std::fs::read_to_string(dir.join("fit_metrics.csv")).unwrap();
        assert!(csv.starts_with("SCENARIO,COMPONENT,UNIT,N,RMSE"));
        assert!(csv.lines().nth(1).unwrap().starts_with("meal,glucose,mg/dL,2,"));

        let json = read_json(&dir.join("calibration.json"));
        assert_eq!(json["estimates"][0]["parameter"], "insulin_sensitivity");
        assert!(json["profile"]["params"]["insulin_sensitivity"].is_number());

        let comparison = ScenarioComparator::default()
            .compare(&profile, &[("meal".to_string(), schedule)], span, 0.5)
            .unwrap();
        let extras = ReportExtras {
            fit: Some(&fit),
            calibration: Some(&calibration),
            ..Default::default()
        };
        generate_report(&comparison, &profile, &AlertThresholds::default(), extras, &dir).unwrap();
        let report = std::fs::read_to_string(dir.join("simulation_report.md")).unwrap();
        assert!(report.contains("## Model Fit (meal)"));
        assert!(report.contains("| glucose (mg/dL) | 2 |"));
        assert!(report.contains("| insulin_sensitivity | 0.8000 |"));
        std::fs::remove_dir_all(dir).ok();
    }
}
