use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use rayon::prelude::*;
use std::path::PathBuf;

use patient_twin::config::Config;
use patient_twin::output::{self, CohortRecord, ReportExtras};
use patient_twin::patient::cohort::generate_cohort;
use patient_twin::simulation::{
    Calibration, CohortSummary, FitReport, ScenarioComparator, SimulationEngine,
};

#[derive(Parser)]
#[command(name = "patient_twin")]
#[command(about = "Virtual patient physiology and drug-response simulation")]
struct Cli {
    /// Scenario configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Also simulate a virtual cohort of this many patients
    #[arg(long)]
    cohort: Option<usize>,

    /// Random seed for the cohort
    #[arg(short, long)]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {:?}", cli.config))?;
    info!("Loaded configuration from {:?}", cli.config);

    let profile = config.profile().context("invalid patient profile")?;
    let schedules = config.schedules().context("invalid scenario schedule")?;
    let span = config.span()?;
    let interval = config.simulation.sampling_interval;
    let comparator =
        ScenarioComparator::new(config.options()).context("invalid simulation options")?;

    info!(
        "Simulating {} scenarios for a {} patient",
        schedules.len(),
        profile.archetype()
    );
    let comparison = comparator.compare(&profile, &schedules, span, interval)?;
    for (label, e) in comparison.failures() {
        error!("Scenario '{}' failed: {}", label, e);
    }

    std::fs::create_dir_all(&cli.output)
        .with_context(|| format!("failed to create output directory {:?}", cli.output))?;
    output::save_results(&comparison, &profile, &config.alerts, &cli.output)?;
    for (label, trajectory) in comparison.successes() {
        for alert in trajectory.alerts(&config.alerts) {
            warn!("Scenario '{}': {}", label, alert);
        }
    }

    let mut fit = None;
    let mut calibration = None;
    let observed = config.observed_series()?;
    if let (Some(observations), Some(observed)) = (&config.observations, observed) {
        let label = observations.scenario.as_str();
        match comparison.trajectory(label) {
            Some(trajectory) => {
                let report = FitReport::new(label, trajectory, &observed)?;
                for m in &report.metrics {
                    info!(
                        "Fit of '{}' {}: RMSE {:.3} {}, MAE {:.3}",
                        label,
                        m.component.name(),
                        m.rmse,
                        m.component.unit(),
                        m.mae
                    );
                }
                output::save_fit(&report, cli.output.join("fit_metrics.csv"))?;
                fit = Some(report);
            }
            None => warn!("Scenario '{}' failed; skipping observed-data fit", label),
        }

        if let Some(settings) = &observations.calibration {
            let engine = SimulationEngine::new(config.options())?;
            let schedule = schedules
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, schedule)| schedule)
                .context("observed scenario has no schedule")?;
            let result = Calibration::new(&engine, &profile, schedule, span, interval, &observed)?
                .run(settings)
                .context("calibration failed")?;
            output::save_calibration(&result, cli.output.join("calibration.json"))?;
            calibration = Some(result);
        }
    }

    let mut cohort_summaries = None;
    if let Some(size) = cli.cohort {
        let seed = cli.seed.unwrap_or_else(rand::random);
        info!("Simulating virtual cohort of {} patients (seed: {})", size, seed);

        let patients =
            generate_cohort(&config.cohort_spec(size), seed).context("cohort generation failed")?;
        let runs: Vec<_> = patients
            .par_iter()
            .enumerate()
            .map(|(id, patient)| {
                let result = comparator.compare(patient, &schedules, span, interval);
                (id, patient, result)
            })
            .collect();

        let mut records = Vec::new();
        for (id, patient, result) in runs {
            let comparison = result?;
            let metrics = comparison.metrics(patient);
            for (label, e) in comparison.failures() {
                warn!("Patient {} scenario '{}' failed: {}", id, label, e);
            }
            records.extend(comparison.labels().iter().map(|label| CohortRecord {
                patient_id: id,
                weight: patient.weight(),
                age: patient.age(),
                insulin_sensitivity: patient.insulin_sensitivity(),
                label: label.clone(),
                metrics: metrics.get(label).cloned(),
            }));
        }

        output::save_cohort_metrics(&records, cli.output.join("cohort_metrics.csv"))?;

        let summaries: Vec<_> = comparison
            .labels()
            .iter()
            .map(|label| {
                let metrics: Vec<_> = records
                    .iter()
                    .filter(|r| &r.label == label)
                    .filter_map(|r| r.metrics.clone())
                    .collect();
                (label.clone(), CohortSummary::from_metrics(&metrics))
            })
            .collect();
        cohort_summaries = Some(summaries);
    }

    let extras = ReportExtras {
        cohort: cohort_summaries.as_deref(),
        fit: fit.as_ref(),
        calibration: calibration.as_ref(),
    };
    output::generate_report(&comparison, &profile, &config.alerts, extras, &cli.output)?;
    info!("Results saved to {:?}", cli.output);

    if !comparison.is_complete() {
        warn!("Some scenarios failed; see simulation_report.md");
    }

    Ok(())
}
