use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::drugs::{presets, DrugKinetics, DrugModel, MechanismClass};
use crate::error::{TwinError, TwinResult};
use crate::patient::cohort::{CohortSpec, ParameterVariability};
use crate::patient::{Archetype, PatientProfile, ProfileOverrides};
use crate::schedule::{EventSchedule, ScheduleBuilder};
use crate::simulation::fit::load_observations;
use crate::simulation::{
    AlertThresholds, CalibrationSettings, ObservedSeries, SimulationOptions, TimeSpan,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub patient: PatientConfig,
    #[serde(default)]
    pub drugs: Vec<DrugConfig>,
    pub scenarios: Vec<ScenarioConfig>,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub cohort: CohortConfig,
    #[serde(default)]
    pub alerts: AlertThresholds,
    #[serde(default)]
    pub observations: Option<ObservationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientConfig {
    pub archetype: Archetype,
    #[serde(default)]
    pub overrides: ProfileOverrides,
}

/// Either a preset (`{"preset": "metformin"}`, optionally with field overrides)
/// or a complete definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugConfig {
    pub preset: Option<String>,
    pub name: Option<String>,
    pub mechanism: Option<MechanismClass>,
    pub absorption_rate: Option<f64>,
    pub bioavailability: Option<f64>,
    pub volume_per_kg: Option<f64>,
    pub plasma_to_tissue_rate: Option<f64>,
    pub elimination_rate: Option<f64>,
    pub tissue_elimination_rate: Option<f64>,
    pub renal_fraction: Option<f64>,
    pub potency: Option<f64>,
    pub ec50: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub label: String,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventConfig {
    Dose { drug: String, amount: f64, time: f64 },
    Meal { carbs: f64, time: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub start: f64,
    pub end: f64,
    pub sampling_interval: f64,
    pub rtol: Option<f64>,
    pub atol: Option<f64>,
    pub max_steps: Option<usize>,
    pub max_wall_seconds: Option<f64>,
}

/// Measured data for one scenario; calibration runs only when `calibration` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationConfig {
    pub scenario: String,
    /// `component,time,value` CSV, relative to the configuration file.
    pub file: PathBuf,
    #[serde(default)]
    pub calibration: Option<CalibrationSettings>,
}

/// Spread of a virtual cohort around the configured archetype.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub weight_sd: f64,
    pub age_sd: f64,
    pub variability: ParameterVariability,
}

impl Default for CohortConfig {
    fn default() -> Self {
        let spec = CohortSpec::new(Archetype::Standard, 0);
        Self {
            weight_sd: spec.weight_sd,
            age_sd: spec.age_sd,
            variability: spec.variability,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> TwinResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&content)?;
        if let (Some(observations), Some(dir)) = (config.observations.as_mut(), path.parent()) {
            if observations.file.is_relative() {
                observations.file = dir.join(&observations.file);
            }
        }
        Ok(config)
    }

    pub fn from_json(content: &str) -> TwinResult<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TwinResult<()> {
        if self.scenarios.is_empty() {
            return Err(TwinError::InvalidConfig(
                "At least one scenario must be specified".to_string(),
            ));
        }

        let mut labels = HashSet::new();
        for scenario in &self.scenarios {
            if !labels.insert(scenario.label.as_str()) {
                return Err(TwinError::InvalidConfig(format!(
                    "Duplicate scenario label '{}'",
                    scenario.label
                )));
            }
        }

        self.validate_events()?;

        let sim = &self.simulation;
        if !sim.start.is_finite() || !sim.end.is_finite() || sim.end <= sim.start {
            return Err(TwinError::InvalidConfig(format!(
                "Simulation span [{}, {}] must be finite with end > start",
                sim.start, sim.end
            )));
        }
        if !sim.sampling_interval.is_finite() || sim.sampling_interval <= 0.0 {
            return Err(TwinError::InvalidConfig(
                "Sampling interval must be positive".to_string(),
            ));
        }
        if let Some(seconds) = sim.max_wall_seconds {
            if seconds <= 0.0 || Duration::try_from_secs_f64(seconds).is_err() {
                return Err(TwinError::InvalidConfig(format!(
                    "max_wall_seconds must be a positive, representable duration (got {})",
                    seconds
                )));
            }
        }

        self.alerts
            .validate()
            .map_err(|e| TwinError::InvalidConfig(format!("alerts: {}", e)))?;

        if let Some(observations) = &self.observations {
            if !labels.contains(observations.scenario.as_str()) {
                return Err(TwinError::InvalidConfig(format!(
                    "Observations refer to unknown scenario '{}'",
                    observations.scenario
                )));
            }
            if let Some(settings) = &observations.calibration {
                settings
                    .validate()
                    .map_err(|e| TwinError::InvalidConfig(format!("calibration: {}", e)))?;
            }
        }

        Ok(())
    }

    fn validate_events(&self) -> TwinResult<()> {
        let declared: HashSet<String> = self
            .drugs
            .iter()
            .map(DrugConfig::resolved_name)
            .collect::<TwinResult<_>>()?;
        if declared.len() != self.drugs.len() {
            return Err(TwinError::InvalidConfig(
                "Drug names must be unique".to_string(),
            ));
        }

        for scenario in &self.scenarios {
            for event in &scenario.events {
                let time = match event {
                    EventConfig::Dose { drug, time, .. } => {
                        if !declared.contains(drug) {
                            return Err(TwinError::InvalidConfig(format!(
                                "Scenario '{}' doses undeclared drug '{}'",
                                scenario.label, drug
                            )));
                        }
                        *time
                    }
                    EventConfig::Meal { time, .. } => *time,
                };
                if !time.is_finite() {
                    return Err(TwinError::InvalidConfig(format!(
                        "Scenario '{}' has a non-finite event time",
                        scenario.label
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn profile(&self) -> TwinResult<PatientProfile> {
        PatientProfile::with_overrides(self.patient.archetype, &self.patient.overrides)
    }

    pub fn drug_models(&self) -> TwinResult<HashMap<String, Arc<DrugModel>>> {
        self.drugs
            .iter()
            .map(|drug| {
                let model = drug.build()?;
                Ok((model.name().to_string(), model))
            })
            .collect()
    }

    /// `(label, schedule)` pairs in file order.
    pub fn schedules(&self) -> TwinResult<Vec<(String, EventSchedule)>> {
        let drugs = self.drug_models()?;
        self.scenarios
            .iter()
            .map(|scenario| {
                let mut builder = ScheduleBuilder::default();
                for event in &scenario.events {
                    builder = match event {
                        EventConfig::Dose { drug, amount, time } => {
                            let model = drugs.get(drug).ok_or_else(|| {
                                TwinError::InvalidConfig(format!("Unknown drug '{}'", drug))
                            })?;
                            builder.dose(Arc::clone(model), *amount, *time)
                        }
                        EventConfig::Meal { carbs, time } => builder.meal(*carbs, *time),
                    };
                }
                Ok((scenario.label.clone(), builder.build()?))
            })
            .collect()
    }

    pub fn span(&self) -> TwinResult<TimeSpan> {
        TimeSpan::new(self.simulation.start, self.simulation.end)
    }

    pub fn options(&self) -> SimulationOptions {
        let defaults = SimulationOptions::default();
        let sim = &self.simulation;
        SimulationOptions {
            rtol: sim.rtol.unwrap_or(defaults.rtol),
            atol: sim.atol.unwrap_or(defaults.atol),
            max_steps: sim.max_steps.unwrap_or(defaults.max_steps),
            max_wall_time: sim
                .max_wall_seconds
                .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok()),
            ..defaults
        }
    }

    /// Observed series of the configured file, if any.
    pub fn observed_series(&self) -> TwinResult<Option<Vec<ObservedSeries>>> {
        self.observations
            .as_ref()
            .map(|observations| load_observations(&observations.file))
            .transpose()
    }

    pub fn cohort_spec(&self, size: usize) -> CohortSpec {
        CohortSpec {
            archetype: self.patient.archetype,
            size,
            weight_sd: self.cohort.weight_sd,
            age_sd: self.cohort.age_sd,
            variability: self.cohort.variability.clone(),
        }
    }
}

impl DrugConfig {
    fn resolved_name(&self) -> TwinResult<String> {
        match (&self.name, &self.preset) {
            (Some(name), _) => Ok(name.clone()),
            (None, Some(preset)) => Ok(preset.to_lowercase()),
            (None, None) => Err(TwinError::InvalidConfig(
                "Each drug needs a 'preset' or a 'name'".to_string(),
            )),
        }
    }

    pub fn build(&self) -> TwinResult<Arc<DrugModel>> {
        let name = self.resolved_name()?;

        let (base_mechanism, base) = match &self.preset {
            Some(preset) => {
                let kinetics = presets::kinetics(preset).ok_or_else(|| {
                    TwinError::InvalidConfig(format!("Unknown drug preset '{}'", preset))
                })?;
                (presets::mechanism(preset), Some(kinetics))
            }
            None => (None, None),
        };

        let mechanism = self.mechanism.or(base_mechanism).ok_or_else(|| {
            TwinError::InvalidConfig(format!("Drug '{}' needs a mechanism", name))
        })?;

        let field = |value: Option<f64>, from_base: Option<f64>, key: &str| {
            value.or(from_base).ok_or_else(|| {
                TwinError::InvalidConfig(format!("Drug '{}' is missing '{}'", name, key))
            })
        };
        let base_field = |get: fn(&DrugKinetics) -> f64| base.as_ref().map(get);

        let kinetics = DrugKinetics {
            absorption_rate: field(
                self.absorption_rate,
                base_field(|k| k.absorption_rate),
                "absorption_rate",
            )?,
            bioavailability: field(
                self.bioavailability,
                base_field(|k| k.bioavailability),
                "bioavailability",
            )?,
            volume_per_kg: field(
                self.volume_per_kg,
                base_field(|k| k.volume_per_kg),
                "volume_per_kg",
            )?,
            plasma_to_tissue_rate: field(
                self.plasma_to_tissue_rate,
                base_field(|k| k.plasma_to_tissue_rate),
                "plasma_to_tissue_rate",
            )?,
            elimination_rate: field(
                self.elimination_rate,
                base_field(|k| k.elimination_rate),
                "elimination_rate",
            )?,
            tissue_elimination_rate: field(
                self.tissue_elimination_rate,
                base_field(|k| k.tissue_elimination_rate),
                "tissue_elimination_rate",
            )?,
            renal_fraction: field(
                self.renal_fraction,
                base_field(|k| k.renal_fraction),
                "renal_fraction",
            )?,
            potency: field(self.potency, base_field(|k| k.potency), "potency")?,
            ec50: field(self.ec50, base_field(|k| k.ec50), "ec50")?,
        };

        DrugModel::new(name, mechanism, kinetics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduledEvent;

    const EXAMPLE: &str = r#"{
        "patient": { "archetype": "diabetic", "overrides": { "weight": 90.0 } },
        "drugs": [
            { "preset": "metformin" },
            { "preset": "ibuprofen", "name": "ibuprofen-strong", "potency": 0.7 },
            {
                "name": "custom", "mechanism": "vasodilator",
                "absorption_rate": 0.5, "bioavailability": 0.6, "volume_per_kg": 2.0,
                "plasma_to_tissue_rate": 0.3, "elimination_rate": 0.1,
                "tissue_elimination_rate": 0.1, "renal_fraction": 0.5,
                "potency": 0.3, "ec50": 0.5
            }
        ],
        "scenarios": [
            { "label": "untreated", "events": [ { "type": "meal", "carbs": 50, "time": 1.0 } ] },
            { "label": "metformin", "events": [
                { "type": "dose", "drug": "metformin", "amount": 500, "time": 0.0 },
                { "type": "meal", "carbs": 50, "time": 1.0 }
            ] }
        ],
        "simulation": { "end": 12.0, "sampling_interval": 0.25, "max_steps": 50000 }
    }"#;

    #[test]
    fn test_parse_and_build() {
        let config = Config::from_json(EXAMPLE).unwrap();
        let profile = config.profile().unwrap();
        assert_eq!(profile.archetype(), Archetype::Diabetic);
        assert_eq!(profile.weight(), 90.0);

        let drugs = config.drug_models().unwrap();
        assert_eq!(drugs.len(), 3);
        assert_eq!(drugs["ibuprofen-strong"].kinetics().potency, 0.7);
        assert_eq!(drugs["ibuprofen-strong"].mechanism(), MechanismClass::AntiInflammatory);
        assert_eq!(drugs["custom"].mechanism(), MechanismClass::Vasodilator);

        let schedules = config.schedules().unwrap();
        assert_eq!(schedules[1].0, "metformin");
        assert!(matches!(schedules[1].1.events()[0], ScheduledEvent::Dose(_)));

        let options = config.options();
        assert_eq!(options.max_steps, 50000);
        assert_eq!(options.rtol, SimulationOptions::default().rtol);
        assert_eq!(config.span().unwrap().end, 12.0);
    }

    #[test]
    fn test_undeclared_drug_rejected() {
        let json = EXAMPLE.replace(r#""drug": "metformin""#, r#""drug": "aspirin""#);
        assert!(matches!(Config::from_json(&json), Err(TwinError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let json = EXAMPLE.replace(r#""label": "metformin""#, r#""label": "untreated""#);
        assert!(matches!(Config::from_json(&json), Err(TwinError::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_span_rejected() {
        let json = EXAMPLE.replace(r#""end": 12.0"#, r#""end": -1.0"#);
        assert!(Config::from_json(&json).is_err());
    }

    #[test]
    fn test_wall_clock_budget_limits() {
        let with_budget = |seconds: &str| {
            EXAMPLE.replace(
                r#""max_steps": 50000"#,
                &format!(r#""max_steps": 50000, "max_wall_seconds": {}"#, seconds),
            )
        };

        let config = Config::from_json(&with_budget("1e19")).unwrap();
        let options = config.options();
        assert!(options.max_wall_time.is_some());
        let comparison = crate::simulation::ScenarioComparator::new(options)
            .unwrap()
            .compare(
                &config.profile().unwrap(),
                &config.schedules().unwrap(),
                config.span().unwrap(),
                config.simulation.sampling_interval,
            )
            .unwrap();
        assert!(comparison.is_complete());

        for bad in ["1e30", "-1.0", "0.0"] {
            assert!(
                matches!(Config::from_json(&with_budget(bad)), Err(TwinError::InvalidConfig(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_alerts_and_observations_sections() {
        let json = EXAMPLE.replace(
            r#""simulation":"#,
            r#""alerts": [ { "component": "glucose", "low": 60.0, "high": 250.0 } ],
            "observations": {
                "scenario": "metformin", "file": "observed.csv",
                "calibration": { "parameters": ["insulin_sensitivity"] }
            },
            "simulation":"#,
        );
        let config = Config::from_json(&json).unwrap();
        assert_eq!(config.alerts.bands().len(), 1);
        let observations = config.observations.as_ref().unwrap();
        assert_eq!(observations.scenario, "metformin");
        let settings = observations.calibration.as_ref().unwrap();
        assert_eq!(settings.max_iterations, CalibrationSettings::default().max_iterations);

        let unknown = json.replace(r#""scenario": "metformin""#, r#""scenario": "placebo""#);
        assert!(matches!(Config::from_json(&unknown), Err(TwinError::InvalidConfig(_))));

        let inverted = json.replace(r#""high": 250.0"#, r#""high": 10.0"#);
        assert!(matches!(Config::from_json(&inverted), Err(TwinError::InvalidConfig(_))));
    }

    #[test]
    fn test_observation_file_resolves_next_to_config() {
        let dir = std::env::temp_dir().join(format!("patient_twin_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let csv = "component,time,value\nglucose,0.0,180\n";
        std::fs::write(dir.join("observed.csv"), csv).unwrap();
        let json = EXAMPLE.replace(
            r#""simulation":"#,
            r#""observations": { "scenario": "untreated", "file": "observed.csv" }, "simulation":"#,
        );
        std::fs::write(dir.join("config.json"), json).unwrap();

        let config = Config::from_file(dir.join("config.json")).unwrap();
        let series = config.observed_series().unwrap().unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].observations()[0].value, 180.0);
        assert!(Config::from_json(EXAMPLE).unwrap().observed_series().unwrap().is_none());
    }

    #[test]
    fn test_incomplete_custom_drug() {
        let drug = DrugConfig {
            preset: None,
            name: Some("partial".to_string()),
            mechanism: Some(MechanismClass::BetaBlocker),
            absorption_rate: Some(1.0),
            bioavailability: None,
            volume_per_kg: None,
            plasma_to_tissue_rate: None,
            elimination_rate: None,
            tissue_elimination_rate: None,
            renal_fraction: None,
            potency: None,
            ec50: None,
        };
        assert!(matches!(drug.build(), Err(TwinError::InvalidConfig(_))));
    }
}
