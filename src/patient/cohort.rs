use super::{archetypes, Archetype, PatientProfile, PhysiologicalParameters};
use crate::error::{TwinError, TwinResult};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};

const MAX_DRAWS: usize = 20;

/// Inter-individual variability, as CV% of the archetype value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterVariability {
    pub insulin_sensitivity: f64,
    pub insulin_clearance: f64,
    pub renal_function: f64,
    pub liver_function: f64,
    pub immune_response: f64,
}

impl Default for ParameterVariability {
    fn default() -> Self {
        Self {
            insulin_sensitivity: 30.0,
            insulin_clearance: 20.0,
            renal_function: 15.0,
            liver_function: 15.0,
            immune_response: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortSpec {
    pub archetype: Archetype,
    pub size: usize,
    #[serde(default = "default_weight_sd")]
    pub weight_sd: f64,
    #[serde(default = "default_age_sd")]
    pub age_sd: f64,
    #[serde(default)]
    pub variability: ParameterVariability,
}

fn default_weight_sd() -> f64 {
    12.0
}

fn default_age_sd() -> f64 {
    8.0
}

impl CohortSpec {
    pub fn new(archetype: Archetype, size: usize) -> Self {
        Self {
            archetype,
            size,
            weight_sd: default_weight_sd(),
            age_sd: default_age_sd(),
            variability: ParameterVariability::default(),
        }
    }
}

/// Samples `spec.size` virtual patients around the archetype preset.
///
/// Identical seeds give identical cohorts.
pub fn generate_cohort(spec: &CohortSpec, seed: u64) -> TwinResult<Vec<PatientProfile>> {
    if spec.weight_sd < 0.0 || spec.age_sd < 0.0 {
        return Err(TwinError::InvalidParameter(
            "Cohort demographic SDs must be non-negative".to_string(),
        ));
    }

    info!(
        "Generating {} virtual {} patients (seed: {})",
        spec.size, spec.archetype, seed
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let typical = archetypes::parameters_for(spec.archetype);
    let mut cohort = Vec::with_capacity(spec.size);

    for index in 0..spec.size {
        let params = draw_individual(&typical, spec, &mut rng)?;
        debug!("Patient {}: weight {:.1} kg, age {:.0}", index + 1, params.weight, params.age);
        cohort.push(PatientProfile::new(spec.archetype, params)?);
    }

    Ok(cohort)
}

fn draw_individual<R: Rng>(
    typical: &PhysiologicalParameters,
    spec: &CohortSpec,
    rng: &mut R,
) -> TwinResult<PhysiologicalParameters> {
    for _ in 0..MAX_DRAWS {
        let mut params = typical.clone();

        params.weight = sample_normal(typical.weight, spec.weight_sd, rng)?;
        params.age = sample_normal(typical.age, spec.age_sd, rng)?;

        let v = &spec.variability;
        params.insulin_sensitivity =
            apply_log_normal_variability(typical.insulin_sensitivity, v.insulin_sensitivity, rng)?;
        params.insulin_clearance =
            apply_log_normal_variability(typical.insulin_clearance, v.insulin_clearance, rng)?;
        params.renal_function =
            apply_log_normal_variability(typical.renal_function, v.renal_function, rng)?;
        params.liver_function =
            apply_log_normal_variability(typical.liver_function, v.liver_function, rng)?;
        params.immune_response =
            apply_log_normal_variability(typical.immune_response, v.immune_response, rng)?;

        if params.validate().is_ok() {
            return Ok(params);
        }
    }

    Err(TwinError::InvalidParameter(format!(
        "Could not draw an in-range {} patient in {} attempts; reduce the variability",
        spec.archetype, MAX_DRAWS
    )))
}

fn sample_normal<R: Rng>(mean: f64, sd: f64, rng: &mut R) -> TwinResult<f64> {
    if sd == 0.0 {
        return Ok(mean);
    }
    let normal = Normal::new(mean, sd).map_err(|_| TwinError::Random)?;
    Ok(normal.sample(rng))
}

/// Log-normal variability with the requested CV%, preserving the arithmetic mean.
pub fn apply_log_normal_variability<R: Rng>(
    base_value: f64,
    cv_percent: f64,
    rng: &mut R,
) -> TwinResult<f64> {
    if cv_percent <= 0.0 {
        return Ok(base_value);
    }

    let cv = cv_percent / 100.0;
    let sigma_log = (cv * cv + 1.0).ln().sqrt();
    let mu_log = base_value.ln() - sigma_log * sigma_log / 2.0;

    let log_normal = LogNormal::new(mu_log, sigma_log).map_err(|_| TwinError::Random)?;
    Ok(log_normal.sample(rng))
}
