pub mod archetypes;
pub mod cohort;

use crate::error::{invalid, TwinResult};
use crate::models::State;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use cohort::{generate_cohort, CohortSpec, ParameterVariability};

/// Resting immune-cell level every profile is normalised to.
pub const BASELINE_IMMUNE_CELLS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Archetype {
    #[serde(alias = "normal")]
    Standard,
    Diabetic,
    Elderly,
    Renal,
    Inflammatory,
}

impl Archetype {
    pub const ALL: [Archetype; 5] = [
        Archetype::Standard,
        Archetype::Diabetic,
        Archetype::Elderly,
        Archetype::Renal,
        Archetype::Inflammatory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Archetype::Standard => "standard",
            Archetype::Diabetic => "diabetic",
            Archetype::Elderly => "elderly",
            Archetype::Renal => "renal",
            Archetype::Inflammatory => "inflammatory",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "male", alias = "M")]
    Male,
    #[serde(rename = "female", alias = "F")]
    Female,
}

/// Scalar physiology of a virtual patient.
///
/// Rates are per hour. `insulin_sensitivity`, `renal_function`, `liver_function`
/// and `immune_response` are relative to a healthy adult (1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysiologicalParameters {
    pub age: f64,                     // years
    pub weight: f64,                  // kg
    pub sex: Sex,
    pub baseline_glucose: f64,        // mg/dL
    pub baseline_insulin: f64,        // mU/L
    pub insulin_sensitivity: f64,
    pub meal_absorption_rate: f64,    // 1/h
    pub insulin_clearance: f64,       // 1/h
    pub renal_function: f64,
    pub liver_function: f64,
    pub immune_response: f64,
    pub baseline_inflammation: f64,   // arbitrary units
    pub baseline_heart_rate: f64,     // bpm
    pub baseline_blood_pressure: f64, // mmHg, systolic
}

impl PhysiologicalParameters {
    fn scalars(&self) -> [(&'static str, f64); 13] {
        [
            ("age", self.age),
            ("weight", self.weight),
            ("baseline_glucose", self.baseline_glucose),
            ("baseline_insulin", self.baseline_insulin),
            ("insulin_sensitivity", self.insulin_sensitivity),
            ("meal_absorption_rate", self.meal_absorption_rate),
            ("insulin_clearance", self.insulin_clearance),
            ("renal_function", self.renal_function),
            ("liver_function", self.liver_function),
            ("immune_response", self.immune_response),
            ("baseline_inflammation", self.baseline_inflammation),
            ("baseline_heart_rate", self.baseline_heart_rate),
            ("baseline_blood_pressure", self.baseline_blood_pressure),
        ]
    }

    pub fn validate(&self) -> TwinResult<()> {
        for (name, value) in self.scalars() {
            let Some((min, max)) = archetypes::range_of(name) else {
                return invalid(format!("No validity range defined for {}", name));
            };
            if !value.is_finite() || value < min || value > max {
                return invalid(format!(
                    "{} = {} is outside the physiological range [{}, {}]",
                    name, value, min, max
                ));
            }
        }
        Ok(())
    }
}

/// Per-parameter replacements applied on top of an archetype preset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverrides {
    pub age: Option<f64>,
    pub weight: Option<f64>,
    pub sex: Option<Sex>,
    pub baseline_glucose: Option<f64>,
    pub baseline_insulin: Option<f64>,
    pub insulin_sensitivity: Option<f64>,
    pub meal_absorption_rate: Option<f64>,
    pub insulin_clearance: Option<f64>,
    pub renal_function: Option<f64>,
    pub liver_function: Option<f64>,
    pub immune_response: Option<f64>,
    pub baseline_inflammation: Option<f64>,
    pub baseline_heart_rate: Option<f64>,
    pub baseline_blood_pressure: Option<f64>,
}

impl ProfileOverrides {
    fn apply(&self, params: &mut PhysiologicalParameters) {
        fn set(target: &mut f64, value: Option<f64>) {
            if let Some(v) = value {
                *target = v;
            }
        }

        set(&mut params.age, self.age);
        set(&mut params.weight, self.weight);
        if let Some(sex) = self.sex {
            params.sex = sex;
        }
        set(&mut params.baseline_glucose, self.baseline_glucose);
        set(&mut params.baseline_insulin, self.baseline_insulin);
        set(&mut params.insulin_sensitivity, self.insulin_sensitivity);
        set(&mut params.meal_absorption_rate, self.meal_absorption_rate);
        set(&mut params.insulin_clearance, self.insulin_clearance);
        set(&mut params.renal_function, self.renal_function);
        set(&mut params.liver_function, self.liver_function);
        set(&mut params.immune_response, self.immune_response);
        set(&mut params.baseline_inflammation, self.baseline_inflammation);
        set(&mut params.baseline_heart_rate, self.baseline_heart_rate);
        set(&mut params.baseline_blood_pressure, self.baseline_blood_pressure);
    }
}

/// Immutable, validated description of a virtual patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientProfile {
    archetype: Archetype,
    params: PhysiologicalParameters,
}

impl PatientProfile {
    /// Fully explicit construction. `archetype` only tags the profile.
    pub fn new(archetype: Archetype, params: PhysiologicalParameters) -> TwinResult<Self> {
        params.validate()?;
        Ok(Self { archetype, params })
    }

    pub fn from_archetype(archetype: Archetype) -> Self {
        Self {
            archetype,
            params: archetypes::parameters_for(archetype),
        }
    }

    pub fn with_overrides(archetype: Archetype, overrides: &ProfileOverrides) -> TwinResult<Self> {
        let mut params = archetypes::parameters_for(archetype);
        overrides.apply(&mut params);
        Self::new(archetype, params)
    }

    pub fn archetype(&self) -> Archetype {
        self.archetype
    }

    pub fn parameters(&self) -> &PhysiologicalParameters {
        &self.params
    }

    pub fn age(&self) -> f64 {
        self.params.age
    }

    pub fn weight(&self) -> f64 {
        self.params.weight
    }

    pub fn sex(&self) -> Sex {
        self.params.sex
    }

    pub fn baseline_glucose(&self) -> f64 {
        self.params.baseline_glucose
    }

    pub fn baseline_insulin(&self) -> f64 {
        self.params.baseline_insulin
    }

    pub fn insulin_sensitivity(&self) -> f64 {
        self.params.insulin_sensitivity
    }

    pub fn renal_function(&self) -> f64 {
        self.params.renal_function
    }

    pub fn liver_function(&self) -> f64 {
        self.params.liver_function
    }

    pub fn baseline_inflammation(&self) -> f64 {
        self.params.baseline_inflammation
    }

    /// Set-point state: physiology at baseline, no drug on board.
    pub fn baseline_state(&self) -> State {
        State {
            glucose: self.params.baseline_glucose,
            insulin: self.params.baseline_insulin,
            drug_plasma: 0.0,
            drug_tissue: 0.0,
            immune_cells: BASELINE_IMMUNE_CELLS,
            inflammation: self.params.baseline_inflammation,
            heart_rate: self.params.baseline_heart_rate,
            blood_pressure: self.params.baseline_blood_pressure,
        }
    }
}
