pub mod physiology;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use physiology::{ActiveDose, ActiveInputs, ActiveMeal, PhysiologyModel};

/// Named components of the state vector, in positional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateComponent {
    Glucose,
    Insulin,
    DrugPlasma,
    DrugTissue,
    ImmuneCells,
    Inflammation,
    HeartRate,
    BloodPressure,
}

impl StateComponent {
    pub const ALL: [StateComponent; 8] = [
        StateComponent::Glucose,
        StateComponent::Insulin,
        StateComponent::DrugPlasma,
        StateComponent::DrugTissue,
        StateComponent::ImmuneCells,
        StateComponent::Inflammation,
        StateComponent::HeartRate,
        StateComponent::BloodPressure,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StateComponent::Glucose => "glucose",
            StateComponent::Insulin => "insulin",
            StateComponent::DrugPlasma => "drug_plasma",
            StateComponent::DrugTissue => "drug_tissue",
            StateComponent::ImmuneCells => "immune_cells",
            StateComponent::Inflammation => "inflammation",
            StateComponent::HeartRate => "heart_rate",
            StateComponent::BloodPressure => "blood_pressure",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            StateComponent::Glucose => "mg/dL",
            StateComponent::Insulin => "mU/L",
            StateComponent::DrugPlasma | StateComponent::DrugTissue => "mg/L",
            StateComponent::ImmuneCells | StateComponent::Inflammation => "a.u.",
            StateComponent::HeartRate => "bpm",
            StateComponent::BloodPressure => "mmHg",
        }
    }
}

/// Patient state. `drug_plasma` and `drug_tissue` are totals over all drugs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub glucose: f64,
    pub insulin: f64,
    pub drug_plasma: f64,
    pub drug_tissue: f64,
    pub immune_cells: f64,
    pub inflammation: f64,
    pub heart_rate: f64,
    pub blood_pressure: f64,
}

impl State {
    pub fn from_array(values: [f64; 8]) -> Self {
        let [
            glucose,
            insulin,
            drug_plasma,
            drug_tissue,
            immune_cells,
            inflammation,
            heart_rate,
            blood_pressure,
        ] = values;
        Self {
            glucose,
            insulin,
            drug_plasma,
            drug_tissue,
            immune_cells,
            inflammation,
            heart_rate,
            blood_pressure,
        }
    }

    pub fn as_array(&self) -> [f64; 8] {
        [
            self.glucose,
            self.insulin,
            self.drug_plasma,
            self.drug_tissue,
            self.immune_cells,
            self.inflammation,
            self.heart_rate,
            self.blood_pressure,
        ]
    }

    pub fn get(&self, component: StateComponent) -> f64 {
        self.as_array()[component as usize]
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    /// `(name, value)` pairs in positional order.
    pub fn named_values(&self) -> [(&'static str, f64); 8] {
        let values = self.as_array();
        StateComponent::ALL.map(|c| (c.name(), values[c as usize]))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            concat!(
                "glucose={:.2} insulin={:.2} drug_plasma={:.4} drug_tissue={:.4} ",
                "immune_cells={:.2} inflammation={:.2} heart_rate={:.1} blood_pressure={:.1}"
            ),
            self.glucose,
            self.insulin,
            self.drug_plasma,
            self.drug_tissue,
            self.immune_cells,
            self.inflammation,
            self.heart_rate,
            self.blood_pressure
        )
    }
}
