pub mod interactions;
pub mod presets;

use crate::error::{invalid, TwinResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use interactions::{interactions_affecting, DrugInteraction, Severity, INTERACTION_TABLE};
pub use presets::preset;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismClass {
    Antidiabetic,
    #[serde(alias = "antiinflammatory")]
    AntiInflammatory,
    BetaBlocker,
    Vasodilator,
}

/// Physiological target a drug effect feeds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    /// Lowers hepatic glucose output.
    HepaticGlucose,
    /// Augments glucose-stimulated insulin secretion.
    InsulinSecretion,
    ImmuneSuppression,
    InflammationSuppression,
    HeartRate,
    BloodPressure,
}

/// Which equations each mechanism class acts on.
const CAPABILITIES: [(MechanismClass, &[Effect]); 4] = [
    (
        MechanismClass::Antidiabetic,
        &[Effect::HepaticGlucose, Effect::InsulinSecretion],
    ),
    (
        MechanismClass::AntiInflammatory,
        &[Effect::ImmuneSuppression, Effect::InflammationSuppression],
    ),
    (MechanismClass::BetaBlocker, &[Effect::HeartRate]),
    (MechanismClass::Vasodilator, &[Effect::BloodPressure]),
];

impl MechanismClass {
    pub const ALL: [MechanismClass; 4] = [
        MechanismClass::Antidiabetic,
        MechanismClass::AntiInflammatory,
        MechanismClass::BetaBlocker,
        MechanismClass::Vasodilator,
    ];

    pub fn effects(&self) -> &'static [Effect] {
        CAPABILITIES
            .iter()
            .find(|(class, _)| class == self)
            .map(|(_, effects)| *effects)
            .unwrap_or(&[])
    }

    pub fn name(&self) -> &'static str {
        match self {
            MechanismClass::Antidiabetic => "antidiabetic",
            MechanismClass::AntiInflammatory => "anti_inflammatory",
            MechanismClass::BetaBlocker => "beta_blocker",
            MechanismClass::Vasodilator => "vasodilator",
        }
    }
}

impl fmt::Display for MechanismClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// PK/PD constants of one medication. Rates are per hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugKinetics {
    pub absorption_rate: f64,
    pub bioavailability: f64,
    /// Apparent central volume, L/kg.
    pub volume_per_kg: f64,
    pub plasma_to_tissue_rate: f64,
    pub elimination_rate: f64,
    pub tissue_elimination_rate: f64,
    /// Share of elimination that is renal; the rest is hepatic.
    pub renal_fraction: f64,
    /// Maximum fractional effect on the targeted equations.
    pub potency: f64,
    /// Tissue concentration giving half the maximum effect, mg/L.
    pub ec50: f64,
}

impl DrugKinetics {
    fn validate(&self, name: &str) -> TwinResult<()> {
        let checks = [
            ("absorption_rate", self.absorption_rate, 0.01, 20.0),
            ("bioavailability", self.bioavailability, 0.01, 1.0),
            ("volume_per_kg", self.volume_per_kg, 0.01, 50.0),
            ("plasma_to_tissue_rate", self.plasma_to_tissue_rate, 0.001, 20.0),
            ("elimination_rate", self.elimination_rate, 0.001, 20.0),
            ("tissue_elimination_rate", self.tissue_elimination_rate, 0.001, 20.0),
            ("renal_fraction", self.renal_fraction, 0.0, 1.0),
            ("potency", self.potency, 0.001, 0.8),
            ("ec50", self.ec50, 1e-6, 1000.0),
        ];

        for (field, value, min, max) in checks {
            if !value.is_finite() || value < min || value > max {
                return invalid(format!(
                    "Drug '{}': {} = {} is outside [{}, {}]",
                    name, field, value, min, max
                ));
            }
        }
        Ok(())
    }
}

/// A medication definition. Doses refer to it through an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrugModel {
    name: String,
    mechanism: MechanismClass,
    kinetics: DrugKinetics,
}

impl DrugModel {
    pub fn new(
        name: impl Into<String>,
        mechanism: MechanismClass,
        kinetics: DrugKinetics,
    ) -> TwinResult<Arc<Self>> {
        let name = name.into();
        if name.trim().is_empty() {
            return invalid("Drug name must not be empty");
        }
        kinetics.validate(&name)?;
        Ok(Arc::new(Self {
            name,
            mechanism,
            kinetics,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mechanism(&self) -> MechanismClass {
        self.mechanism
    }

    pub fn kinetics(&self) -> &DrugKinetics {
        &self.kinetics
    }

    /// Elimination rate scaled by the patient's renal and hepatic function.
    pub fn effective_elimination_rate(&self, renal_function: f64, liver_function: f64) -> f64 {
        let k = &self.kinetics;
        k.elimination_rate
            * (k.renal_fraction * renal_function + (1.0 - k.renal_fraction) * liver_function)
    }

    /// Fraction of receptors occupied at tissue concentration `tissue`.
    pub fn occupancy(&self, tissue: f64) -> f64 {
        let c = tissue.max(0.0);
        c / (self.kinetics.ec50 + c)
    }

    /// Fractional effect at tissue concentration `tissue`, before interactions.
    pub fn effect(&self, tissue: f64) -> f64 {
        self.kinetics.potency * self.occupancy(tissue)
    }
}
