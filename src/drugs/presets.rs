use super::{DrugKinetics, DrugModel, MechanismClass};
use std::sync::Arc;

/// Reference medications, one per mechanism class.
static PRESETS: [(&str, MechanismClass, DrugKinetics); 4] = [
    (
        "metformin",
        MechanismClass::Antidiabetic,
        DrugKinetics {
            absorption_rate: 1.2,
            bioavailability: 0.55,
            volume_per_kg: 1.0,
            plasma_to_tissue_rate: 0.8,
            elimination_rate: 0.35,
            tissue_elimination_rate: 0.3,
            renal_fraction: 0.9,
            potency: 0.6,
            ec50: 0.8,
        },
    ),
    (
        "ibuprofen",
        MechanismClass::AntiInflammatory,
        DrugKinetics {
            absorption_rate: 2.0,
            bioavailability: 0.9,
            volume_per_kg: 0.15,
            plasma_to_tissue_rate: 0.6,
            elimination_rate: 0.35,
            tissue_elimination_rate: 0.4,
            renal_fraction: 0.1,
            potency: 0.5,
            ec50: 10.0,
        },
    ),
    (
        "propranolol",
        MechanismClass::BetaBlocker,
        DrugKinetics {
            absorption_rate: 1.0,
            bioavailability: 0.3,
            volume_per_kg: 4.0,
            plasma_to_tissue_rate: 0.7,
            elimination_rate: 0.2,
            tissue_elimination_rate: 0.25,
            renal_fraction: 0.05,
            potency: 0.35,
            ec50: 0.05,
        },
    ),
    (
        "amlodipine",
        MechanismClass::Vasodilator,
        DrugKinetics {
            absorption_rate: 0.12,
            bioavailability: 0.65,
            volume_per_kg: 21.0,
            plasma_to_tissue_rate: 0.3,
            elimination_rate: 0.018,
            tissue_elimination_rate: 0.02,
            renal_fraction: 0.1,
            potency: 0.25,
            ec50: 0.005,
        },
    ),
];

pub fn preset_names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(name, _, _)| *name)
}

pub fn kinetics(name: &str) -> Option<DrugKinetics> {
    PRESETS
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, _, kinetics)| kinetics.clone())
}

pub fn mechanism(name: &str) -> Option<MechanismClass> {
    PRESETS
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, class, _)| *class)
}

/// Builds a preset drug by name.
pub fn preset(name: &str) -> Option<Arc<DrugModel>> {
    let (preset_name, class, kinetics) = PRESETS
        .iter()
        .find(|(n, _, _)| n.eq_ignore_ascii_case(name))?;
    DrugModel::new(*preset_name, *class, kinetics.clone()).ok()
}
