use super::{Archetype, PhysiologicalParameters, Sex};

/// Preset physiology per archetype, indexed by `Archetype as usize`.
pub(crate) const ARCHETYPE_TABLE: [PhysiologicalParameters; 5] = [
    // Standard: healthy adult
    PhysiologicalParameters {
        age: 35.0,
        weight: 70.0,
        sex: Sex::Male,
        baseline_glucose: 100.0,
        baseline_insulin: 10.0,
        insulin_sensitivity: 0.8,
        meal_absorption_rate: 2.0,
        insulin_clearance: 3.0,
        renal_function: 1.0,
        liver_function: 1.0,
        immune_response: 1.0,
        baseline_inflammation: 5.0,
        baseline_heart_rate: 70.0,
        baseline_blood_pressure: 120.0,
    },
    // Diabetic: type 2, reduced insulin sensitivity, compensatory hyperinsulinaemia
    PhysiologicalParameters {
        age: 55.0,
        weight: 85.0,
        sex: Sex::Male,
        baseline_glucose: 180.0,
        baseline_insulin: 15.0,
        insulin_sensitivity: 0.3,
        meal_absorption_rate: 2.5,
        insulin_clearance: 3.0,
        renal_function: 0.8,
        liver_function: 0.9,
        immune_response: 0.8,
        baseline_inflammation: 12.0,
        baseline_heart_rate: 75.0,
        baseline_blood_pressure: 140.0,
    },
    // Elderly: slower absorption and clearance, reduced organ reserve
    PhysiologicalParameters {
        age: 78.0,
        weight: 65.0,
        sex: Sex::Female,
        baseline_glucose: 130.0,
        baseline_insulin: 12.0,
        insulin_sensitivity: 0.6,
        meal_absorption_rate: 1.5,
        insulin_clearance: 2.4,
        renal_function: 0.6,
        liver_function: 0.7,
        immune_response: 0.6,
        baseline_inflammation: 10.0,
        baseline_heart_rate: 80.0,
        baseline_blood_pressure: 150.0,
    },
    // Renal: severely reduced renal function
    PhysiologicalParameters {
        age: 60.0,
        weight: 75.0,
        sex: Sex::Male,
        baseline_glucose: 120.0,
        baseline_insulin: 12.0,
        insulin_sensitivity: 0.5,
        meal_absorption_rate: 2.0,
        insulin_clearance: 4.5,
        renal_function: 0.3,
        liver_function: 0.8,
        immune_response: 0.7,
        baseline_inflammation: 12.0,
        baseline_heart_rate: 85.0,
        baseline_blood_pressure: 160.0,
    },
    // Inflammatory: chronic inflammatory disease
    PhysiologicalParameters {
        age: 45.0,
        weight: 68.0,
        sex: Sex::Female,
        baseline_glucose: 110.0,
        baseline_insulin: 11.0,
        insulin_sensitivity: 0.6,
        meal_absorption_rate: 2.0,
        insulin_clearance: 3.0,
        renal_function: 0.9,
        liver_function: 0.8,
        immune_response: 1.2,
        baseline_inflammation: 25.0,
        baseline_heart_rate: 78.0,
        baseline_blood_pressure: 125.0,
    },
];

/// Inclusive validity range of every scalar parameter.
pub(crate) const PARAMETER_RANGES: [(&str, f64, f64); 13] = [
    ("age", 1.0, 120.0),
    ("weight", 20.0, 250.0),
    ("baseline_glucose", 60.0, 400.0),
    ("baseline_insulin", 2.0, 60.0),
    ("insulin_sensitivity", 0.05, 2.0),
    ("meal_absorption_rate", 0.5, 6.0),
    ("insulin_clearance", 0.5, 10.0),
    ("renal_function", 0.05, 1.5),
    ("liver_function", 0.05, 1.5),
    ("immune_response", 0.1, 2.0),
    ("baseline_inflammation", 0.5, 60.0),
    ("baseline_heart_rate", 40.0, 150.0),
    ("baseline_blood_pressure", 80.0, 220.0),
];

pub(crate) fn parameters_for(archetype: Archetype) -> PhysiologicalParameters {
    ARCHETYPE_TABLE[archetype as usize].clone()
}

pub(crate) fn range_of(name: &str) -> Option<(f64, f64)> {
    PARAMETER_RANGES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, min, max)| (min, max))
}
