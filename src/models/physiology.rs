//! Coupled glucose–insulin, PK, immune/inflammatory and cardiovascular equations.
//!
//! The integrated vector is laid out as the six physiological quantities
//! followed by one (plasma, tissue) concentration pair per drug:
//!
//! `[G, I, M, X, HR, BP, Cp_0, Ct_0, Cp_1, Ct_1, ...]`
//!
//! Every set point of the profile is an equilibrium of the undosed, unfed system.

use super::State;
use crate::drugs::{interactions_affecting, DrugModel, Effect, MechanismClass};
use crate::error::{invalid, TwinResult};
use crate::patient::{PatientProfile, BASELINE_IMMUNE_CELLS};
use std::sync::Arc;

const GLUCOSE: usize = 0;
const INSULIN: usize = 1;
const IMMUNE: usize = 2;
const INFLAMMATION: usize = 3;
const HEART_RATE: usize = 4;
const BLOOD_PRESSURE: usize = 5;
const DRUG_OFFSET: usize = 6;

// Glucose–insulin
const GLUCOSE_EFFECTIVENESS: f64 = 0.6; // 1/h, insulin-independent disposal
const INSULIN_ACTION: f64 = 0.12; // 1/h per mU/L at unit sensitivity
const GLUCOSE_VOLUME_PER_KG: f64 = 2.0; // dL/kg
const MEAL_BIOAVAILABILITY: f64 = 0.8;
const SECRETION_HALF_MAX_RATIO: f64 = 1.5; // G50 / baseline glucose
const HYPOGLYCAEMIA_THRESHOLD: f64 = 70.0; // mg/dL

// Immune / inflammation
const IMMUNE_TURNOVER: f64 = 0.15;
const IMMUNE_ACTIVATION: f64 = 0.05; // per unit inflammation, scaled by immune response
const INFLAMMATION_DECAY: f64 = 0.3;
const GLYCAEMIC_INFLAMMATION: f64 = 0.5;
const IMMUNE_SUPPRESSION: f64 = 0.3;
const INFLAMMATION_SUPPRESSION: f64 = 0.6;

// Cardiovascular
const HEART_RATE_RECOVERY: f64 = 3.0;
const HEART_RATE_PER_INFLAMMATION: f64 = 0.5; // bpm per unit
const HEART_RATE_PER_HYPOGLYCAEMIA: f64 = 0.5; // bpm per mg/dL below threshold
const BLOOD_PRESSURE_RECOVERY: f64 = 1.2;
const BLOOD_PRESSURE_HEART_RATE_EXPONENT: f64 = 0.3;
const BLOOD_PRESSURE_PER_INFLAMMATION: f64 = 0.4; // mmHg per unit

/// A dose that has started absorbing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveDose {
    /// Index of the drug in the model's drug list.
    pub slot: usize,
    pub amount: f64,
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveMeal {
    pub carbs: f64,
    pub time: f64,
}

/// External forcing in effect over one integration sub-interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveInputs {
    pub doses: Vec<ActiveDose>,
    pub meals: Vec<ActiveMeal>,
}

impl ActiveInputs {
    pub fn is_empty(&self) -> bool {
        self.doses.is_empty() && self.meals.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Coefficients {
    baseline_glucose: f64,
    insulin_sensitivity: f64,
    hepatic_production: f64,
    glucose_volume: f64,
    meal_absorption: f64,
    secretion_max: f64,
    secretion_half_max: f64,
    insulin_clearance: f64,
    baseline_inflammation: f64,
    immune_activation: f64,
    baseline_heart_rate: f64,
    baseline_blood_pressure: f64,
}

impl Coefficients {
    fn from_profile(profile: &PatientProfile) -> Self {
        let p = profile.parameters();
        let insulin_sensitivity = INSULIN_ACTION * p.insulin_sensitivity;
        let secretion_half_max = SECRETION_HALF_MAX_RATIO * p.baseline_glucose;

        Self {
            baseline_glucose: p.baseline_glucose,
            insulin_sensitivity,
            hepatic_production: (GLUCOSE_EFFECTIVENESS + insulin_sensitivity * p.baseline_insulin)
                * p.baseline_glucose,
            glucose_volume: GLUCOSE_VOLUME_PER_KG * p.weight,
            meal_absorption: p.meal_absorption_rate,
            secretion_max: p.insulin_clearance * p.baseline_insulin
                / hill(p.baseline_glucose, secretion_half_max),
            secretion_half_max,
            insulin_clearance: p.insulin_clearance,
            baseline_inflammation: p.baseline_inflammation,
            immune_activation: IMMUNE_ACTIVATION * p.immune_response,
            baseline_heart_rate: p.baseline_heart_rate,
            baseline_blood_pressure: p.baseline_blood_pressure,
        }
    }
}

#[derive(Debug, Clone)]
struct DrugSlot {
    drug: Arc<DrugModel>,
    volume: f64,
    absorption_rate: f64,
    bioavailability: f64,
    plasma_loss: f64,
    plasma_to_tissue: f64,
    tissue_elimination: f64,
}

fn hill(glucose: f64, half_max: f64) -> f64 {
    let g2 = glucose.max(0.0).powi(2);
    g2 / (half_max * half_max + g2)
}

/// Right-hand side of the patient ODE system, fixed for one profile and drug set.
#[derive(Debug, Clone)]
pub struct PhysiologyModel {
    coefficients: Coefficients,
    slots: Vec<DrugSlot>,
}

impl PhysiologyModel {
    pub fn new(profile: &PatientProfile, drugs: &[Arc<DrugModel>]) -> Self {
        let slots = drugs
            .iter()
            .map(|drug| {
                let k = drug.kinetics();
                let elimination = drug.effective_elimination_rate(
                    profile.renal_function(),
                    profile.liver_function(),
                );
                DrugSlot {
                    drug: Arc::clone(drug),
                    volume: k.volume_per_kg * profile.weight(),
                    absorption_rate: k.absorption_rate,
                    bioavailability: k.bioavailability,
                    plasma_loss: elimination + k.plasma_to_tissue_rate,
                    plasma_to_tissue: k.plasma_to_tissue_rate,
                    tissue_elimination: k.tissue_elimination_rate,
                }
            })
            .collect();

        Self {
            coefficients: Coefficients::from_profile(profile),
            slots,
        }
    }

    /// Length of the integrated vector.
    pub fn dimension(&self) -> usize {
        DRUG_OFFSET + 2 * self.slots.len()
    }

    pub fn drugs(&self) -> impl Iterator<Item = &Arc<DrugModel>> {
        self.slots.iter().map(|s| &s.drug)
    }

    /// `(plasma, tissue)` concentrations of drug `slot` in `y`.
    pub fn drug_levels(&self, y: &[f64], slot: usize) -> (f64, f64) {
        (y[DRUG_OFFSET + 2 * slot], y[DRUG_OFFSET + 2 * slot + 1])
    }

    /// Builds the integrated vector from an eight-component state.
    ///
    /// Non-zero drug levels can only be attributed when exactly one drug is modelled.
    pub fn expand(&self, state: &State) -> TwinResult<Vec<f64>> {
        if !state.is_finite() {
            return invalid(format!("Initial state must be finite: {}", state));
        }
        if state.as_array().iter().any(|v| *v < 0.0) {
            return invalid(format!("Initial state must be non-negative: {}", state));
        }
        if state.glucose <= 0.0 || state.heart_rate <= 0.0 || state.blood_pressure <= 0.0 {
            return invalid("Initial glucose, heart rate and blood pressure must be positive");
        }

        let mut y = vec![0.0; self.dimension()];
        y[GLUCOSE] = state.glucose;
        y[INSULIN] = state.insulin;
        y[IMMUNE] = state.immune_cells;
        y[INFLAMMATION] = state.inflammation;
        y[HEART_RATE] = state.heart_rate;
        y[BLOOD_PRESSURE] = state.blood_pressure;

        let has_drug = state.drug_plasma > 0.0 || state.drug_tissue > 0.0;
        match (has_drug, self.slots.len()) {
            (false, _) => {}
            (true, 1) => {
                y[DRUG_OFFSET] = state.drug_plasma;
                y[DRUG_OFFSET + 1] = state.drug_tissue;
            }
            (true, n) => {
                return invalid(format!(
                    "Initial drug levels need exactly one scheduled drug to attach to, found {}",
                    n
                ));
            }
        }

        Ok(y)
    }

    /// Collapses the integrated vector to the eight named components.
    pub fn aggregate(&self, y: &[f64]) -> State {
        let (plasma, tissue) = (0..self.slots.len())
            .map(|slot| self.drug_levels(y, slot))
            .fold((0.0, 0.0), |(p, t), (dp, dt)| (p + dp, t + dt));

        State {
            glucose: y[GLUCOSE],
            insulin: y[INSULIN],
            drug_plasma: plasma,
            drug_tissue: tissue,
            immune_cells: y[IMMUNE],
            inflammation: y[INFLAMMATION],
            heart_rate: y[HEART_RATE],
            blood_pressure: y[BLOOD_PRESSURE],
        }
    }

    /// Receptor occupancy per mechanism class, combined over drugs of that class.
    pub fn class_occupancy(&self, y: &[f64]) -> [f64; 4] {
        let mut free = [1.0; 4];
        for (slot, s) in self.slots.iter().enumerate() {
            let (_, tissue) = self.drug_levels(y, slot);
            free[class_index(s.drug.mechanism())] *= 1.0 - s.drug.occupancy(tissue);
        }
        free.map(|f| 1.0 - f)
    }

    /// Combined fractional effect on every target, interactions included.
    fn effects(&self, y: &[f64]) -> [f64; 6] {
        let occupancy = self.class_occupancy(y);
        let mut unaffected = [1.0; 6];

        for (slot, s) in self.slots.iter().enumerate() {
            let (_, tissue) = self.drug_levels(y, slot);
            let class = s.drug.mechanism();
            let modulation: f64 = interactions_affecting(class)
                .map(|i| i.scale(occupancy[class_index(i.modulator)]))
                .product();
            let effect = s.drug.effect(tissue) * modulation;

            for target in class.effects() {
                unaffected[*target as usize] *= 1.0 - effect;
            }
        }

        unaffected.map(|u| 1.0 - u)
    }

    /// Evaluates `dy/dt` at `(t, y)` under `inputs`.
    pub fn rhs(&self, t: f64, y: &[f64], inputs: &ActiveInputs, dydt: &mut [f64]) {
        let c = &self.coefficients;
        let effects = self.effects(y);
        let effect = |target: Effect| effects[target as usize];

        let glucose = y[GLUCOSE];
        let insulin = y[INSULIN];
        let immune = y[IMMUNE];
        let inflammation = y[INFLAMMATION];
        let heart_rate = y[HEART_RATE];
        let blood_pressure = y[BLOOD_PRESSURE];

        // Gamma-shaped appearance of ingested glucose, mg/dL/h.
        let k_meal = c.meal_absorption;
        let meal_appearance: f64 = inputs
            .meals
            .iter()
            .filter(|m| t >= m.time)
            .map(|m| {
                let tau = t - m.time;
                let grams = MEAL_BIOAVAILABILITY * m.carbs;
                grams * 1000.0 * k_meal * k_meal * tau * (-k_meal * tau).exp()
            })
            .sum::<f64>()
            / c.glucose_volume;

        let production = c.hepatic_production * (1.0 - effect(Effect::HepaticGlucose));
        dydt[GLUCOSE] = production + meal_appearance
            - (GLUCOSE_EFFECTIVENESS + c.insulin_sensitivity * insulin) * glucose;

        dydt[INSULIN] = c.secretion_max
            * hill(glucose, c.secretion_half_max)
            * (1.0 + effect(Effect::InsulinSecretion))
            - c.insulin_clearance * insulin;

        for (slot, s) in self.slots.iter().enumerate() {
            let absorption: f64 = inputs
                .doses
                .iter()
                .filter(|d| d.slot == slot && t >= d.time)
                .map(|d| d.amount * s.absorption_rate * (-s.absorption_rate * (t - d.time)).exp())
                .sum::<f64>()
                * s.bioavailability
                / s.volume;
            let (plasma, tissue) = self.drug_levels(y, slot);

            dydt[DRUG_OFFSET + 2 * slot] = absorption - s.plasma_loss * plasma;
            dydt[DRUG_OFFSET + 2 * slot + 1] =
                s.plasma_to_tissue * plasma - s.tissue_elimination * tissue;
        }

        let x_b = c.baseline_inflammation;
        let excess_inflammation = (inflammation - x_b).max(0.0);

        dydt[IMMUNE] = IMMUNE_TURNOVER * (BASELINE_IMMUNE_CELLS - immune)
            + c.immune_activation * (inflammation - x_b)
            - IMMUNE_SUPPRESSION * effect(Effect::ImmuneSuppression) * immune;

        dydt[INFLAMMATION] = INFLAMMATION_DECAY * x_b * immune / BASELINE_IMMUNE_CELLS
            + GLYCAEMIC_INFLAMMATION * x_b * (glucose - c.baseline_glucose).max(0.0)
                / c.baseline_glucose
            - INFLAMMATION_DECAY * inflammation
            - INFLAMMATION_SUPPRESSION * effect(Effect::InflammationSuppression) * inflammation;

        let heart_rate_target = c.baseline_heart_rate * (1.0 - effect(Effect::HeartRate))
            + HEART_RATE_PER_INFLAMMATION * excess_inflammation
            + HEART_RATE_PER_HYPOGLYCAEMIA * (HYPOGLYCAEMIA_THRESHOLD - glucose).max(0.0);
        dydt[HEART_RATE] = HEART_RATE_RECOVERY * (heart_rate_target - heart_rate);

        let relative_heart_rate = heart_rate.max(1.0) / c.baseline_heart_rate;
        let blood_pressure_target = c.baseline_blood_pressure
            * (1.0 - effect(Effect::BloodPressure))
            * relative_heart_rate.powf(BLOOD_PRESSURE_HEART_RATE_EXPONENT)
            + BLOOD_PRESSURE_PER_INFLAMMATION * excess_inflammation;
        dydt[BLOOD_PRESSURE] = BLOOD_PRESSURE_RECOVERY * (blood_pressure_target - blood_pressure);
    }

    /// Eight-component derivative: drug derivatives are summed over drugs.
    pub fn derivative(&self, t: f64, y: &[f64], inputs: &ActiveInputs) -> State {
        let mut dydt = vec![0.0; self.dimension()];
        self.rhs(t, y, inputs, &mut dydt);
        self.aggregate(&dydt)
    }
}

fn class_index(class: MechanismClass) -> usize {
    match class {
        MechanismClass::Antidiabetic => 0,
        MechanismClass::AntiInflammatory => 1,
        MechanismClass::BetaBlocker => 2,
        MechanismClass::Vasodilator => 3,
    }
}

/// Occupancy of `class` from a [`PhysiologyModel::class_occupancy`] result.
pub fn occupancy_of(occupancy: &[f64; 4], class: MechanismClass) -> f64 {
    occupancy[class_index(class)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drugs::preset;
    use crate::patient::Archetype;
    use approx::assert_abs_diff_eq;

    fn at_rest(profile: &PatientProfile, drugs: &[Arc<DrugModel>]) -> (PhysiologyModel, Vec<f64>) {
        let model = PhysiologyModel::new(profile, drugs);
        let y = model.expand(&profile.baseline_state()).unwrap();
        (model, y)
    }

    #[test]
    fn test_baseline_is_equilibrium_for_every_archetype() {
        for archetype in Archetype::ALL {
            let profile = PatientProfile::from_archetype(archetype);
            let (model, y) = at_rest(&profile, &[]);
            let d = model.derivative(0.0, &y, &ActiveInputs::default());
            for value in d.as_array() {
                assert_abs_diff_eq!(value, 0.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_meal_raises_glucose_derivative() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let (model, y) = at_rest(&profile, &[]);
        let inputs = ActiveInputs {
            doses: vec![],
            meals: vec![ActiveMeal { carbs: 50.0, time: 0.0 }],
        };
        assert!(model.derivative(0.5, &y, &inputs).glucose > 0.0);
        // Not yet started at t=0.
        assert_abs_diff_eq!(model.derivative(0.0, &y, &inputs).glucose, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dose_feeds_plasma_only_initially() {
        let profile = PatientProfile::from_archetype(Archetype::Diabetic);
        let metformin = preset("metformin").unwrap();
        let (model, y) = at_rest(&profile, &[metformin]);
        let inputs = ActiveInputs {
            doses: vec![ActiveDose { slot: 0, amount: 500.0, time: 0.0 }],
            meals: vec![],
        };
        let d = model.derivative(0.0, &y, &inputs);
        assert!(d.drug_plasma > 0.0);
        assert_abs_diff_eq!(d.drug_tissue, 0.0);
        assert_abs_diff_eq!(d.glucose, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mechanism_routes_tissue_concentration() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let propranolol = preset("propranolol").unwrap();
        let (model, mut y) = at_rest(&profile, &[propranolol]);
        y[DRUG_OFFSET + 1] = 0.1;

        let d = model.derivative(0.0, &y, &ActiveInputs::default());
        assert!(d.heart_rate < 0.0);
        assert_abs_diff_eq!(d.glucose, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.insulin, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(d.inflammation, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_antidiabetic_lowers_glucose_and_raises_insulin() {
        let profile = PatientProfile::from_archetype(Archetype::Diabetic);
        let metformin = preset("metformin").unwrap();
        let (model, mut y) = at_rest(&profile, &[metformin]);
        y[DRUG_OFFSET + 1] = 1.0;

        let d = model.derivative(0.0, &y, &ActiveInputs::default());
        assert!(d.glucose < 0.0);
        assert!(d.insulin > 0.0);
        assert_abs_diff_eq!(d.heart_rate, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_anti_inflammatory_attenuates_antidiabetic_effect() {
        let profile = PatientProfile::from_archetype(Archetype::Diabetic);
        let metformin = preset("metformin").unwrap();
        let ibuprofen = preset("ibuprofen").unwrap();

        let (alone, mut y_alone) = at_rest(&profile, &[Arc::clone(&metformin)]);
        y_alone[DRUG_OFFSET + 1] = 1.0;
        let (combined, mut y_combined) = at_rest(&profile, &[metformin, ibuprofen]);
        y_combined[DRUG_OFFSET + 1] = 1.0;
        y_combined[DRUG_OFFSET + 3] = 20.0;

        let inputs = ActiveInputs::default();
        let g_alone = alone.derivative(0.0, &y_alone, &inputs).glucose;
        let g_combined = combined.derivative(0.0, &y_combined, &inputs).glucose;
        assert!(g_alone < g_combined);
        assert!(g_combined < 0.0);
    }

    #[test]
    fn test_expand_rejects_ambiguous_drug_levels() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let drugs = [preset("metformin").unwrap(), preset("ibuprofen").unwrap()];
        let model = PhysiologyModel::new(&profile, &drugs);
        let mut state = profile.baseline_state();
        state.drug_plasma = 1.0;
        assert!(model.expand(&state).is_err());

        let single = PhysiologyModel::new(&profile, &drugs[..1]);
        let y = single.expand(&state).unwrap();
        assert_eq!(single.drug_levels(&y, 0), (1.0, 0.0));
    }

    #[test]
    fn test_aggregate_sums_drug_levels() {
        let profile = PatientProfile::from_archetype(Archetype::Standard);
        let drugs = [preset("metformin").unwrap(), preset("ibuprofen").unwrap()];
        let model = PhysiologyModel::new(&profile, &drugs);
        let mut y = model.expand(&profile.baseline_state()).unwrap();
        y[DRUG_OFFSET] = 1.0;
        y[DRUG_OFFSET + 2] = 2.5;
        y[DRUG_OFFSET + 3] = 4.0;
        let state = model.aggregate(&y);
        assert_abs_diff_eq!(state.drug_plasma, 3.5);
        assert_abs_diff_eq!(state.drug_tissue, 4.0);
    }
}
