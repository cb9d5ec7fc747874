use super::MechanismClass;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
}

/// Pairwise interaction: the effect of `affected` is scaled by `multiplier`
/// in proportion to the receptor occupancy of `modulator`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrugInteraction {
    pub affected: MechanismClass,
    pub modulator: MechanismClass,
    pub multiplier: f64,
    pub severity: Severity,
    pub description: &'static str,
    pub recommendation: &'static str,
}

impl DrugInteraction {
    /// Effect scale for the given modulator occupancy in [0, 1).
    pub fn scale(&self, modulator_occupancy: f64) -> f64 {
        1.0 + (self.multiplier - 1.0) * modulator_occupancy
    }
}

pub static INTERACTION_TABLE: [DrugInteraction; 3] = [
    DrugInteraction {
        affected: MechanismClass::Antidiabetic,
        modulator: MechanismClass::BetaBlocker,
        multiplier: 1.2,
        severity: Severity::Moderate,
        description: "Beta-blockers can mask the symptoms of hypoglycaemia",
        recommendation: "Monitor blood glucose closely",
    },
    DrugInteraction {
        affected: MechanismClass::Antidiabetic,
        modulator: MechanismClass::AntiInflammatory,
        multiplier: 0.8,
        severity: Severity::Low,
        description: "Anti-inflammatories can reduce antidiabetic efficacy",
        recommendation: "Adjust the antidiabetic dose if needed",
    },
    DrugInteraction {
        affected: MechanismClass::Vasodilator,
        modulator: MechanismClass::BetaBlocker,
        multiplier: 1.2,
        severity: Severity::High,
        description: "Combination can cause excessive hypotension",
        recommendation: "Avoid the combination or reduce doses",
    },
];

pub fn interactions_affecting(
    class: MechanismClass,
) -> impl Iterator<Item = &'static DrugInteraction> {
    INTERACTION_TABLE.iter().filter(move |i| i.affected == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_is_neutral_without_modulator() {
        for interaction in &INTERACTION_TABLE {
            assert_relative_eq!(interaction.scale(0.0), 1.0);
        }
    }

    #[test]
    fn test_scale_approaches_multiplier_at_full_occupancy() {
        let attenuation = interactions_affecting(MechanismClass::Antidiabetic)
            .find(|i| i.modulator == MechanismClass::AntiInflammatory)
            .unwrap();
        assert_relative_eq!(attenuation.scale(1.0), 0.8);
        assert_relative_eq!(attenuation.scale(0.5), 0.9);
    }

    #[test]
    fn test_no_interactions_target_anti_inflammatories() {
        assert_eq!(interactions_affecting(MechanismClass::AntiInflammatory).count(), 0);
        assert_eq!(interactions_affecting(MechanismClass::Antidiabetic).count(), 2);
    }
}
