use crate::drugs::DrugModel;
use crate::error::{invalid, TwinResult};
use std::fmt;
use std::sync::Arc;

/// Oral dose of a drug, mg at time h.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseEvent {
    pub drug: Arc<DrugModel>,
    pub amount: f64,
    pub time: f64,
}

/// Carbohydrate intake, grams at time h.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MealEvent {
    pub carbs: f64,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledEvent {
    Dose(DoseEvent),
    Meal(MealEvent),
}

impl ScheduledEvent {
    pub fn time(&self) -> f64 {
        match self {
            ScheduledEvent::Dose(dose) => dose.time,
            ScheduledEvent::Meal(meal) => meal.time,
        }
    }

    fn validate(&self) -> TwinResult<()> {
        let (quantity, what) = match self {
            ScheduledEvent::Dose(dose) => (dose.amount, "dose amount"),
            ScheduledEvent::Meal(meal) => (meal.carbs, "meal carbohydrates"),
        };
        if !self.time().is_finite() {
            return invalid(format!("Event time must be finite: {}", self));
        }
        if !quantity.is_finite() || quantity <= 0.0 {
            return invalid(format!("{} must be positive: {}", what, self));
        }
        Ok(())
    }
}

impl fmt::Display for ScheduledEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledEvent::Dose(dose) => {
                write!(f, "{} mg {} at t={} h", dose.amount, dose.drug.name(), dose.time)
            }
            ScheduledEvent::Meal(meal) => write!(f, "{} g meal at t={} h", meal.carbs, meal.time),
        }
    }
}

/// Time-ordered doses and meals. Events at equal times keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSchedule {
    events: Vec<ScheduledEvent>,
}

impl EventSchedule {
    pub fn new(mut events: Vec<ScheduledEvent>) -> TwinResult<Self> {
        for event in &events {
            event.validate()?;
        }
        events.sort_by(|a, b| a.time().total_cmp(&b.time()));
        Ok(Self { events })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> ScheduleBuilder {
        ScheduleBuilder::default()
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn doses(&self) -> impl Iterator<Item = &DoseEvent> {
        self.events.iter().filter_map(|e| match e {
            ScheduledEvent::Dose(dose) => Some(dose),
            ScheduledEvent::Meal(_) => None,
        })
    }

    pub fn meals(&self) -> impl Iterator<Item = &MealEvent> {
        self.events.iter().filter_map(|e| match e {
            ScheduledEvent::Meal(meal) => Some(meal),
            ScheduledEvent::Dose(_) => None,
        })
    }

    /// Distinct drugs in first-reference order.
    ///
    /// Two different definitions under one name are rejected.
    pub fn drugs(&self) -> TwinResult<Vec<Arc<DrugModel>>> {
        let mut drugs: Vec<Arc<DrugModel>> = Vec::new();
        for dose in self.doses() {
            match drugs.iter().find(|d| d.name() == dose.drug.name()) {
                Some(known) if Arc::ptr_eq(known, &dose.drug) || **known == *dose.drug => {}
                Some(_) => {
                    return invalid(format!(
                        "Two different drug definitions share the name '{}'",
                        dose.drug.name()
                    ));
                }
                None => drugs.push(Arc::clone(&dose.drug)),
            }
        }
        Ok(drugs)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleBuilder {
    events: Vec<ScheduledEvent>,
}

impl ScheduleBuilder {
    pub fn dose(mut self, drug: Arc<DrugModel>, amount: f64, time: f64) -> Self {
        self.events.push(ScheduledEvent::Dose(DoseEvent { drug, amount, time }));
        self
    }

    /// The same dose at each of `times`.
    pub fn doses_at(mut self, drug: &Arc<DrugModel>, amount: f64, times: &[f64]) -> Self {
        for &time in times {
            self = self.dose(Arc::clone(drug), amount, time);
        }
        self
    }

    pub fn meal(mut self, carbs: f64, time: f64) -> Self {
        self.events.push(ScheduledEvent::Meal(MealEvent { carbs, time }));
        self
    }

    pub fn build(self) -> TwinResult<EventSchedule> {
        EventSchedule::new(self.events)
    }
}
