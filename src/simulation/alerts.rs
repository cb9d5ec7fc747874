//! Out-of-band excursions of monitored state components.

use super::Trajectory;
use crate::error::{invalid, TwinResult};
use crate::models::StateComponent;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Low,
    High,
}

/// Normal band of one component; values strictly outside it raise an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub component: StateComponent,
    pub low: f64,
    pub high: f64,
}

impl AlertThreshold {
    pub fn check(&self, value: f64) -> Option<(AlertKind, f64)> {
        if value < self.low {
            Some((AlertKind::Low, self.low))
        } else if value > self.high {
            Some((AlertKind::High, self.high))
        } else {
            None
        }
    }
}

/// Monitored components and their bands. Components without a band never alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertThresholds {
    bands: Vec<AlertThreshold>,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        let band = |component, low, high| AlertThreshold {
            component,
            low,
            high,
        };
        Self {
            bands: vec![
                band(StateComponent::Glucose, 70.0, 180.0),
                band(StateComponent::Insulin, 5.0, 30.0),
                band(StateComponent::HeartRate, 50.0, 100.0),
                band(StateComponent::BloodPressure, 90.0, 140.0),
                band(StateComponent::Inflammation, 0.0, 15.0),
                band(StateComponent::DrugPlasma, 0.0, 15.0),
            ],
        }
    }
}

impl AlertThresholds {
    pub fn new(bands: Vec<AlertThreshold>) -> TwinResult<Self> {
        let thresholds = Self { bands };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> TwinResult<()> {
        for (i, band) in self.bands.iter().enumerate() {
            if !band.low.is_finite() || !band.high.is_finite() || band.low > band.high {
                return invalid(format!(
                    "Alert band for {} must be finite with low <= high, got [{}, {}]",
                    band.component.name(),
                    band.low,
                    band.high
                ));
            }
            if self.bands[..i].iter().any(|b| b.component == band.component) {
                return invalid(format!("Duplicate alert band for {}", band.component.name()));
            }
        }
        Ok(())
    }

    /// Replaces the band of `component`, or starts monitoring it.
    pub fn with_band(mut self, component: StateComponent, low: f64, high: f64) -> TwinResult<Self> {
        let band = AlertThreshold {
            component,
            low,
            high,
        };
        match self.bands.iter_mut().find(|b| b.component == component) {
            Some(existing) => *existing = band,
            None => self.bands.push(band),
        }
        self.validate()?;
        Ok(self)
    }

    pub fn bands(&self) -> &[AlertThreshold] {
        &self.bands
    }

    pub fn band(&self, component: StateComponent) -> Option<&AlertThreshold> {
        self.bands.iter().find(|b| b.component == component)
    }

    /// Every excursion in `trajectory`, ordered by onset.
    pub fn scan(&self, trajectory: &Trajectory) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for band in &self.bands {
            let mut open: Option<Alert> = None;
            for sample in trajectory.samples() {
                let value = sample.state.get(band.component);
                match (band.check(value), open.as_mut()) {
                    (Some((kind, _)), Some(alert)) if alert.kind == kind => {
                        alert.until = sample.time;
                        let worse = match kind {
                            AlertKind::Low => value < alert.value,
                            AlertKind::High => value > alert.value,
                        };
                        if worse {
                            alert.value = value;
                        }
                    }
                    (Some((kind, threshold)), _) => {
                        alerts.extend(open.take());
                        open = Some(Alert {
                            component: band.component,
                            kind,
                            threshold,
                            time: sample.time,
                            until: sample.time,
                            value,
                        });
                    }
                    (None, _) => alerts.extend(open.take()),
                }
            }
            alerts.extend(open);
        }
        alerts.sort_by(|a, b| a.time.total_cmp(&b.time));
        alerts
    }
}

/// One contiguous run of samples outside a band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub component: StateComponent,
    pub kind: AlertKind,
    pub threshold: f64,
    /// First sample outside the band.
    pub time: f64,
    /// Last consecutive sample outside the band.
    pub until: f64,
    /// Most extreme value of the excursion.
    pub value: f64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = self.component.unit();
        write!(
            f,
            "{} {}: {:.1} {} (threshold {} {}) from t={:.2} h to t={:.2} h",
            self.component.name(),
            match self.kind {
                AlertKind::Low => "low",
                AlertKind::High => "high",
            },
            self.value,
            unit,
            self.threshold,
            unit,
            self.time,
            self.until
        )
    }
}
