use std::fmt;

use serde::{Deserialize, Serialize};

use super::{STANDARD_GRAVITY, SignalError};

/// Physical quantity of a waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    Acceleration,
    Velocity,
    Displacement,
}

impl Quantity {
    pub fn name(self) -> &'static str {
        match self {
            Quantity::Acceleration => "acceleration",
            Quantity::Velocity => "velocity",
            Quantity::Displacement => "displacement",
        }
    }
}

/// Units the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Acceleration in multiples of standard gravity.
    G,
    MetersPerSecondSquared,
    MillimetersPerSecond,
    Millimeters,
    Micrometers,
}

impl Unit {
    pub fn quantity(self) -> Quantity {
        match self {
            Unit::G | Unit::MetersPerSecondSquared => Quantity::Acceleration,
            Unit::MillimetersPerSecond => Quantity::Velocity,
            Unit::Millimeters | Unit::Micrometers => Quantity::Displacement,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::G => "g",
            Unit::MetersPerSecondSquared => "m/s²",
            Unit::MillimetersPerSecond => "mm/s",
            Unit::Millimeters => "mm",
            Unit::Micrometers => "µm",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One time-value point; `time` in seconds from the first sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

/// A time-sampled physical quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub samples: Vec<Sample>,

    /// Samples per second.
    pub sample_rate: f64,

    pub unit: Unit,
    pub label: String,
}

impl Waveform {
    /// Builds an evenly spaced waveform starting at t = 0.
    pub fn from_values(values: &[f64], sample_rate: f64, unit: Unit, label: impl Into<String>) -> Self {
        let dt = if sample_rate > 0.0 { 1.0 / sample_rate } else { 0.0 };
        Self {
            samples: values
                .iter()
                .enumerate()
                .map(|(i, &value)| Sample {
                    time: i as f64 * dt,
                    value,
                })
                .collect(),
            sample_rate,
            unit,
            label: label.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn duration(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(a), Some(b)) => b.time - a.time,
            _ => 0.0,
        }
    }

    /// Root mean square of the sample values.
    pub fn rms(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let sum: f64 = self.values().map(|v| v * v).sum();
        Some((sum / self.len() as f64).sqrt())
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> Option<f64> {
        self.values().map(f64::abs).reduce(f64::max)
    }

    /// Same timing, new values, unit and label.
    pub(crate) fn derive(&self, values: Vec<f64>, unit: Unit, label: String) -> Waveform {
        Waveform {
            samples: self
                .samples
                .iter()
                .zip(values)
                .map(|(s, value)| Sample { time: s.time, value })
                .collect(),
            sample_rate: self.sample_rate,
            unit,
            label,
        }
    }
}

pub fn g_to_ms2(g: f64) -> f64 {
    g * STANDARD_GRAVITY
}

pub fn ms2_to_g(ms2: f64) -> f64 {
    ms2 / STANDARD_GRAVITY
}

/// Converts between units of the same quantity.
pub fn convert(waveform: &Waveform, to: Unit) -> Result<Waveform, SignalError> {
    let factor = match (waveform.unit, to) {
        (a, b) if a == b => 1.0,
        (Unit::G, Unit::MetersPerSecondSquared) => STANDARD_GRAVITY,
        (Unit::MetersPerSecondSquared, Unit::G) => 1.0 / STANDARD_GRAVITY,
        (Unit::Millimeters, Unit::Micrometers) => 1000.0,
        (Unit::Micrometers, Unit::Millimeters) => 0.001,
        (from, _) => {
            return Err(SignalError::UnsupportedUnit {
                operation: "convert",
                unit: from,
            });
        }
    };
    let values = waveform.values().map(|v| v * factor).collect();
    Ok(waveform.derive(values, to, waveform.label.clone()))
}

/// Rewrites the quantity word in a label, or appends the new quantity.
pub(crate) fn relabel(label: &str, from: Quantity, to: Quantity) -> String {
    if label.contains(from.name()) {
        label.replace(from.name(), to.name())
    } else if label.is_empty() {
        to.name().to_string()
    } else {
        format!("{label} ({})", to.name())
    }
}
