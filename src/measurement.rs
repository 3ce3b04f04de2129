// Measurement value objects shared across the acquisition pipeline
//
// These types are produced by data sources and consumed by the feature
// extractor and classifier. They are plain data: immutable once returned
// from a measurement call.

use serde::{Deserialize, Serialize};

/// A physical terminal on the gel pad
///
/// Terminals come from the device geometry configuration. `channel` is the
/// switch-controller channel the terminal is wired to; `name` is the label
/// used by measurement pair definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminal {
    pub name: String,
    pub channel: u8,
    pub x_mm: f64,
    pub y_mm: f64,
}

impl Terminal {
    pub fn position(&self) -> (f64, f64) {
        (self.x_mm, self.y_mm)
    }
}

/// Ordered excitation/sense pair of terminal names
///
/// A fixed ordered list of pairs defines one full scan. Pairs must reference
/// terminals present in the geometry; this is validated when a source is
/// built from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementPair {
    pub source: String,
    pub sink: String,
}

impl MeasurementPair {
    pub fn new(source: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sink: sink.into(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}->{}", self.source, self.sink)
    }
}

/// One impedance measurement for one pair at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpedanceSample {
    /// |Z| in ohms, >= 0
    pub magnitude_ohm: f64,
    /// Phase in radians
    pub phase_rad: f64,
}

impl ImpedanceSample {
    pub fn new(magnitude_ohm: f64, phase_rad: f64) -> Self {
        Self {
            magnitude_ohm,
            phase_rad,
        }
    }

    /// Build a sample from resistance/reactance as reported by an analyzer
    pub fn from_rectangular(resistance_ohm: f64, reactance_ohm: f64) -> Self {
        Self {
            magnitude_ohm: resistance_ohm.hypot(reactance_ohm),
            phase_rad: reactance_ohm.atan2(resistance_ohm),
        }
    }
}

/// Result of a frequency sweep
///
/// All five arrays share the same length and frequencies are strictly
/// increasing (log-spaced by the sources that produce them).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub frequencies_hz: Vec<f64>,
    pub magnitude_ohm: Vec<f64>,
    pub phase_rad: Vec<f64>,
    pub resistance_ohm: Vec<f64>,
    pub reactance_ohm: Vec<f64>,
}

impl SweepResult {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            frequencies_hz: Vec::with_capacity(n),
            magnitude_ohm: Vec::with_capacity(n),
            phase_rad: Vec::with_capacity(n),
            resistance_ohm: Vec::with_capacity(n),
            reactance_ohm: Vec::with_capacity(n),
        }
    }

    /// Append one sweep point from analyzer resistance/reactance readings
    pub fn push_point(&mut self, frequency_hz: f64, resistance_ohm: f64, reactance_ohm: f64) {
        let sample = ImpedanceSample::from_rectangular(resistance_ohm, reactance_ohm);
        self.frequencies_hz.push(frequency_hz);
        self.magnitude_ohm.push(sample.magnitude_ohm);
        self.phase_rad.push(sample.phase_rad);
        self.resistance_ohm.push(resistance_ohm);
        self.reactance_ohm.push(reactance_ohm);
    }

    pub fn len(&self) -> usize {
        self.frequencies_hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies_hz.is_empty()
    }
}

/// Feature space a vector (and a trained model) belongs to
///
/// `Compact` is the 2-D `[log10(|Z|+1), phase]` space from a single pair;
/// `Spectral` is the 10-D sweep feature space. A model trained in one mode
/// rejects vectors from the other at inference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    Compact,
    Spectral,
}

impl FeatureMode {
    pub fn dims(&self) -> usize {
        match self {
            FeatureMode::Compact => 2,
            FeatureMode::Spectral => 10,
        }
    }
}

/// A feature vector tagged with the mode that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub mode: FeatureMode,
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// 2-D feature vector from a single pair measurement
    pub fn compact(magnitude_ohm: f64, phase_rad: f64) -> Self {
        Self {
            mode: FeatureMode::Compact,
            values: vec![(magnitude_ohm + 1.0).log10(), phase_rad],
        }
    }

    pub fn spectral(values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), FeatureMode::Spectral.dims());
        Self {
            mode: FeatureMode::Spectral,
            values,
        }
    }
}

/// Generate `n` log-spaced frequencies from `start_hz` to `stop_hz` inclusive
pub fn log_spaced_frequencies(start_hz: f64, stop_hz: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![start_hz];
    }
    let log_start = start_hz.log10();
    let log_stop = stop_hz.log10();
    let step = (log_stop - log_start) / (n - 1) as f64;
    (0..n)
        .map(|i| 10f64.powf(log_start + step * i as f64))
        .collect()
}
