// Spectral feature extraction from impedance frequency sweeps
//
// A sweep is reduced to a compact record: the reactance peak, band-averaged
// magnitude/reactance over three contiguous frequency bands, and the slope
// of reactance against log-frequency. These are the inputs to the
// spectral-mode classifier.

use serde::{Deserialize, Serialize};

use crate::measurement::{FeatureVector, SweepResult};

/// Reactance peak location within a sweep
///
/// The peak is taken at the index where |X| is maximal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReactancePeak {
    pub peak_freq_hz: f64,
    pub peak_reactance_ohm: f64,
    pub peak_magnitude_ohm: f64,
    pub peak_phase_rad: f64,
    pub peak_index: usize,
}

/// Ten-field spectral feature record extracted from one sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    pub peak_freq: f64,
    pub peak_magnitude: f64,
    pub peak_phase: f64,
    pub z_mean_low: f64,
    pub z_mean_mid: f64,
    pub z_mean_high: f64,
    pub x_mean_low: f64,
    pub x_mean_mid: f64,
    pub x_mean_high: f64,
    pub x_slope: f64,
}

impl SpectralFeatures {
    /// Classifier-facing 10-D vector
    ///
    /// Magnitude-scaled fields go through log10(v + 1) so ohm-scale values
    /// and radian-scale values standardize comparably; peak_freq through a
    /// plain log10.
    pub fn to_feature_vector(&self) -> FeatureVector {
        FeatureVector::spectral(vec![
            self.peak_freq.log10(),
            (self.peak_magnitude + 1.0).log10(),
            self.peak_phase,
            (self.z_mean_low + 1.0).log10(),
            (self.z_mean_mid + 1.0).log10(),
            (self.z_mean_high + 1.0).log10(),
            self.x_mean_low,
            self.x_mean_mid,
            self.x_mean_high,
            self.x_slope,
        ])
    }
}

/// Locate the reactance peak of a sweep
///
/// Returns None for an empty sweep.
pub fn find_reactance_peak(sweep: &SweepResult) -> Option<ReactancePeak> {
    let peak_index = sweep
        .reactance_ohm
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
        .map(|(i, _)| i)?;

    Some(ReactancePeak {
        peak_freq_hz: sweep.frequencies_hz[peak_index],
        peak_reactance_ohm: sweep.reactance_ohm[peak_index],
        peak_magnitude_ohm: sweep.magnitude_ohm[peak_index],
        peak_phase_rad: sweep.phase_rad[peak_index],
        peak_index,
    })
}

/// Extract the ten spectral features from a sweep
///
/// The sweep is partitioned into three contiguous equal-size bands in
/// frequency order; when the point count is not divisible by three the
/// remainder goes to the high band. Returns None for sweeps with fewer
/// than three points (no meaningful band split).
pub fn extract_spectral_features(sweep: &SweepResult) -> Option<SpectralFeatures> {
    let n = sweep.len();
    if n < 3 {
        return None;
    }

    let peak = find_reactance_peak(sweep)?;

    let band = n / 3;
    let z_mean_low = mean(&sweep.magnitude_ohm[..band]);
    let z_mean_mid = mean(&sweep.magnitude_ohm[band..2 * band]);
    let z_mean_high = mean(&sweep.magnitude_ohm[2 * band..]);
    let x_mean_low = mean(&sweep.reactance_ohm[..band]);
    let x_mean_mid = mean(&sweep.reactance_ohm[band..2 * band]);
    let x_mean_high = mean(&sweep.reactance_ohm[2 * band..]);

    let log_freqs: Vec<f64> = sweep.frequencies_hz.iter().map(|f| f.log10()).collect();
    let x_slope = linear_slope(&log_freqs, &sweep.reactance_ohm);

    Some(SpectralFeatures {
        peak_freq: peak.peak_freq_hz,
        peak_magnitude: peak.peak_magnitude_ohm,
        peak_phase: peak.peak_phase_rad,
        z_mean_low,
        z_mean_mid,
        z_mean_high,
        x_mean_low,
        x_mean_mid,
        x_mean_high,
        x_slope,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// First-order least-squares slope of y against x
fn linear_slope(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        covariance += (xi - x_mean) * (yi - y_mean);
        variance += (xi - x_mean) * (xi - x_mean);
    }

    if variance < 1e-15 {
        0.0
    } else {
        covariance / variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::log_spaced_frequencies;

    /// Sweep with a synthetic |X| bump at `peak_index`
    fn synthetic_sweep(n: usize, peak_index: usize) -> SweepResult {
        let freqs = log_spaced_frequencies(2_000.0, 20_000.0, n);
        let mut sweep = SweepResult::with_capacity(n);
        for (i, freq) in freqs.iter().enumerate() {
            let distance = (i as f64 - peak_index as f64).abs();
            let reactance = -(500.0 - 10.0 * distance);
            sweep.push_point(*freq, 1000.0 + i as f64, reactance);
        }
        sweep
    }

    #[test]
    fn test_peak_at_expected_index() {
        let sweep = synthetic_sweep(50, 25);
        let peak = find_reactance_peak(&sweep).unwrap();
        assert_eq!(peak.peak_index, 25);
        assert_eq!(peak.peak_freq_hz, sweep.frequencies_hz[25]);
        assert_eq!(peak.peak_reactance_ohm, sweep.reactance_ohm[25]);
    }

    #[test]
    fn test_peak_uses_absolute_reactance() {
        let freqs = log_spaced_frequencies(2_000.0, 20_000.0, 5);
        let mut sweep = SweepResult::with_capacity(5);
        let reactances = [-10.0, 40.0, -300.0, 20.0, -5.0];
        for (freq, x) in freqs.iter().zip(reactances.iter()) {
            sweep.push_point(*freq, 100.0, *x);
        }
        let peak = find_reactance_peak(&sweep).unwrap();
        assert_eq!(peak.peak_index, 2);
        assert_eq!(peak.peak_reactance_ohm, -300.0);
    }

    #[test]
    fn test_empty_sweep_has_no_peak() {
        assert!(find_reactance_peak(&SweepResult::default()).is_none());
    }

    #[test]
    fn test_extraction_field_count() {
        let sweep = synthetic_sweep(50, 25);
        let features = extract_spectral_features(&sweep).unwrap();
        let vector = features.to_feature_vector();
        assert_eq!(vector.values.len(), 10);
    }

    #[test]
    fn test_band_split_remainder_goes_high() {
        // 10 points: bands are 3 / 3 / 4
        let freqs = log_spaced_frequencies(1_000.0, 10_000.0, 10);
        let mut sweep = SweepResult::with_capacity(10);
        for (i, freq) in freqs.iter().enumerate() {
            // resistance chosen so magnitude ~ resistance (reactance tiny)
            sweep.push_point(*freq, (i + 1) as f64 * 100.0, 1e-6);
        }
        let features = extract_spectral_features(&sweep).unwrap();
        assert!((features.z_mean_low - 200.0).abs() < 1e-3);
        assert!((features.z_mean_mid - 500.0).abs() < 1e-3);
        // high band averages points 7..10 -> (700+800+900+1000)/4
        assert!((features.z_mean_high - 850.0).abs() < 1e-3);
    }

    #[test]
    fn test_slope_sign() {
        // Reactance rising with log frequency -> positive slope
        let freqs = log_spaced_frequencies(1_000.0, 100_000.0, 20);
        let mut sweep = SweepResult::with_capacity(20);
        for freq in &freqs {
            sweep.push_point(*freq, 100.0, 50.0 * freq.log10());
        }
        let features = extract_spectral_features(&sweep).unwrap();
        assert!((features.x_slope - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_short_sweep_rejected() {
        let mut sweep = SweepResult::with_capacity(2);
        sweep.push_point(1_000.0, 100.0, -10.0);
        sweep.push_point(2_000.0, 100.0, -20.0);
        assert!(extract_spectral_features(&sweep).is_none());
    }
}
