// Local HILS simulator source
//
// Computes impedance in-process from the distance-attenuation model, so
// data collection, training, and inference all run without hardware. The
// simulator is sweep-capable too: a synthetic sweep with an RC-like
// reactance bump lets the spectral pipeline run end to end.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{GeometryConfig, MeasurementConfig, SimulationConfig};
use crate::error::SourceError;
use crate::measurement::{log_spaced_frequencies, ImpedanceSample, SweepResult};
use crate::physics;
use crate::source::{resolve_pairs, DataSource, ResolvedPair, SweepCapable};

/// Default simulated touch position: pad center [mm]
const DEFAULT_TOUCH_MM: (f64, f64) = (50.0, 50.0);

/// Width of the synthetic reactance bump in log10(Hz)
const SWEEP_PEAK_SIGMA_LG: f64 = 0.18;

/// Hardware-in-the-loop simulator
pub struct SimulatorSource {
    sim: SimulationConfig,
    pairs: Vec<ResolvedPair>,
    touch: (f64, f64),
    connected: bool,
    rng: StdRng,
    last_sweep: Option<SweepResult>,
}

impl SimulatorSource {
    pub fn new(
        geometry: &GeometryConfig,
        measurement: &MeasurementConfig,
        sim: SimulationConfig,
    ) -> Result<Self, SourceError> {
        let pairs = resolve_pairs(geometry, &measurement.pairs)?;
        let rng = match sim.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        log::info!(
            "[Simulator] Initialized with {} pairs, noise {:.1}%",
            pairs.len(),
            sim.noise_level * 100.0
        );
        Ok(Self {
            sim,
            pairs,
            touch: DEFAULT_TOUCH_MM,
            connected: false,
            rng,
            last_sweep: None,
        })
    }
}

impl DataSource for SimulatorSource {
    fn connect(&mut self) -> bool {
        self.connected = true;
        log::info!("[Simulator] Connected");
        true
    }

    fn disconnect(&mut self) {
        self.connected = false;
        log::info!("[Simulator] Disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_ground_truth(&mut self, x_mm: f64, y_mm: f64) {
        self.touch = (x_mm, y_mm);
        log::debug!("[Simulator] Touch position set to ({:.2}, {:.2}) mm", x_mm, y_mm);
    }

    fn ground_truth(&mut self) -> Option<(f64, f64)> {
        Some(self.touch)
    }

    fn measure_impedance_vector(&mut self) -> Result<Vec<ImpedanceSample>, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }

        let samples = self
            .pairs
            .iter()
            .map(|pair| {
                physics::pair_sample(
                    self.touch,
                    pair.source_pos,
                    pair.sink_pos,
                    &self.sim,
                    &mut self.rng,
                )
            })
            .collect();
        log::debug!("[Simulator] Measured {} pairs", self.pairs.len());
        Ok(samples)
    }

    fn device_info(&self) -> String {
        format!(
            "HILS Simulator (model: distance attenuation, noise: {:.1}%)",
            self.sim.noise_level * 100.0
        )
    }

    fn as_sweep_capable(&mut self) -> Option<&mut dyn SweepCapable> {
        Some(self)
    }
}

impl SweepCapable for SimulatorSource {
    /// Synthesize a sweep over the first configured pair
    ///
    /// Magnitude follows the distance model with a mild roll-off across the
    /// band; reactance is a negative bump whose center frequency rises as
    /// the touch approaches the pair, so pressing visibly moves the peak.
    fn sweep_impedance(
        &mut self,
        start_hz: f64,
        stop_hz: f64,
        points: usize,
    ) -> Result<SweepResult, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        if points == 0 || start_hz <= 0.0 || stop_hz <= start_hz {
            return Err(SourceError::AnalyzerFailure {
                details: format!(
                    "invalid sweep range {:.0}-{:.0} Hz / {} points",
                    start_hz, stop_hz, points
                ),
            });
        }

        let pair = &self.pairs[0];
        let d_eff = physics::effective_distance(self.touch, pair.source_pos, pair.sink_pos);

        let lg_start = start_hz.log10();
        let lg_stop = stop_hz.log10();
        let proximity = (-d_eff / physics::DECAY_CONSTANT_MM).exp();
        let peak_lg = lg_start + (lg_stop - lg_start) * (0.35 + 0.4 * proximity);

        let mut sweep = SweepResult::with_capacity(points);
        for freq in log_spaced_frequencies(start_hz, stop_hz, points) {
            let lg = freq.log10();
            let band_position = (lg - lg_start) / (lg_stop - lg_start);

            let magnitude = physics::pair_magnitude(
                self.touch,
                pair.source_pos,
                pair.sink_pos,
                &self.sim,
                &mut self.rng,
            ) * (1.0 - 0.1 * band_position);

            let bump = (-(lg - peak_lg) * (lg - peak_lg)
                / (2.0 * SWEEP_PEAK_SIGMA_LG * SWEEP_PEAK_SIGMA_LG))
                .exp();
            // |X| / |Z| stays below 1 so resistance remains real
            let reactance_ratio = 0.15 + 0.75 * bump;
            let reactance = -reactance_ratio * magnitude;
            let resistance = (magnitude * magnitude - reactance * reactance).sqrt();

            sweep.push_point(freq, resistance, reactance);
        }

        log::debug!(
            "[Simulator] Synthesized sweep {:.0}-{:.0} Hz, {} points (peak near 10^{:.2} Hz)",
            start_hz,
            stop_hz,
            points,
            peak_lg
        );
        self.last_sweep = Some(sweep.clone());
        Ok(sweep)
    }

    fn last_sweep(&self) -> Option<&SweepResult> {
        self.last_sweep.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeometryConfig;

    fn seeded_source(seed: u64) -> SimulatorSource {
        let sim = SimulationConfig {
            seed: Some(seed),
            ..SimulationConfig::default()
        };
        SimulatorSource::new(
            &GeometryConfig::default(),
            &MeasurementConfig::default(),
            sim,
        )
        .unwrap()
    }

    #[test]
    fn test_measure_requires_connect() {
        let mut source = seeded_source(1);
        assert_eq!(
            source.measure_impedance_vector(),
            Err(SourceError::NotConnected)
        );
        assert!(source.connect());
        assert!(source.measure_impedance_vector().is_ok());
    }

    #[test]
    fn test_measurement_order_matches_pair_list() {
        let mut source = seeded_source(2);
        source.connect();
        let samples = source.measure_impedance_vector().unwrap();
        assert_eq!(samples.len(), MeasurementConfig::default().pairs.len());
    }

    #[test]
    fn test_deterministic_under_fixed_seed() {
        let mut a = seeded_source(7);
        let mut b = seeded_source(7);
        a.connect();
        b.connect();
        a.set_ground_truth(30.0, 70.0);
        b.set_ground_truth(30.0, 70.0);

        assert_eq!(
            a.measure_impedance_vector().unwrap(),
            b.measure_impedance_vector().unwrap()
        );
    }

    #[test]
    fn test_center_touch_symmetry() {
        // Touch at the pad center: every pair sees the same geometry, so
        // the noise-free magnitudes must be statistically indistinguishable
        let mut source = SimulatorSource::new(
            &GeometryConfig::default(),
            &MeasurementConfig::default(),
            SimulationConfig {
                noise_level: 0.0,
                seed: Some(0),
                ..SimulationConfig::default()
            },
        )
        .unwrap();
        source.connect();
        source.set_ground_truth(50.0, 50.0);

        let samples = source.measure_impedance_vector().unwrap();
        // Edge pairs (A-B, A-D, B-C, C-D) share one distance, diagonals
        // (B-D, A-C) another; compare within each group
        let edge = [samples[0], samples[1], samples[2], samples[4]];
        for sample in &edge[1..] {
            assert!((sample.magnitude_ohm - edge[0].magnitude_ohm).abs() < 1e-9);
        }
        let diagonals = [samples[3], samples[5]];
        assert!((diagonals[0].magnitude_ohm - diagonals[1].magnitude_ohm).abs() < 1e-9);
    }

    #[test]
    fn test_ground_truth_roundtrip() {
        let mut source = seeded_source(3);
        assert_eq!(source.ground_truth(), Some(DEFAULT_TOUCH_MM));
        source.set_ground_truth(12.5, 88.0);
        assert_eq!(source.ground_truth(), Some((12.5, 88.0)));
    }

    #[test]
    fn test_synthetic_sweep_shape() {
        let mut source = seeded_source(4);
        source.connect();
        let sweep = source
            .as_sweep_capable()
            .unwrap()
            .sweep_impedance(2_000.0, 20_000.0, 50)
            .unwrap();

        assert_eq!(sweep.len(), 50);
        for pair in sweep.frequencies_hz.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        // Reactance stays negative (capacitive), magnitude consistent
        for i in 0..sweep.len() {
            assert!(sweep.reactance_ohm[i] < 0.0);
            let expected = sweep.resistance_ohm[i].hypot(sweep.reactance_ohm[i]);
            assert!((sweep.magnitude_ohm[i] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sweep_peak_moves_with_touch() {
        // Touch on the first pair's segment vs far away: the cached sweeps
        // must peak at different frequencies
        let mut source = seeded_source(5);
        source.connect();

        source.set_ground_truth(50.0, 0.0);
        let near = source
            .as_sweep_capable()
            .unwrap()
            .sweep_impedance(2_000.0, 20_000.0, 80)
            .unwrap();
        let near_peak = crate::analysis::spectral::find_reactance_peak(&near)
            .unwrap()
            .peak_freq_hz;

        source.set_ground_truth(50.0, 100.0);
        let far = source
            .as_sweep_capable()
            .unwrap()
            .sweep_impedance(2_000.0, 20_000.0, 80)
            .unwrap();
        let far_peak = crate::analysis::spectral::find_reactance_peak(&far)
            .unwrap()
            .peak_freq_hz;

        assert!(near_peak > far_peak);
    }

    #[test]
    fn test_spectral_features_from_cached_sweep() {
        let mut source = seeded_source(6);
        source.connect();
        let sweep_capable = source.as_sweep_capable().unwrap();

        // No sweep captured yet
        assert_eq!(
            sweep_capable.extract_spectral_features(None),
            Err(SourceError::SweepMissing)
        );

        sweep_capable.sweep_impedance(2_000.0, 20_000.0, 30).unwrap();
        let features = sweep_capable.extract_spectral_features(None).unwrap();
        assert!(features.peak_freq >= 2_000.0 && features.peak_freq <= 20_000.0);
    }
}
