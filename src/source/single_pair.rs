// Single-pair sweep-capable real-hardware source
//
// No terminal switching: the analyzer is wired to one fixed pair and
// measured repeatedly. This is also the sweep backend: each sweep point
// reprograms the excitation frequency, settles, and measures with the same
// bounded done-polling as a plain measurement. A point whose poll budget
// runs out is logged and omitted rather than aborting the sweep; the base
// frequency is restored afterwards.

use std::thread;
use std::time::Duration;

use crate::config::MeasurementConfig;
use crate::error::{log_source_error, SourceError};
use crate::measurement::{log_spaced_frequencies, ImpedanceSample, SweepResult};
use crate::source::hardware::{wait_until_done, ImpedanceAnalyzer};
use crate::source::{DataSource, SweepCapable};

/// Fixed-pair analyzer backend with frequency sweeps
pub struct SinglePairSource {
    analyzer: Box<dyn ImpedanceAnalyzer>,
    measurement: MeasurementConfig,
    connected: bool,
    last_sweep: Option<SweepResult>,
}

impl SinglePairSource {
    pub fn new(measurement: MeasurementConfig, analyzer: Box<dyn ImpedanceAnalyzer>) -> Self {
        Self {
            analyzer,
            measurement,
            connected: false,
            last_sweep: None,
        }
    }

    fn measure_once(&mut self) -> Result<ImpedanceSample, SourceError> {
        self.analyzer.start_measurement()?;
        wait_until_done(
            self.analyzer.as_mut(),
            self.measurement.poll_interval_ms,
            self.measurement.poll_budget,
        )?;
        let (resistance, reactance) = self.analyzer.read_rectangular()?;
        Ok(ImpedanceSample::from_rectangular(resistance, reactance))
    }
}

impl DataSource for SinglePairSource {
    fn connect(&mut self) -> bool {
        if self.connected {
            return true;
        }

        if let Err(err) = self.analyzer.open() {
            log_source_error(&err, "connect");
            return false;
        }
        if let Err(err) = self
            .analyzer
            .configure(self.measurement.frequency_hz, self.measurement.amplitude_v)
        {
            log_source_error(&err, "connect");
            self.analyzer.close();
            return false;
        }

        log::info!("[SinglePair] Connected: {}", self.analyzer.info());
        self.connected = true;
        true
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.analyzer.close();
            self.connected = false;
            log::info!("[SinglePair] Disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_ground_truth(&mut self, _x_mm: f64, _y_mm: f64) {
        // The physical touch location is unknowable on real hardware
    }

    fn ground_truth(&mut self) -> Option<(f64, f64)> {
        None
    }

    fn measure_impedance_vector(&mut self) -> Result<Vec<ImpedanceSample>, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        let sample = self.measure_once()?;
        log::debug!(
            "[SinglePair] |Z|={:.2} ohm, phase={:.4} rad",
            sample.magnitude_ohm,
            sample.phase_rad
        );
        Ok(vec![sample])
    }

    fn device_info(&self) -> String {
        format!("{} (single pair, sweep-capable)", self.analyzer.info())
    }

    fn as_sweep_capable(&mut self) -> Option<&mut dyn SweepCapable> {
        Some(self)
    }
}

impl SweepCapable for SinglePairSource {
    fn sweep_impedance(
        &mut self,
        start_hz: f64,
        stop_hz: f64,
        points: usize,
    ) -> Result<SweepResult, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }

        let sweep_cfg = &self.measurement.sweep;
        let settle_ms = sweep_cfg.settle_ms;
        let poll_interval_ms = sweep_cfg.poll_interval_ms;
        let poll_budget = sweep_cfg.poll_budget;

        let mut sweep = SweepResult::with_capacity(points);
        let mut skipped = 0usize;
        for freq in log_spaced_frequencies(start_hz, stop_hz, points) {
            self.analyzer.set_frequency(freq)?;
            if settle_ms > 0 {
                thread::sleep(Duration::from_millis(settle_ms));
            }

            self.analyzer.start_measurement()?;
            match wait_until_done(self.analyzer.as_mut(), poll_interval_ms, poll_budget) {
                Ok(()) => {
                    let (resistance, reactance) = self.analyzer.read_rectangular()?;
                    sweep.push_point(freq, resistance, reactance);
                }
                Err(SourceError::MeasurementTimeout { polls }) => {
                    // One dead point must not abort the sweep; the arrays
                    // stay aligned because nothing is pushed for it
                    log::warn!(
                        "[SinglePair] Sweep point {:.0} Hz timed out after {} polls, skipping",
                        freq,
                        polls
                    );
                    skipped += 1;
                }
                Err(err) => {
                    self.restore_base_frequency();
                    return Err(err);
                }
            }
        }

        self.restore_base_frequency();

        if sweep.is_empty() {
            return Err(SourceError::MeasurementTimeout {
                polls: poll_budget,
            });
        }
        log::debug!(
            "[SinglePair] Sweep complete: {:.0}-{:.0} Hz, {}/{} points{}",
            start_hz,
            stop_hz,
            sweep.len(),
            points,
            if skipped > 0 {
                format!(" ({} skipped)", skipped)
            } else {
                String::new()
            }
        );
        self.last_sweep = Some(sweep.clone());
        Ok(sweep)
    }

    fn last_sweep(&self) -> Option<&SweepResult> {
        self.last_sweep.as_ref()
    }
}

impl SinglePairSource {
    fn restore_base_frequency(&mut self) {
        if let Err(err) = self.analyzer.set_frequency(self.measurement.frequency_hz) {
            log_source_error(&err, "sweep_restore_frequency");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::hardware::mock::MockAnalyzer;

    fn fast_measurement() -> MeasurementConfig {
        let mut measurement = MeasurementConfig {
            settle_ms: 0,
            poll_interval_ms: 0,
            poll_budget: 10,
            ..MeasurementConfig::default()
        };
        measurement.sweep.settle_ms = 0;
        measurement.sweep.poll_interval_ms = 0;
        measurement.sweep.poll_budget = 5;
        measurement
    }

    fn connected_source(analyzer: MockAnalyzer) -> SinglePairSource {
        let mut source = SinglePairSource::new(fast_measurement(), Box::new(analyzer));
        assert!(source.connect());
        source
    }

    #[test]
    fn test_measure_returns_single_sample() {
        let mut source = connected_source(MockAnalyzer::new());
        let samples = source.measure_impedance_vector().unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_connect_failure_is_clean() {
        let mut source = SinglePairSource::new(fast_measurement(), Box::new(MockAnalyzer::failing_open()));
        assert!(!source.connect());
        assert!(!source.is_connected());
    }

    #[test]
    fn test_sweep_measures_each_point() {
        let mut source = connected_source(MockAnalyzer::new());
        let sweep = source.sweep_impedance(2_000.0, 20_000.0, 50).unwrap();

        assert_eq!(sweep.len(), 50);
        // The mock reports resistance equal to the programmed frequency
        assert!((sweep.resistance_ohm[0] - 2_000.0).abs() < 1.0);
        assert!((sweep.resistance_ohm[49] - 20_000.0).abs() < 1.0);
        for pair in sweep.frequencies_hz.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_sweep_skips_timed_out_points() {
        let mut analyzer = MockAnalyzer::new();
        // The 2 kHz start point never reports done
        analyzer.dead_frequencies.insert(2_000);
        let mut source = connected_source(analyzer);

        let sweep = source.sweep_impedance(2_000.0, 20_000.0, 10).unwrap();
        assert_eq!(sweep.len(), 9);
        // Arrays stay aligned and strictly increasing despite the gap
        assert_eq!(sweep.frequencies_hz.len(), sweep.reactance_ohm.len());
        for pair in sweep.frequencies_hz.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_all_timeout_sweep_fails() {
        let mut analyzer = MockAnalyzer::new();
        analyzer.polls_until_done = 100;
        let mut source = connected_source(analyzer);

        assert!(matches!(
            source.sweep_impedance(2_000.0, 20_000.0, 5),
            Err(SourceError::MeasurementTimeout { .. })
        ));
    }

    #[test]
    fn test_sweep_caches_last_result() {
        let mut source = connected_source(MockAnalyzer::new());
        assert!(source.last_sweep().is_none());
        source.sweep_impedance(2_000.0, 20_000.0, 12).unwrap();
        assert_eq!(source.last_sweep().unwrap().len(), 12);

        // Cached sweep feeds the feature extractor
        let features = source.extract_spectral_features(None).unwrap();
        assert!(features.peak_freq > 0.0);
    }
}
