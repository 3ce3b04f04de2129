// Multiplexed real-hardware source
//
// One impedance analyzer shared across all measurement pairs through an
// external terminal switch. Per pair: route the channels, wait out the
// settling interval, run one analyzer measurement with bounded done
// polling, convert the rectangular reading to magnitude/phase.

use std::thread;
use std::time::Duration;

use crate::config::{GeometryConfig, MeasurementConfig};
use crate::error::{log_source_error, SourceError};
use crate::measurement::ImpedanceSample;
use crate::source::hardware::{wait_until_done, ImpedanceAnalyzer, TerminalSwitch};
use crate::source::{resolve_pairs, DataSource, ResolvedPair};

/// Analyzer plus switch-controller acquisition backend
pub struct MultiplexedSource {
    analyzer: Box<dyn ImpedanceAnalyzer>,
    switch: Box<dyn TerminalSwitch>,
    measurement: MeasurementConfig,
    pairs: Vec<ResolvedPair>,
    connected: bool,
}

impl MultiplexedSource {
    pub fn new(
        geometry: &GeometryConfig,
        measurement: MeasurementConfig,
        analyzer: Box<dyn ImpedanceAnalyzer>,
        switch: Box<dyn TerminalSwitch>,
    ) -> Result<Self, SourceError> {
        let pairs = resolve_pairs(geometry, &measurement.pairs)?;
        Ok(Self {
            analyzer,
            switch,
            measurement,
            pairs,
            connected: false,
        })
    }

    fn measure_pair(&mut self, pair_index: usize) -> Result<ImpedanceSample, SourceError> {
        let pair = self.pairs[pair_index].clone();
        self.switch
            .select(pair.source_channel, pair.sink_channel)?;
        if self.measurement.settle_ms > 0 {
            thread::sleep(Duration::from_millis(self.measurement.settle_ms));
        }

        self.analyzer.start_measurement()?;
        wait_until_done(
            self.analyzer.as_mut(),
            self.measurement.poll_interval_ms,
            self.measurement.poll_budget,
        )?;
        let (resistance, reactance) = self.analyzer.read_rectangular()?;

        let sample = ImpedanceSample::from_rectangular(resistance, reactance);
        log::debug!(
            "[Multiplexed] Pair {} ({}): {:.2} ohm, {:.4} rad",
            pair_index,
            pair.label,
            sample.magnitude_ohm,
            sample.phase_rad
        );
        Ok(sample)
    }
}

impl DataSource for MultiplexedSource {
    fn connect(&mut self) -> bool {
        if self.connected {
            return true;
        }

        if let Err(err) = self.switch.open() {
            log_source_error(&err, "connect");
            return false;
        }
        if let Err(err) = self.analyzer.open() {
            log_source_error(&err, "connect");
            self.switch.close();
            return false;
        }
        if let Err(err) = self
            .analyzer
            .configure(self.measurement.frequency_hz, self.measurement.amplitude_v)
        {
            log_source_error(&err, "connect");
            self.analyzer.close();
            self.switch.close();
            return false;
        }

        log::info!(
            "[Multiplexed] Connected: {} / {}",
            self.analyzer.info(),
            self.switch.info()
        );
        self.connected = true;
        true
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.analyzer.close();
            self.switch.close();
            self.connected = false;
            log::info!("[Multiplexed] Disconnected");
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

        let mut samples = Vec::with_capacity(self.pairs.len());
        for pair_index in 0..self.pairs.len() {
            samples.push(self.measure_pair(pair_index)?);
        }
        log::info!("[Multiplexed] Scan complete: {} pairs", samples.len());
        Ok(samples)
    }

    fn device_info(&self) -> String {
        format!("{} + {}", self.analyzer.info(), self.switch.info())
    }
}
