// Data-source abstraction over real and simulated acquisition backends
//
// Every backend - the in-process simulator, the networked simulator client,
// and the two real-hardware drivers - implements the same DataSource
// contract, so training scripts and the monitor loop never know which one
// they are talking to. The concrete variant is selected by explicit
// configuration through create_data_source().

pub mod hardware;
pub mod multiplexed;
pub mod simulator;
pub mod single_pair;

pub use hardware::{ImpedanceAnalyzer, TerminalSwitch};
pub use multiplexed::MultiplexedSource;
pub use simulator::SimulatorSource;
pub use single_pair::SinglePairSource;

use crate::analysis::spectral::{self, ReactancePeak, SpectralFeatures};
use crate::config::{AppConfig, GeometryConfig, SourceMode};
use crate::error::SourceError;
use crate::measurement::{ImpedanceSample, MeasurementPair, SweepResult};

/// Capability contract shared by all acquisition backends
///
/// Connection management must be forgiving: `connect()` reports failure
/// instead of panicking when hardware is absent and leaves no handle open
/// on the failure path; `disconnect()` and double-`connect()` are always
/// safe. Ground truth only means something for simulated sources; hardware
/// variants ignore `set_ground_truth` and report `None`.
pub trait DataSource: Send {
    /// Open the backend. Returns false (with the reason logged) on failure.
    fn connect(&mut self) -> bool;

    /// Close the backend. Safe to call twice.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Set the simulated touch position. No-op on real hardware.
    fn set_ground_truth(&mut self, x_mm: f64, y_mm: f64);

    /// Current simulated touch position; always `None` on real hardware.
    ///
    /// Takes `&mut self` because the networked variant may refresh its
    /// cached position with a server round trip.
    fn ground_truth(&mut self) -> Option<(f64, f64)>;

    /// One full scan: one sample per configured pair, in pair-declaration
    /// order.
    fn measure_impedance_vector(&mut self) -> Result<Vec<ImpedanceSample>, SourceError>;

    fn device_info(&self) -> String;

    /// Access to the sweep capability, when this backend has one
    fn as_sweep_capable(&mut self) -> Option<&mut dyn SweepCapable> {
        None
    }
}

/// Frequency-sweep capability of single-pair backends
pub trait SweepCapable {
    /// Run a log-spaced sweep and cache it as the last sweep
    fn sweep_impedance(
        &mut self,
        start_hz: f64,
        stop_hz: f64,
        points: usize,
    ) -> Result<SweepResult, SourceError>;

    /// The most recent sweep, if any
    fn last_sweep(&self) -> Option<&SweepResult>;

    /// Reactance peak of `sweep`, or of the cached last sweep when `None`
    fn find_reactance_peak(
        &self,
        sweep: Option<&SweepResult>,
    ) -> Result<ReactancePeak, SourceError> {
        let sweep = sweep
            .or_else(|| self.last_sweep())
            .ok_or(SourceError::SweepMissing)?;
        spectral::find_reactance_peak(sweep).ok_or(SourceError::SweepMissing)
    }

    /// Spectral features of `sweep`, or of the cached last sweep when `None`
    fn extract_spectral_features(
        &self,
        sweep: Option<&SweepResult>,
    ) -> Result<SpectralFeatures, SourceError> {
        let sweep = sweep
            .or_else(|| self.last_sweep())
            .ok_or(SourceError::SweepMissing)?;
        spectral::extract_spectral_features(sweep).ok_or_else(|| SourceError::AnalyzerFailure {
            details: format!(
                "sweep too short for spectral extraction ({} points)",
                sweep.len()
            ),
        })
    }
}

/// A measurement pair resolved against the device geometry
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPair {
    pub label: String,
    pub source_channel: u8,
    pub sink_channel: u8,
    pub source_pos: (f64, f64),
    pub sink_pos: (f64, f64),
}

/// Resolve a pair list against the geometry, failing on unknown terminals
pub fn resolve_pairs(
    geometry: &GeometryConfig,
    pairs: &[MeasurementPair],
) -> Result<Vec<ResolvedPair>, SourceError> {
    pairs
        .iter()
        .map(|pair| {
            let source = geometry
                .terminal(&pair.source)
                .ok_or_else(|| SourceError::UnknownTerminal {
                    name: pair.source.clone(),
                })?;
            let sink = geometry
                .terminal(&pair.sink)
                .ok_or_else(|| SourceError::UnknownTerminal {
                    name: pair.sink.clone(),
                })?;
            Ok(ResolvedPair {
                label: pair.label(),
                source_channel: source.channel,
                sink_channel: sink.channel,
                source_pos: source.position(),
                sink_pos: sink.position(),
            })
        })
        .collect()
}

/// Injected driver handles for the real-hardware source variants
///
/// The concrete drivers (vendor SDK bindings, serial switch controllers)
/// live outside this crate; hardware modes fail cleanly when the needed
/// handle was not provided.
#[derive(Default)]
pub struct DeviceRegistry {
    pub analyzer: Option<Box<dyn ImpedanceAnalyzer>>,
    pub switch: Option<Box<dyn TerminalSwitch>>,
}

/// Build the configured data-source variant
pub fn create_data_source(
    config: &AppConfig,
    devices: DeviceRegistry,
) -> Result<Box<dyn DataSource>, SourceError> {
    match config.source {
        SourceMode::Simulator => {
            let source = SimulatorSource::new(
                &config.geometry,
                &config.measurement,
                config.simulation.clone(),
            )?;
            Ok(Box::new(source))
        }
        SourceMode::RemoteSimulator => {
            let source = crate::sync::client::RemoteSimulatorSource::new(config.sync.clone());
            Ok(Box::new(source))
        }
        SourceMode::HardwareMultiplexed => {
            let analyzer = devices.analyzer.ok_or_else(missing_analyzer)?;
            let switch = devices.switch.ok_or_else(|| SourceError::SwitchFailure {
                details: "no terminal switch driver provided".to_string(),
            })?;
            let source = MultiplexedSource::new(
                &config.geometry,
                config.measurement.clone(),
                analyzer,
                switch,
            )?;
            Ok(Box::new(source))
        }
        SourceMode::HardwareSinglePair => {
            let analyzer = devices.analyzer.ok_or_else(missing_analyzer)?;
            Ok(Box::new(SinglePairSource::new(
                config.measurement.clone(),
                analyzer,
            )))
        }
    }
}

fn missing_analyzer() -> SourceError {
    SourceError::AnalyzerFailure {
        details: "no impedance analyzer driver provided".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::measurement::MeasurementPair;

    #[test]
    fn test_resolve_pairs_against_default_geometry() {
        let geometry = GeometryConfig::default();
        let pairs = vec![MeasurementPair::new("A", "C")];
        let resolved = resolve_pairs(&geometry, &pairs).unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].label, "A->C");
        assert_eq!(resolved[0].source_channel, 0);
        assert_eq!(resolved[0].sink_channel, 2);
        assert_eq!(resolved[0].source_pos, (0.0, 0.0));
        assert_eq!(resolved[0].sink_pos, (100.0, 100.0));
    }

    #[test]
    fn test_resolve_pairs_rejects_unknown_terminal() {
        let geometry = GeometryConfig::default();
        let pairs = vec![MeasurementPair::new("A", "E")];
        assert_eq!(
            resolve_pairs(&geometry, &pairs),
            Err(SourceError::UnknownTerminal {
                name: "E".to_string()
            })
        );
    }

    #[test]
    fn test_factory_builds_simulator() {
        let config = AppConfig::default();
        let mut source = create_data_source(&config, DeviceRegistry::default()).unwrap();
        assert!(source.connect());
        assert!(source.device_info().contains("Simulator"));
    }

    #[test]
    fn test_factory_hardware_requires_drivers() {
        let config = AppConfig {
            source: SourceMode::HardwareMultiplexed,
            ..AppConfig::default()
        };
        assert!(create_data_source(&config, DeviceRegistry::default()).is_err());
    }
}
