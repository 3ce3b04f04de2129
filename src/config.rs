//! Configuration management for the sensing pipeline
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. Device geometry, the
//! measurement pair list, simulator physics parameters, and classifier
//! sizing can all be adjusted via the config file.
//!
//! There is no ambient global configuration: every component receives the
//! slice of `AppConfig` it needs through its constructor.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::measurement::{MeasurementPair, Terminal};

/// Which data-source variant the factory should build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// In-process physics simulator
    Simulator,
    /// Client of a networked shared-state simulator
    RemoteSimulator,
    /// Impedance analyzer plus terminal switch controller
    HardwareMultiplexed,
    /// Single fixed pair, sweep-capable analyzer
    HardwareSinglePair,
}

/// How the networked client answers ground-truth queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundTruthMode {
    /// Return the position from the last observed state broadcast
    Cached,
    /// Issue a get_state request and wait for the reply
    RoundTrip,
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: SourceMode,
    pub geometry: GeometryConfig,
    pub measurement: MeasurementConfig,
    pub simulation: SimulationConfig,
    pub sync: SyncConfig,
    pub classifier: ClassifierConfig,
    pub monitor: MonitorConfig,
}

/// Gel pad geometry: pad extent and terminal placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryConfig {
    pub gel_width_mm: f64,
    pub gel_height_mm: f64,
    pub terminals: Vec<Terminal>,
}

impl GeometryConfig {
    pub fn terminal(&self, name: &str) -> Option<&Terminal> {
        self.terminals.iter().find(|t| t.name == name)
    }
}

impl Default for GeometryConfig {
    fn default() -> Self {
        let corner = |name: &str, channel: u8, x: f64, y: f64| Terminal {
            name: name.to_string(),
            channel,
            x_mm: x,
            y_mm: y,
        };
        Self {
            gel_width_mm: 100.0,
            gel_height_mm: 100.0,
            terminals: vec![
                corner("A", 0, 0.0, 0.0),
                corner("B", 1, 100.0, 0.0),
                corner("C", 2, 100.0, 100.0),
                corner("D", 3, 0.0, 100.0),
            ],
        }
    }
}

/// Excitation parameters and the per-scan pair list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Base excitation frequency [Hz]
    pub frequency_hz: f64,
    /// Excitation amplitude [V]
    pub amplitude_v: f64,
    /// Ordered pair list defining one full scan
    pub pairs: Vec<MeasurementPair>,
    /// Settling interval after a terminal switch [ms]
    pub settle_ms: u64,
    /// Interval between done-status polls [ms]
    pub poll_interval_ms: u64,
    /// Maximum done-status polls before a measurement times out
    pub poll_budget: u32,
    pub sweep: SweepConfig,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1000.0,
            amplitude_v: 0.1,
            pairs: vec![
                MeasurementPair::new("A", "B"),
                MeasurementPair::new("A", "D"),
                MeasurementPair::new("B", "C"),
                MeasurementPair::new("B", "D"),
                MeasurementPair::new("C", "D"),
                MeasurementPair::new("A", "C"),
            ],
            settle_ms: 50,
            poll_interval_ms: 10,
            poll_budget: 500,
            sweep: SweepConfig::default(),
        }
    }
}

/// Frequency sweep parameters for sweep-capable sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub start_hz: f64,
    pub stop_hz: f64,
    pub points: usize,
    /// Settling interval after reprogramming the frequency [ms]
    pub settle_ms: u64,
    pub poll_interval_ms: u64,
    pub poll_budget: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start_hz: 2_000.0,
            stop_hz: 20_000.0,
            points: 50,
            settle_ms: 2,
            poll_interval_ms: 5,
            poll_budget: 200,
        }
    }
}

/// Distance-attenuation simulator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Untouched-pad impedance [ohm]
    pub base_impedance_ohm: f64,
    /// Scale of the distance-dependent impedance change
    pub distance_factor: f64,
    /// Gaussian noise standard deviation as a fraction of magnitude
    pub noise_level: f64,
    /// Fixed RNG seed; None seeds from entropy
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_impedance_ohm: 1000.0,
            distance_factor: 50.0,
            noise_level: 0.01,
            seed: None,
        }
    }
}

/// State-synchronization server/client parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub host: String,
    pub port: u16,
    pub ground_truth_mode: GroundTruthMode,
    pub connect_timeout_ms: u64,
    pub measure_timeout_ms: u64,
    pub state_timeout_ms: u64,
}

impl SyncConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            ground_truth_mode: GroundTruthMode::Cached,
            connect_timeout_ms: 5_000,
            measure_timeout_ms: 3_000,
            state_timeout_ms: 1_000,
        }
    }
}

/// Classifier sizing and training parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub hidden_layers: Vec<usize>,
    pub max_iter: usize,
    pub test_ratio: f64,
    pub seed: u64,
    /// Grid cell centers for the 9-point classifier, row-major
    pub grid_positions: Vec<(f64, f64)>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![32, 16],
            max_iter: 2000,
            test_ratio: 0.2,
            seed: 42,
            grid_positions: default_grid_positions(100.0, 100.0, 3),
        }
    }
}

/// Row-major grid cell centers spaced evenly inside the pad
pub fn default_grid_positions(width_mm: f64, height_mm: f64, grid_size: usize) -> Vec<(f64, f64)> {
    let step_x = width_mm / (grid_size + 1) as f64;
    let step_y = height_mm / (grid_size + 1) as f64;
    let mut positions = Vec::with_capacity(grid_size * grid_size);
    for row in 0..grid_size {
        for col in 0..grid_size {
            positions.push((step_x * (col + 1) as f64, step_y * (row + 1) as f64));
        }
    }
    positions
}

/// Monitor loop scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Tick interval [ms]
    pub interval_ms: u64,
    /// Pair index used for compact-mode classification
    pub pair_index: usize,
    /// Sweep + spectral features instead of a single-pair measurement
    pub use_sweep: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            pair_index: 0,
            use_sweep: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: SourceMode::Simulator,
            geometry: GeometryConfig::default(),
            measurement: MeasurementConfig::default(),
            simulation: SimulationConfig::default(),
            sync: SyncConfig::default(),
            classifier: ClassifierConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    ///
    /// Falls back to defaults (with a warning) if the file is missing or
    /// cannot be parsed, so a bare checkout still runs the simulator.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.source, SourceMode::Simulator);
        assert_eq!(config.geometry.terminals.len(), 4);
        assert_eq!(config.measurement.pairs.len(), 6);
        assert_eq!(config.measurement.poll_budget, 500);
        assert_eq!(config.classifier.hidden_layers, vec![32, 16]);
        assert_eq!(config.monitor.interval_ms, 200);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.source, config.source);
        assert_eq!(parsed.measurement.pairs, config.measurement.pairs);
        assert_eq!(parsed.sync.port, config.sync.port);
    }

    #[test]
    fn test_terminal_lookup() {
        let geometry = GeometryConfig::default();
        assert_eq!(geometry.terminal("C").unwrap().position(), (100.0, 100.0));
        assert!(geometry.terminal("E").is_none());
    }

    #[test]
    fn test_default_grid_positions() {
        let grid = default_grid_positions(100.0, 100.0, 3);
        assert_eq!(grid.len(), 9);
        assert_eq!(grid[0], (25.0, 25.0));
        assert_eq!(grid[4], (50.0, 50.0));
        assert_eq!(grid[8], (75.0, 75.0));
    }
}
