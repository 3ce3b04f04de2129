// geltouch - gel-pad impedance touch sensing core
//
// Estimates touch/press events from electrical impedance measured across a
// capacitive gel pad. Measurements come from real analyzer hardware or
// from a hardware-in-the-loop simulator (local or networked); a frequency
// sweep can be reduced to spectral features; a trainable classifier with
// online baseline-drift calibration turns features into press decisions.

// Module declarations
pub mod analysis;
pub mod config;
pub mod error;
pub mod measurement;
pub mod monitor;
pub mod physics;
pub mod source;
pub mod sync;

// Re-exports for the binaries and external consumers
pub use analysis::PressClassifier;
pub use config::AppConfig;
pub use measurement::{FeatureMode, FeatureVector, ImpedanceSample, SweepResult};
pub use monitor::{Monitor, MonitorEvent};
pub use source::{create_data_source, DataSource, DeviceRegistry, SweepCapable};

/// Initialize logging from RUST_LOG for binaries
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env().try_init();
}
