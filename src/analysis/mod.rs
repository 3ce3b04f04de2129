// Analysis module - feature extraction and press classification
//
// Turns raw acquisition output into classification decisions:
// - Sweep -> reactance peak and 10-D spectral features (spectral.rs)
// - Feature standardization with drift-corrected copies (scaler.rs)
// - Seeded trainable MLP (mlp.rs)
// - PressClassifier tying buffer, training, inference, calibration, and
//   persistence together (classifier.rs)

pub mod classifier;
pub mod mlp;
pub mod scaler;
pub mod spectral;

pub use classifier::{CalibrationReport, PressClassifier, TrainingReport};
pub use scaler::StandardScaler;
pub use spectral::{
    extract_spectral_features, find_reactance_peak, ReactancePeak, SpectralFeatures,
};
