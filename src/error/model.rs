// Classifier error types and constants

use crate::error::ErrorCode;
use crate::measurement::FeatureMode;
use log::error;
use std::fmt;

/// Classifier error code constants
///
/// Error code range: 2001-2007
pub struct ModelErrorCodes {}

impl ModelErrorCodes {
    /// Fewer training samples than the required minimum
    pub const INSUFFICIENT_DATA: i32 = 2001;

    /// Training buffer contains only one class
    pub const SINGLE_CLASS: i32 = 2002;

    /// Inference attempted before training or loading a model
    pub const NOT_READY: i32 = 2003;

    /// Feature vector mode differs from the trained mode
    pub const FEATURE_MODE_MISMATCH: i32 = 2004;

    /// No baseline samples available to calibrate against
    pub const CALIBRATION_UNAVAILABLE: i32 = 2005;

    /// Model artifact could not be read or written
    pub const STORAGE: i32 = 2006;

    /// Persisted artifact uses an unsupported schema version
    pub const SCHEMA_VERSION: i32 = 2007;
}

/// Log a classifier error with structured context
pub fn log_model_error(err: &ModelError, context: &str) {
    error!(
        "Model error in {}: code={}, stage={}, message={}",
        context,
        err.code(),
        err.stage(),
        err.message()
    );
}

/// Classifier errors
///
/// These errors cover training preconditions, inference readiness, drift
/// calibration, and artifact persistence.
///
/// Error code range: 2001-2007
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Fewer training samples than the required minimum
    InsufficientData { collected: usize, required: usize },

    /// Training buffer contains only one class
    SingleClass { label: u8 },

    /// Inference attempted before training or loading a model
    NotReady,

    /// Feature vector mode differs from the trained mode
    FeatureModeMismatch {
        trained: FeatureMode,
        given: FeatureMode,
    },

    /// No baseline samples available to calibrate against
    CalibrationUnavailable,

    /// Model artifact could not be read or written
    Storage { reason: String },

    /// Persisted artifact uses an unsupported schema version
    SchemaVersion { found: u32, supported: u32 },
}

impl ErrorCode for ModelError {
    fn code(&self) -> i32 {
        match self {
            ModelError::InsufficientData { .. } => ModelErrorCodes::INSUFFICIENT_DATA,
            ModelError::SingleClass { .. } => ModelErrorCodes::SINGLE_CLASS,
            ModelError::NotReady => ModelErrorCodes::NOT_READY,
            ModelError::FeatureModeMismatch { .. } => ModelErrorCodes::FEATURE_MODE_MISMATCH,
            ModelError::CalibrationUnavailable => ModelErrorCodes::CALIBRATION_UNAVAILABLE,
            ModelError::Storage { .. } => ModelErrorCodes::STORAGE,
            ModelError::SchemaVersion { .. } => ModelErrorCodes::SCHEMA_VERSION,
        }
    }

    fn message(&self) -> String {
        match self {
            ModelError::InsufficientData {
                collected,
                required,
            } => {
                format!(
                    "Not enough training samples: {} collected, {} required",
                    collected, required
                )
            }
            ModelError::SingleClass { label } => {
                format!(
                    "Training requires both classes (only label {} present)",
                    label
                )
            }
            ModelError::NotReady => {
                "Model not trained or loaded. Call train() or load() first.".to_string()
            }
            ModelError::FeatureModeMismatch { trained, given } => {
                format!(
                    "Feature mode mismatch: model trained with {:?}, got {:?}",
                    trained, given
                )
            }
            ModelError::CalibrationUnavailable => {
                "No baseline feature samples provided for calibration".to_string()
            }
            ModelError::Storage { reason } => {
                format!("Model storage failure: {}", reason)
            }
            ModelError::SchemaVersion { found, supported } => {
                format!(
                    "Unsupported artifact schema version {} (supported: {})",
                    found, supported
                )
            }
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            ModelError::InsufficientData { .. } | ModelError::SingleClass { .. } => "train",
            ModelError::NotReady | ModelError::FeatureModeMismatch { .. } => "classify",
            ModelError::CalibrationUnavailable => "calibrate",
            ModelError::Storage { .. } | ModelError::SchemaVersion { .. } => "persist",
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for ModelError {}

impl From<std::io::Error> for ModelError {
    fn from(err: std::io::Error) -> Self {
        ModelError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Storage {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_codes() {
        assert_eq!(
            ModelError::InsufficientData {
                collected: 3,
                required: 4
            }
            .code(),
            ModelErrorCodes::INSUFFICIENT_DATA
        );
        assert_eq!(
            ModelError::SingleClass { label: 1 }.code(),
            ModelErrorCodes::SINGLE_CLASS
        );
        assert_eq!(ModelError::NotReady.code(), ModelErrorCodes::NOT_READY);
        assert_eq!(
            ModelError::FeatureModeMismatch {
                trained: FeatureMode::Compact,
                given: FeatureMode::Spectral
            }
            .code(),
            ModelErrorCodes::FEATURE_MODE_MISMATCH
        );
    }

    #[test]
    fn test_model_error_stages() {
        assert_eq!(
            ModelError::InsufficientData {
                collected: 0,
                required: 4
            }
            .stage(),
            "train"
        );
        assert_eq!(ModelError::NotReady.stage(), "classify");
        assert_eq!(ModelError::CalibrationUnavailable.stage(), "calibrate");
        assert_eq!(
            ModelError::SchemaVersion {
                found: 2,
                supported: 1
            }
            .stage(),
            "persist"
        );
    }

    #[test]
    fn test_model_error_messages() {
        let err = ModelError::InsufficientData {
            collected: 3,
            required: 4,
        };
        assert!(err.message().contains("3 collected"));
        assert!(err.message().contains("4 required"));

        let err = ModelError::FeatureModeMismatch {
            trained: FeatureMode::Spectral,
            given: FeatureMode::Compact,
        };
        assert!(err.message().contains("Spectral"));
        assert!(err.message().contains("Compact"));
    }
}
