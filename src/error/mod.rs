// Error types for the impedance sensing pipeline
//
// This module defines custom error types for data-source and classifier
// operations, providing structured error handling with error codes suitable
// for operator-facing diagnostics.

mod model;
mod source;

pub use model::{log_model_error, ModelError, ModelErrorCodes};
pub use source::{log_source_error, SourceError, SourceErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes, messages, and the
/// pipeline stage an error belongs to, so operators can tell a hardware
/// problem (connect/measure) apart from a model problem (train/classify)
/// from a single log line.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;

    /// Get the pipeline stage this error belongs to
    fn stage(&self) -> &'static str;
}
