// Data-source error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Data-source error code constants
///
/// These constants provide a single source of truth for error codes shared
/// between the library and operator tooling that filters logs by code.
///
/// Error code range: 1001-1009
pub struct SourceErrorCodes {}

impl SourceErrorCodes {
    /// Operation attempted before connect() succeeded
    pub const NOT_CONNECTED: i32 = 1001;

    /// Device never reached the done state within the poll budget
    pub const MEASUREMENT_TIMEOUT: i32 = 1002;

    /// Terminal switch controller rejected or failed a select command
    pub const SWITCH_FAILURE: i32 = 1003;

    /// Impedance analyzer reported a hardware fault
    pub const ANALYZER_FAILURE: i32 = 1004;

    /// Networked request exceeded its response deadline
    pub const REQUEST_TIMEOUT: i32 = 1005;

    /// Response request id mismatched after one retry
    pub const PROTOCOL_MISMATCH: i32 = 1006;

    /// Socket or channel to the remote simulator closed
    pub const LINK_CLOSED: i32 = 1007;

    /// Spectral extraction requested before any sweep was captured
    pub const SWEEP_MISSING: i32 = 1008;

    /// Measurement pair references a terminal absent from the geometry
    pub const UNKNOWN_TERMINAL: i32 = 1009;
}

/// Log a data-source error with structured context
pub fn log_source_error(err: &SourceError, context: &str) {
    error!(
        "Source error in {}: code={}, stage={}, message={}",
        context,
        err.code(),
        err.stage(),
        err.message()
    );
}

/// Data-source errors
///
/// These errors cover acquisition operations on every source variant:
/// connection management, multiplexed and single-pair measurements,
/// frequency sweeps, and the networked simulator round trips.
///
/// Error code range: 1001-1009
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Operation attempted before connect() succeeded
    NotConnected,

    /// Device never reached the done state within the poll budget
    MeasurementTimeout { polls: u32 },

    /// Terminal switch controller rejected or failed a select command
    SwitchFailure { details: String },

    /// Impedance analyzer reported a hardware fault
    AnalyzerFailure { details: String },

    /// Networked request exceeded its response deadline
    RequestTimeout { operation: String, timeout_ms: u64 },

    /// Response request id mismatched after one retry
    ProtocolMismatch { expected: String, received: String },

    /// Socket or channel to the remote simulator closed
    LinkClosed { reason: String },

    /// Spectral extraction requested before any sweep was captured
    SweepMissing,

    /// Measurement pair references a terminal absent from the geometry
    UnknownTerminal { name: String },
}

impl ErrorCode for SourceError {
    fn code(&self) -> i32 {
        match self {
            SourceError::NotConnected => SourceErrorCodes::NOT_CONNECTED,
            SourceError::MeasurementTimeout { .. } => SourceErrorCodes::MEASUREMENT_TIMEOUT,
            SourceError::SwitchFailure { .. } => SourceErrorCodes::SWITCH_FAILURE,
            SourceError::AnalyzerFailure { .. } => SourceErrorCodes::ANALYZER_FAILURE,
            SourceError::RequestTimeout { .. } => SourceErrorCodes::REQUEST_TIMEOUT,
            SourceError::ProtocolMismatch { .. } => SourceErrorCodes::PROTOCOL_MISMATCH,
            SourceError::LinkClosed { .. } => SourceErrorCodes::LINK_CLOSED,
            SourceError::SweepMissing => SourceErrorCodes::SWEEP_MISSING,
            SourceError::UnknownTerminal { .. } => SourceErrorCodes::UNKNOWN_TERMINAL,
        }
    }

    fn message(&self) -> String {
        match self {
            SourceError::NotConnected => {
                "Data source not connected. Call connect() first.".to_string()
            }
            SourceError::MeasurementTimeout { polls } => {
                format!("Device never reached done state after {} polls", polls)
            }
            SourceError::SwitchFailure { details } => {
                format!("Terminal switch failure: {}", details)
            }
            SourceError::AnalyzerFailure { details } => {
                format!("Impedance analyzer failure: {}", details)
            }
            SourceError::RequestTimeout {
                operation,
                timeout_ms,
            } => {
                format!("No {} response within {} ms", operation, timeout_ms)
            }
            SourceError::ProtocolMismatch { expected, received } => {
                format!(
                    "Response request id mismatch after retry (expected {}, received {})",
                    expected, received
                )
            }
            SourceError::LinkClosed { reason } => {
                format!("Link to remote simulator closed: {}", reason)
            }
            SourceError::SweepMissing => {
                "No sweep captured yet. Run sweep_impedance() first.".to_string()
            }
            SourceError::UnknownTerminal { name } => {
                format!("Measurement pair references unknown terminal '{}'", name)
            }
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            SourceError::NotConnected
            | SourceError::LinkClosed { .. }
            | SourceError::UnknownTerminal { .. } => "connect",
            SourceError::MeasurementTimeout { .. }
            | SourceError::SwitchFailure { .. }
            | SourceError::AnalyzerFailure { .. }
            | SourceError::RequestTimeout { .. }
            | SourceError::ProtocolMismatch { .. } => "measure",
            SourceError::SweepMissing => "extract",
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::LinkClosed {
            reason: err.to_string(),
        }
    }
}
