// Error types and error handling module
// This file defines the error taxonomy shared by the counter store client,
// the recorder, the stats query service and the reset service
//
// Numan Thabit 2025 Nov

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("counter store operation {op} timed out after {after:?}")]
    StoreTimeout { op: &'static str, after: Duration },
    #[error("malformed entry: {0}")]
    MalformedEntry(String),
    #[error("partial aggregation, failed groups: {}", .0.join(", "))]
    PartialAggregation(Vec<&'static str>),
    #[error("counter store command error: {0}")]
    Command(String),
}

impl TelemetryError {
    /// Short label used for the `kind` dimension of store error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryError::StoreUnavailable(_) => "unavailable",
            TelemetryError::StoreTimeout { .. } => "timeout",
            TelemetryError::MalformedEntry(_) => "malformed",
            TelemetryError::PartialAggregation(_) => "partial",
            TelemetryError::Command(_) => "command",
        }
    }

    /// Whether the error means the connection itself is unusable.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            TelemetryError::StoreUnavailable(_) | TelemetryError::StoreTimeout { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, TelemetryError>;
