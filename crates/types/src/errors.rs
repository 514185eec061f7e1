//! Dispatch error taxonomy
//!
//! Every failure a simulation run can produce, as surfaced in iteration
//! records and step events. `kind` yields the stable wire identifier,
//! `is_retryable` encodes which failures a retry policy may re-attempt.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Parameter validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to spawn simulation process: {0}")]
    SpawnFailed(String),

    #[error("Simulation exceeded its deadline")]
    Timeout,

    #[error("Simulation was cancelled")]
    Cancelled,

    #[error("Simulation exited with status {code:?}: {stderr}")]
    ExitNonZero { code: Option<i32>, stderr: String },

    #[error("Failed to parse simulation output: {0}")]
    ParseFailed(String),

    #[error("Model raised an internal error: {0}")]
    ModelInternal(String),

    #[error("Objective KPI unavailable: {0}")]
    KpiUnavailable(String),
}

impl DispatchError {
    /// Stable identifier used in records and progress events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "validation-failed",
            Self::SpawnFailed(_) => "spawn-failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ExitNonZero { .. } => "exit-nonzero",
            Self::ParseFailed(_) => "parse-failed",
            Self::ModelInternal(_) => "model-internal",
            Self::KpiUnavailable(_) => "kpi-unavailable",
        }
    }

    /// Whether a retry policy may re-attempt after this failure
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SpawnFailed(_)
            | Self::Timeout
            | Self::ExitNonZero { .. }
            | Self::ParseFailed(_)
            | Self::ModelInternal(_) => true,
            Self::ValidationFailed(_) | Self::Cancelled | Self::KpiUnavailable(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_identifiers() {
        assert_eq!(
            DispatchError::ValidationFailed("x".into()).kind(),
            "validation-failed"
        );
        assert_eq!(DispatchError::Timeout.kind(), "timeout");
        assert_eq!(DispatchError::Cancelled.kind(), "cancelled");
        assert_eq!(
            DispatchError::ExitNonZero {
                code: Some(1),
                stderr: String::new()
            }
            .kind(),
            "exit-nonzero"
        );
        assert_eq!(
            DispatchError::KpiUnavailable("score".into()).kind(),
            "kpi-unavailable"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(DispatchError::Timeout.is_retryable());
        assert!(DispatchError::SpawnFailed("no such file".into()).is_retryable());
        assert!(DispatchError::ParseFailed("bad csv".into()).is_retryable());
        assert!(!DispatchError::Cancelled.is_retryable());
        assert!(!DispatchError::ValidationFailed("out of range".into()).is_retryable());
        assert!(!DispatchError::KpiUnavailable("score".into()).is_retryable());
    }
}
