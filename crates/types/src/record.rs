//! Per-iteration records for the results store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::space::ParameterVector;

/// Outcome of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Ok,
    Failed,
    Cancelled,
}

impl IterationStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One row in the results store
///
/// `step` is assigned at proposal time and is unique per experiment run.
/// `attempts` counts dispatch attempts, including the final one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub step: u64,
    pub parameters: ParameterVector,
    pub kpis: BTreeMap<String, f64>,
    pub objective_value: Option<f64>,
    pub status: IterationStatus,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl IterationRecord {
    pub fn is_ok(&self) -> bool {
        self.status == IterationStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(IterationStatus::Ok.name(), "ok");
        assert_eq!(IterationStatus::Failed.name(), "failed");
        assert_eq!(IterationStatus::Cancelled.name(), "cancelled");
    }

    #[test]
    fn test_error_field_skipped_when_none() {
        let record = IterationRecord {
            step: 1,
            parameters: ParameterVector::new(),
            kpis: BTreeMap::new(),
            objective_value: Some(1.0),
            status: IterationStatus::Ok,
            elapsed_ms: 12,
            error: None,
            attempts: 1,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("error"));
    }
}
