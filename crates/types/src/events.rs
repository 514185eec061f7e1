//! Progress event wire types
//!
//! These serialize to the JSON shapes the external stream boundary (SSE or
//! otherwise) forwards verbatim, so field names follow the wire convention
//! rather than Rust style.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::space::ParameterVector;

/// Summary carried by the `complete` event and the final results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    #[serde(rename = "bestParameters")]
    pub best_parameters: Option<ParameterVector>,
    #[serde(rename = "bestKPIs")]
    pub best_kpis: BTreeMap<String, f64>,
    pub iterations: u64,
    #[serde(rename = "elapsedTime")]
    pub elapsed_time: f64,
}

/// One event on the progress stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    Step {
        step: u64,
        parameters: ParameterVector,
        kpis: BTreeMap<String, f64>,
        objective_value: Option<f64>,
        elapsed_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Complete {
        result: CompletionSummary,
    },
    Error {
        message: String,
    },
    /// Marker counting events dropped from the head of a full buffer
    Dropped {
        count: u64,
    },
}

impl ProgressEvent {
    /// True for the events that close the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}
