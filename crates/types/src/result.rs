//! Standard simulation result container

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::space::ParameterVector;
use crate::table::Table;

/// The standard container every dispatch backend produces
///
/// Treated as immutable once constructed: each iteration owns the result it
/// produced and readers only ever clone out of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Trajectory table (rows are time steps, columns are state variables)
    pub time_series: Table,
    /// KPIs the simulation computed itself, if any
    pub kpis: BTreeMap<String, f64>,
    /// Free-form run metadata (model version, seeds, wall clock)
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// The parameter vector that produced this result
    pub parameters: ParameterVector,
}

impl SimulationResult {
    /// Wrap a trajectory; stamps a `timestamp` metadata key when absent
    pub fn new(time_series: Table, parameters: ParameterVector) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
        Self {
            time_series,
            kpis: BTreeMap::new(),
            metadata,
            parameters,
        }
    }

    pub fn with_kpis(mut self, kpis: BTreeMap<String, f64>) -> Self {
        self.kpis = kpis;
        self
    }

    pub fn with_kpi(mut self, name: impl Into<String>, value: f64) -> Self {
        self.kpis.insert(name.into(), value);
        self
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn get_kpi(&self, name: &str) -> Option<f64> {
        self.kpis.get(name).copied()
    }
}
