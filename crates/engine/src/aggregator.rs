//! KPI aggregation over simulation results
//!
//! Applies every registered reducer to a result's trajectory table and
//! merges in any KPIs the simulation computed itself. Model-reported values
//! win on name collision: a simulation that already knows its peak is more
//! authoritative than a redundant column reduction of the same name.

use std::collections::BTreeMap;
use tracing::warn;

use sim_optimizer_types::{ColumnOp, DispatchError, KpiSpec, RowFilter, SimulationResult, Table};

use crate::errors::{EngineError, Result};

/// Named KPI reducers plus the single objective designation
#[derive(Debug, Default)]
pub struct KpiAggregator {
    kpis: Vec<(String, KpiSpec)>,
    objective: Option<(String, bool)>,
}

impl KpiAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a KPI; names are unique
    pub fn add_kpi(&mut self, name: impl Into<String>, spec: KpiSpec) -> Result<()> {
        let name = name.into();
        if self.kpis.iter().any(|(n, _)| *n == name) {
            return Err(EngineError::DuplicateKpi(name));
        }
        self.kpis.push((name, spec));
        Ok(())
    }

    /// Register a KPI only if the name is still free
    ///
    /// Used when folding in model-declared definitions under user-declared
    /// ones.
    pub fn add_kpi_if_absent(&mut self, name: impl Into<String>, spec: KpiSpec) {
        let name = name.into();
        if !self.kpis.iter().any(|(n, _)| *n == name) {
            self.kpis.push((name, spec));
        }
    }

    /// Designate the objective KPI; allowed exactly once
    pub fn set_objective(&mut self, name: impl Into<String>, maximize: bool) -> Result<()> {
        let name = name.into();
        if let Some((existing, _)) = &self.objective {
            return Err(EngineError::ObjectiveAlreadySet(existing.clone()));
        }
        if !self.kpis.iter().any(|(n, _)| *n == name) {
            return Err(EngineError::UnknownKpi(name));
        }
        self.objective = Some((name, maximize));
        Ok(())
    }

    /// The objective name and direction, if set
    pub fn objective(&self) -> Option<(&str, bool)> {
        self.objective
            .as_ref()
            .map(|(name, maximize)| (name.as_str(), *maximize))
    }

    pub fn kpi_names(&self) -> Vec<&str> {
        self.kpis.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.kpis.is_empty()
    }

    /// Run every reducer and merge with the result's own KPIs
    ///
    /// Pure function of the result: applying it twice yields the same map.
    pub fn apply(&self, result: &SimulationResult) -> BTreeMap<String, f64> {
        let mut kpis = BTreeMap::new();

        for (name, spec) in &self.kpis {
            kpis.insert(name.clone(), evaluate(spec, &result.time_series));
        }

        // Simulation-computed KPIs take precedence over same-named reducers.
        for (name, value) in &result.kpis {
            kpis.insert(name.clone(), *value);
        }

        kpis
    }

    /// Extract the objective; missing or NaN means the iteration failed
    pub fn objective_value(
        &self,
        kpis: &BTreeMap<String, f64>,
    ) -> std::result::Result<f64, DispatchError> {
        let (name, _) = self
            .objective
            .as_ref()
            .ok_or_else(|| DispatchError::KpiUnavailable("no objective configured".to_string()))?;

        match kpis.get(name) {
            Some(value) if value.is_nan() => {
                Err(DispatchError::KpiUnavailable(format!("{} is NaN", name)))
            }
            Some(value) => Ok(*value),
            None => Err(DispatchError::KpiUnavailable(format!("{} missing", name))),
        }
    }
}

/// Evaluate one spec against a trajectory table
fn evaluate(spec: &KpiSpec, table: &Table) -> f64 {
    match spec {
        KpiSpec::Column { column, op, filter } => reduce_column(table, column, *op, filter.as_ref()),
        KpiSpec::Custom(f) => f(table),
    }
}

/// Reduce one column after the optional row filter
fn reduce_column(table: &Table, column: &str, op: ColumnOp, filter: Option<&RowFilter>) -> f64 {
    let values = match filtered_column(table, column, filter) {
        Some(values) => values,
        None => {
            warn!(column, "KPI column not found in simulation output");
            return f64::NAN;
        }
    };

    let finite: Vec<f64> = values.iter().cloned().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }

    match op {
        ColumnOp::Max => finite.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ColumnOp::Min => finite.iter().cloned().fold(f64::INFINITY, f64::min),
        ColumnOp::Mean => finite.iter().sum::<f64>() / finite.len() as f64,
        ColumnOp::Sum => finite.iter().sum(),
        ColumnOp::Std => sample_std(&finite),
        // Final reads the last row as-is, NaN cells included
        ColumnOp::Final => *values.last().expect("non-empty checked above"),
    }
}

/// Column values surviving the filter; None when the column is missing
fn filtered_column(table: &Table, column: &str, filter: Option<&RowFilter>) -> Option<Vec<f64>> {
    let values = table.numeric_column(column)?;

    match filter {
        None => Some(values),
        Some(filter) => {
            let filter_values = match table.numeric_column(&filter.column) {
                Some(values) => values,
                None => {
                    warn!(column = %filter.column, "filter column not found, filter skipped");
                    return Some(values);
                }
            };
            Some(
                values
                    .into_iter()
                    .zip(filter_values)
                    .filter(|(_, f)| !f.is_nan() && filter.op.evaluate(*f, filter.value))
                    .map(|(v, _)| v)
                    .collect(),
            )
        }
    }
}

/// Sample standard deviation with one degree of freedom; NaN below n = 2
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (sum_sq / (n - 1.0)).sqrt()
}
