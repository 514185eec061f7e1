//! Append-only results store
//!
//! Holds every iteration record for one experiment run, keyed by step,
//! serves best-record queries and summary statistics, and exports the
//! flattened CSV/JSON result files.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

use sim_optimizer_types::IterationRecord;

use crate::errors::{EngineError, Result};

/// Per-KPI summary statistics over ok iterations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// Append-only log of iteration records
///
/// Records are kept ordered by step regardless of completion order; the
/// controller is the single writer, readers may snapshot concurrently.
#[derive(Debug, Default)]
pub struct ResultsStore {
    records: RwLock<Vec<IterationRecord>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one record at its step position
    ///
    /// Steps are unique; appending a duplicate step is an error.
    pub fn append(&self, record: IterationRecord) -> Result<()> {
        let mut records = self.records.write().expect("results store lock poisoned");
        match records.binary_search_by_key(&record.step, |r| r.step) {
            Ok(_) => Err(EngineError::InvalidState(format!(
                "step {} already recorded",
                record.step
            ))),
            Err(position) => {
                records.insert(position, record);
                Ok(())
            }
        }
    }

    /// Snapshot of all records in step order
    pub fn all(&self) -> Vec<IterationRecord> {
        self.records.read().expect("results store lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("results store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best ok record for the objective, NaN excluded, earliest step on ties
    pub fn best(&self, objective: &str, maximize: bool) -> Option<IterationRecord> {
        let records = self.records.read().expect("results store lock poisoned");
        let mut best: Option<&IterationRecord> = None;

        for record in records.iter().filter(|r| r.is_ok()) {
            let value = match record.kpis.get(objective) {
                Some(v) if !v.is_nan() => *v,
                _ => continue,
            };
            let better = match best {
                None => true,
                Some(current) => {
                    let current_value = current.kpis[objective];
                    if maximize {
                        value > current_value
                    } else {
                        value < current_value
                    }
                }
            };
            if better {
                best = Some(record);
            }
        }

        best.cloned()
    }

    /// Min/max/mean/std per KPI over ok iterations
    pub fn summary(&self) -> BTreeMap<String, KpiSummary> {
        let records = self.records.read().expect("results store lock poisoned");
        let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for record in records.iter().filter(|r| r.is_ok()) {
            for (name, value) in &record.kpis {
                if !value.is_nan() {
                    values.entry(name.clone()).or_default().push(*value);
                }
            }
        }

        values
            .into_iter()
            .map(|(name, values)| {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let std = if values.len() < 2 {
                    0.0
                } else {
                    (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0))
                        .sqrt()
                };
                let summary = KpiSummary {
                    min: values.iter().cloned().fold(f64::INFINITY, f64::min),
                    max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    mean,
                    std,
                    count: values.len(),
                };
                (name, summary)
            })
            .collect()
    }

    /// Write one CSV row per record, parameters and KPIs flattened
    ///
    /// Columns: `step, status, attempts, elapsed_ms, objective_value,
    /// param_<name>..., kpi_<name>..., error`.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let records = self.records.read().expect("results store lock poisoned");

        let mut param_names: BTreeSet<String> = BTreeSet::new();
        let mut kpi_names: BTreeSet<String> = BTreeSet::new();
        for record in records.iter() {
            param_names.extend(record.parameters.iter().map(|(n, _)| n.clone()));
            kpi_names.extend(record.kpis.keys().cloned());
        }

        let mut out = String::new();
        out.push_str("step,status,attempts,elapsed_ms,objective_value");
        for name in &param_names {
            out.push_str(&format!(",param_{}", name));
        }
        for name in &kpi_names {
            out.push_str(&format!(",kpi_{}", name));
        }
        out.push_str(",error\n");

        for record in records.iter() {
            out.push_str(&format!(
                "{},{},{},{},{}",
                record.step,
                record.status.name(),
                record.attempts,
                record.elapsed_ms,
                record
                    .objective_value
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            ));
            for name in &param_names {
                out.push(',');
                if let Some(value) = record.parameters.get(name) {
                    out.push_str(&csv_escape(&value.to_string()));
                }
            }
            for name in &kpi_names {
                out.push(',');
                if let Some(value) = record.kpis.get(name) {
                    out.push_str(&value.to_string());
                }
            }
            out.push(',');
            if let Some(error) = &record.error {
                out.push_str(&csv_escape(error));
            }
            out.push('\n');
        }

        std::fs::write(path, out)?;
        info!(path = %path.display(), rows = records.len(), "wrote iteration log");
        Ok(())
    }

    /// Write all records as a JSON array
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let records = self.records.read().expect("results store lock poisoned");
        let json = serde_json::to_string_pretty(&*records)
            .map_err(|e| EngineError::ExportFailed(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write the standard result file set at `<base>_iterations.csv`,
    /// `<base>_best.json`, and `<base>_summary.json`
    pub fn write_result_files(
        &self,
        base: &Path,
        objective: &str,
        maximize: bool,
        elapsed_seconds: f64,
    ) -> Result<()> {
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let with_suffix = |suffix: &str| {
            let mut name = base.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            name.push(suffix);
            base.with_file_name(name)
        };

        self.export_csv(&with_suffix("_iterations.csv"))?;

        let best = self.best(objective, maximize);
        let best_json = serde_json::json!({
            "bestParameters": best.as_ref().map(|r| &r.parameters),
            "bestKPIs": best.as_ref().map(|r| &r.kpis),
            "iterations": self.len(),
            "elapsedTime": elapsed_seconds,
        });
        std::fs::write(
            with_suffix("_best.json"),
            serde_json::to_string_pretty(&best_json)
                .map_err(|e| EngineError::ExportFailed(e.to_string()))?,
        )?;

        std::fs::write(
            with_suffix("_summary.json"),
            serde_json::to_string_pretty(&self.summary())
                .map_err(|e| EngineError::ExportFailed(e.to_string()))?,
        )?;

        info!(base = %base.display(), "wrote result files");
        Ok(())
    }
}

/// Quote a CSV field when it needs it
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
