//! Experiment configuration
//!
//! Plain serde-deserializable structs so an outer YAML/JSON layer can feed
//! an experiment without the core knowing about files. Validation happens
//! here; wiring into live components happens in `experiment`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use optimizer::Acquisition;
use sim_optimizer_types::{CmpOp, ColumnOp, ParameterSpace, SimulationResult};

use crate::errors::{EngineError, Result};

/// Which optimization strategy drives the experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMethod {
    Grid,
    Random,
    Bayesian,
}

/// Acquisition function selection for the Bayesian method
pub type AcquisitionSetting = Acquisition;

/// Optimizer block of the experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub method: OptimizerMethod,
    /// Proposal budget for random and Bayesian; ignored by grid
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Warm-up proposals for Bayesian
    #[serde(default)]
    pub initial_points: Option<u64>,
    /// Points per axis for grid
    #[serde(default)]
    pub num_points: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub acquisition: Option<AcquisitionSetting>,
}

fn default_iterations() -> u64 {
    20
}

impl OptimizerSettings {
    pub fn grid(num_points: usize) -> Self {
        Self {
            method: OptimizerMethod::Grid,
            iterations: default_iterations(),
            initial_points: None,
            num_points: Some(num_points),
            seed: None,
            acquisition: None,
        }
    }

    pub fn random(iterations: u64, seed: Option<u64>) -> Self {
        Self {
            method: OptimizerMethod::Random,
            iterations,
            initial_points: None,
            num_points: None,
            seed,
            acquisition: None,
        }
    }

    pub fn bayesian(iterations: u64, seed: Option<u64>) -> Self {
        Self {
            method: OptimizerMethod::Bayesian,
            iterations,
            initial_points: None,
            num_points: None,
            seed,
            acquisition: None,
        }
    }
}

/// What to do when a dispatch attempt fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Re-attempt without jitter, then record the failure
    Raise,
    /// Re-attempt with jittered parameters, then record the failure
    Retry,
    /// Substitute the configured fallback result
    Fallback,
}

impl Default for OnError {
    fn default() -> Self {
        Self::Raise
    }
}

/// Retry behavior per iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total dispatch attempts per iteration, at least 1
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub on_error: OnError,
    /// Result substituted under `Fallback`; its KPIs are recomputed
    #[serde(default)]
    pub fallback_result: Option<SimulationResult>,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            on_error: OnError::default(),
            fallback_result: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, on_error: OnError) -> Self {
        Self {
            max_attempts,
            on_error,
            fallback_result: None,
        }
    }

    pub fn with_fallback(mut self, result: SimulationResult) -> Self {
        self.fallback_result = Some(result);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "retry_policy.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.on_error == OnError::Fallback && self.fallback_result.is_none() {
            return Err(EngineError::InvalidConfig(
                "fallback policy requires a fallback_result".to_string(),
            ));
        }
        Ok(())
    }
}

/// Objective direction in the KPI list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

/// Declarative row filter in a KPI config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub column: String,
    pub op: CmpOp,
    pub value: f64,
}

/// One declarative KPI: a column reducer, optionally the objective
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiConfig {
    pub name: String,
    pub column: String,
    pub operation: ColumnOp,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    /// Present on at most one KPI in the list
    #[serde(default)]
    pub objective: Option<ObjectiveDirection>,
}

/// Everything the experiment constructor recognizes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub parameter_space: ParameterSpace,
    #[serde(default)]
    pub kpis: Vec<KpiConfig>,
    pub optimizer: OptimizerSettings,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Seconds per simulation call; None means no deadline
    #[serde(default)]
    pub per_call_timeout_secs: Option<f64>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Prefix for the result file set
    #[serde(default)]
    pub save_base_path: Option<PathBuf>,
}

fn default_parallelism() -> usize {
    1
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parameter_space.is_empty() {
            return Err(EngineError::InvalidConfig(
                "parameter_space must declare at least one parameter".to_string(),
            ));
        }
        // Deserialized spaces bypass the insert-time checks
        for (name, def) in self.parameter_space.iter() {
            def.spec
                .check(name)
                .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        }
        if self.parallelism == 0 {
            return Err(EngineError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.per_call_timeout_secs {
            if !(secs > 0.0) {
                return Err(EngineError::InvalidConfig(
                    "per_call_timeout_secs must be positive".to_string(),
                ));
            }
        }
        self.retry_policy.validate()?;

        let objectives = self.kpis.iter().filter(|k| k.objective.is_some()).count();
        if objectives > 1 {
            return Err(EngineError::InvalidConfig(
                "at most one KPI may be the objective".to_string(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        for kpi in &self.kpis {
            if !seen.insert(&kpi.name) {
                return Err(EngineError::DuplicateKpi(kpi.name.clone()));
            }
        }

        Ok(())
    }
}
