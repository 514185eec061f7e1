//! In-process model backend
//!
//! Wraps a user-supplied model object so the controller can drive it through
//! the same `SimulationRunner` contract as subprocess simulations. Model
//! calls run on the blocking thread pool; the dispatcher stops waiting on
//! deadline or cancellation even though the model itself keeps the blocking
//! thread until it returns.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use sim_optimizer_types::{
    DispatchError, KpiSpec, ParameterSpace, ParameterVector, SimulationResult, Table,
};

use crate::context::RunContext;
use crate::runner::SimulationRunner;

/// What a model call may return
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// A fully formed result, possibly with model-computed KPIs
    Result(SimulationResult),
    /// A bare trajectory; the runner wraps it into a result
    Table(Table),
}

/// Capability set for in-process simulation models
pub trait Model: Send + Sync {
    /// Run one simulation; blocking is fine, the runner offloads the call
    fn run(&self, params: &ParameterVector) -> anyhow::Result<ModelOutput>;

    /// The space this model is searchable over
    fn parameter_space(&self) -> ParameterSpace;

    /// KPI reducers the model wants applied to its output
    fn kpi_definitions(&self) -> Vec<(String, KpiSpec)> {
        Vec::new()
    }

    /// Model-specific validation beyond the space check
    fn validate_parameters(&self, params: &ParameterVector) -> Result<(), String> {
        self.parameter_space()
            .validate(params)
            .map_err(|issues| {
                issues
                    .iter()
                    .map(|i| format!("{}: {}", i.name, i.message))
                    .collect::<Vec<_>>()
                    .join("; ")
            })
    }

    /// Free-form model metadata merged into each result
    fn metadata(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }
}

/// Dispatch backend invoking a model in this process
pub struct InProcessRunner {
    model: Arc<dyn Model>,
}

impl InProcessRunner {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<dyn Model> {
        &self.model
    }
}

#[async_trait]
impl SimulationRunner for InProcessRunner {
    async fn run(
        &self,
        params: &ParameterVector,
        ctx: &RunContext,
    ) -> Result<SimulationResult, DispatchError> {
        if let Err(message) = self.model.validate_parameters(params) {
            return Err(DispatchError::ValidationFailed(message));
        }

        debug!(attempt = ctx.attempt, "invoking in-process model");

        let model = self.model.clone();
        let call_params = params.clone();
        let call = tokio::task::spawn_blocking(move || model.run(&call_params));

        let joined = match ctx.deadline {
            Some(deadline) => tokio::select! {
                joined = call => joined,
                _ = tokio::time::sleep(deadline) => {
                    warn!("in-process model exceeded its deadline");
                    return Err(DispatchError::Timeout);
                }
                _ = ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
            },
            None => tokio::select! {
                joined = call => joined,
                _ = ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
            },
        };

        let output = joined
            .map_err(|e| DispatchError::ModelInternal(format!("model task panicked: {}", e)))?
            .map_err(|e| DispatchError::ModelInternal(e.to_string()))?;

        let mut result = match output {
            ModelOutput::Result(result) => result,
            ModelOutput::Table(table) => SimulationResult::new(table, params.clone()),
        };

        // Preserve the dispatched vector and fold in model metadata without
        // overriding anything the model already recorded.
        result.parameters = params.clone();
        for (key, value) in self.model.metadata() {
            result.metadata.entry(key).or_insert(value);
        }

        Ok(result)
    }
}
