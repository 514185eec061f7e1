//! The single run-simulation contract

use async_trait::async_trait;
use sim_optimizer_types::{DispatchError, ParameterVector, SimulationResult};

use crate::context::RunContext;

/// Capability every dispatch backend provides
///
/// The controller sees only this trait; whether a call runs an in-process
/// model or spawns a subprocess is a construction-time choice.
#[async_trait]
pub trait SimulationRunner: Send + Sync {
    /// Evaluate one parameter vector under the given context
    async fn run(
        &self,
        params: &ParameterVector,
        ctx: &RunContext,
    ) -> Result<SimulationResult, DispatchError>;
}
