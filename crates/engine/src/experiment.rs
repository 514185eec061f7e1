//! Experiment assembly
//!
//! The builder wires a parameter space, KPI aggregator, dispatch backend,
//! and optimizer into a ready-to-run controller. In-process models can
//! contribute their own parameter space and KPI definitions; declarative
//! configurations map onto the same builder.

use std::sync::Arc;
use tracing::info;

use dispatch::{InProcessRunner, Model, SimulationRunner, SubprocessConfig, SubprocessRunner};
use optimizer::{
    BayesianConfig, BayesianOptimizer, GridOptimizer, Objective, Optimizer, RandomOptimizer,
};
use sim_optimizer_types::{ColumnOp, KpiSpec, ParameterSpace, RowFilter};

use crate::aggregator::KpiAggregator;
use crate::config::{ExperimentConfig, ObjectiveDirection, OptimizerMethod, OptimizerSettings};
use crate::controller::{CancelHandle, ExperimentController, FinalResults, RunOptions};
use crate::errors::{EngineError, Result};
use crate::progress::ProgressReceiver;
use crate::store::ResultsStore;

/// A fully wired experiment, ready to run once
pub struct Experiment {
    controller: ExperimentController,
    receiver: Option<ProgressReceiver>,
    default_options: RunOptions,
}

impl Experiment {
    pub fn builder() -> ExperimentBuilder {
        ExperimentBuilder::default()
    }

    /// Build from a declarative configuration and a dispatch backend
    pub fn from_config(
        config: &ExperimentConfig,
        runner: Arc<dyn SimulationRunner>,
    ) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder()
            .parameter_space(config.parameter_space.clone())
            .runner(runner)
            .optimizer(config.optimizer.clone());

        for kpi in &config.kpis {
            let spec = match &kpi.filter {
                None => KpiSpec::column(&kpi.column, kpi.operation),
                Some(filter) => KpiSpec::filtered(
                    &kpi.column,
                    kpi.operation,
                    RowFilter::new(&filter.column, filter.op, filter.value),
                ),
            };
            builder = builder.add_kpi(&kpi.name, spec)?;
            if let Some(direction) = kpi.objective {
                builder =
                    builder.objective(&kpi.name, direction == ObjectiveDirection::Maximize);
            }
        }

        let mut options = RunOptions::default().with_parallelism(config.parallelism);
        options.retry_policy = config.retry_policy.clone();
        if let Some(secs) = config.per_call_timeout_secs {
            options.per_call_timeout = Some(std::time::Duration::from_secs_f64(secs));
        }
        options.save_base_path = config.save_base_path.clone();

        let mut experiment = builder.build()?;
        experiment.default_options = options;
        Ok(experiment)
    }

    /// Take the progress receiver; available once
    pub fn take_progress(&mut self) -> Option<ProgressReceiver> {
        self.receiver.take()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.controller.cancel_handle()
    }

    pub fn store(&self) -> Arc<ResultsStore> {
        self.controller.store()
    }

    /// Run with explicit options
    pub async fn run(&self, options: RunOptions) -> Result<FinalResults> {
        self.controller.run(options).await
    }

    /// Run with the options derived at construction time
    pub async fn run_with_defaults(&self) -> Result<FinalResults> {
        self.controller.run(self.default_options.clone()).await
    }
}

/// Step-by-step experiment assembly
#[derive(Default)]
pub struct ExperimentBuilder {
    space: Option<ParameterSpace>,
    aggregator: KpiAggregator,
    runner: Option<Arc<dyn SimulationRunner>>,
    model: Option<Arc<dyn Model>>,
    optimizer_settings: Option<OptimizerSettings>,
    objective: Option<(String, bool)>,
}

impl ExperimentBuilder {
    /// Search space; optional when a model supplies one
    pub fn parameter_space(mut self, space: ParameterSpace) -> Self {
        self.space = Some(space);
        self
    }

    /// Dispatch through an in-process model
    ///
    /// The model's parameter space and KPI definitions fill in anything the
    /// builder has not set explicitly.
    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Dispatch through a subprocess simulation
    pub fn subprocess(mut self, config: SubprocessConfig) -> Self {
        self.runner = Some(Arc::new(SubprocessRunner::new(config)));
        self
    }

    /// Dispatch through an arbitrary backend
    pub fn runner(mut self, runner: Arc<dyn SimulationRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn add_kpi(mut self, name: impl Into<String>, spec: KpiSpec) -> Result<Self> {
        self.aggregator.add_kpi(name, spec)?;
        Ok(self)
    }

    /// Designate the objective KPI and its direction
    pub fn objective(mut self, name: impl Into<String>, maximize: bool) -> Self {
        self.objective = Some((name.into(), maximize));
        self
    }

    pub fn optimizer(mut self, settings: OptimizerSettings) -> Self {
        self.optimizer_settings = Some(settings);
        self
    }

    pub fn build(mut self) -> Result<Experiment> {
        let runner: Arc<dyn SimulationRunner> = match (&self.model, self.runner.take()) {
            (Some(model), None) => Arc::new(InProcessRunner::new(model.clone())),
            (None, Some(runner)) => runner,
            (Some(_), Some(_)) => {
                return Err(EngineError::InvalidConfig(
                    "configure either a model or a runner, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(EngineError::InvalidConfig(
                    "a model or a runner is required".to_string(),
                ))
            }
        };

        // A model can fill in the space and KPI definitions.
        if let Some(model) = &self.model {
            if self.space.is_none() {
                self.space = Some(model.parameter_space());
            }
            for (name, spec) in model.kpi_definitions() {
                self.aggregator.add_kpi_if_absent(name, spec);
            }
        }

        let space = self.space.ok_or_else(|| {
            EngineError::InvalidConfig("a parameter space is required".to_string())
        })?;

        let (name, maximize) = self
            .objective
            .ok_or(EngineError::NoObjective)?;
        self.aggregator.set_objective(&name, maximize)?;

        let settings = self.optimizer_settings.ok_or_else(|| {
            EngineError::InvalidConfig("optimizer settings are required".to_string())
        })?;
        let optimizer_impl = make_optimizer(&settings, &space, Objective { name, maximize })?;

        info!(
            method = ?settings.method,
            dimensions = space.dimension(),
            "experiment assembled"
        );

        let (controller, receiver) =
            ExperimentController::new(space, self.aggregator, runner, optimizer_impl);
        Ok(Experiment {
            controller,
            receiver: Some(receiver),
            default_options: RunOptions::default(),
        })
    }
}

/// Instantiate the configured optimization strategy
fn make_optimizer(
    settings: &OptimizerSettings,
    space: &ParameterSpace,
    objective: Objective,
) -> Result<Box<dyn Optimizer>> {
    let boxed: Box<dyn Optimizer> = match settings.method {
        OptimizerMethod::Grid => Box::new(GridOptimizer::new(
            space,
            objective,
            settings.num_points.unwrap_or(optimizer::grid::DEFAULT_NUM_POINTS),
        )?),
        OptimizerMethod::Random => Box::new(RandomOptimizer::new(
            space,
            objective,
            settings.iterations,
            settings.seed,
        )?),
        OptimizerMethod::Bayesian => {
            let mut config = BayesianConfig::new(settings.iterations);
            if let Some(n) = settings.initial_points {
                config.n_initial_points = n;
            }
            config.seed = settings.seed;
            if let Some(acquisition) = settings.acquisition {
                config.acquisition = acquisition;
            }
            Box::new(BayesianOptimizer::new(space, objective, config)?)
        }
    };
    Ok(boxed)
}

/// One-call optimization of a single output column over a CLI simulation
pub async fn quick_optimize(
    command: impl Into<String>,
    space: ParameterSpace,
    kpi_column: &str,
    maximize: bool,
    iterations: u64,
) -> Result<FinalResults> {
    let operation = if maximize { ColumnOp::Max } else { ColumnOp::Min };
    let experiment = Experiment::builder()
        .parameter_space(space)
        .subprocess(SubprocessConfig::new(command, dispatch::OutputFormat::Csv))
        .add_kpi("objective", KpiSpec::column(kpi_column, operation))?
        .objective("objective", maximize)
        .optimizer(OptimizerSettings::random(iterations, None))
        .build()?;
    experiment.run(RunOptions::default()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_optimizer_types::ParameterSpec;

    fn demo_space() -> ParameterSpace {
        ParameterSpace::new()
            .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
            .unwrap()
    }

    #[test]
    fn test_builder_requires_backend() {
        let result = Experiment::builder()
            .parameter_space(demo_space())
            .objective("score", true)
            .optimizer(OptimizerSettings::random(5, Some(1)))
            .build();
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_requires_objective() {
        let config = SubprocessConfig::new("true", dispatch::OutputFormat::Csv);
        let result = Experiment::builder()
            .parameter_space(demo_space())
            .subprocess(config)
            .optimizer(OptimizerSettings::random(5, Some(1)))
            .build();
        assert!(matches!(result, Err(EngineError::NoObjective)));
    }

    #[test]
    fn test_builder_objective_must_reference_kpi() {
        let config = SubprocessConfig::new("true", dispatch::OutputFormat::Csv);
        let result = Experiment::builder()
            .parameter_space(demo_space())
            .subprocess(config)
            .objective("missing", true)
            .optimizer(OptimizerSettings::random(5, Some(1)))
            .build();
        assert!(matches!(result, Err(EngineError::UnknownKpi(_))));
    }

    #[test]
    fn test_builder_happy_path() {
        let config = SubprocessConfig::new("true", dispatch::OutputFormat::Csv);
        let mut experiment = Experiment::builder()
            .parameter_space(demo_space())
            .subprocess(config)
            .add_kpi("score", KpiSpec::column("y", ColumnOp::Max))
            .unwrap()
            .objective("score", true)
            .optimizer(OptimizerSettings::random(5, Some(1)))
            .build()
            .unwrap();
        assert!(experiment.take_progress().is_some());
        assert!(experiment.take_progress().is_none());
    }
}
