//! End-to-end experiment scenarios

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch::{Model, ModelOutput, OutputFormat, RunContext, SimulationRunner, SubprocessConfig};
use engine::{
    Experiment, ExperimentController, KpiAggregator, OnError, OptimizerSettings, RetryPolicy,
    RunOptions,
};
use optimizer::{Objective, RandomOptimizer};
use sim_optimizer_types::{
    CellValue, ColumnOp, DispatchError, IterationStatus, KpiSpec, ParameterSpace, ParameterSpec,
    ParameterValue, ParameterVector, ProgressEvent, SimulationResult, Table,
};

fn score_space() -> ParameterSpace {
    ParameterSpace::new()
        .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
        .unwrap()
        .with_param("b", ParameterSpec::Integer { min: 1, max: 5 })
        .unwrap()
}

/// Deterministic model: score = -a + b / 5, reported as a one-row table
struct ScoreModel;

impl Model for ScoreModel {
    fn run(&self, params: &ParameterVector) -> anyhow::Result<ModelOutput> {
        let a = params.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let b = params.get("b").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let table = Table::from_rows(
            vec!["score".into()],
            vec![vec![CellValue::Num(-a + b / 5.0)]],
        )?;
        Ok(ModelOutput::Table(table))
    }

    fn parameter_space(&self) -> ParameterSpace {
        score_space()
    }
}

fn score_experiment(settings: OptimizerSettings) -> Experiment {
    Experiment::builder()
        .model(Arc::new(ScoreModel))
        .add_kpi("score", KpiSpec::column("score", ColumnOp::Final))
        .unwrap()
        .objective("score", true)
        .optimizer(settings)
        .build()
        .unwrap()
}

// Scenario A: random search over a deterministic model is reproducible.
#[tokio::test]
async fn random_search_deterministic_model() {
    let run = |seed| async move {
        let experiment = score_experiment(OptimizerSettings::random(20, Some(seed)));
        experiment.run(RunOptions::default()).await.unwrap()
    };

    let results = run(7).await;
    assert_eq!(results.iterations, 20);
    assert_eq!(results.records.len(), 20);
    assert!(!results.cancelled);

    let best_observed = results
        .records
        .iter()
        .filter_map(|r| r.objective_value)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(results.best_kpis["score"], best_observed);

    // Rerun with the same seed: identical proposals and objective values.
    let rerun = run(7).await;
    for (first, second) in results.records.iter().zip(rerun.records.iter()) {
        assert_eq!(first.step, second.step);
        assert_eq!(first.parameters, second.parameters);
        assert_eq!(first.kpis, second.kpis);
        assert_eq!(first.objective_value, second.objective_value);
        assert_eq!(first.status, second.status);
    }
}

// Scenario B: grid search enumerates the full product in lexicographic order.
#[tokio::test]
async fn grid_search_exhaustive() {
    struct EchoModel;
    impl Model for EchoModel {
        fn run(&self, params: &ParameterVector) -> anyhow::Result<ModelOutput> {
            let y = params.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let table =
                Table::from_rows(vec!["y".into()], vec![vec![CellValue::Num(y)]])?;
            Ok(ModelOutput::Table(table))
        }
        fn parameter_space(&self) -> ParameterSpace {
            ParameterSpace::new()
                .with_param(
                    "x",
                    ParameterSpec::Categorical {
                        values: vec!["a".into(), "b".into(), "c".into()],
                    },
                )
                .unwrap()
                .with_param("y", ParameterSpec::Integer { min: 1, max: 3 })
                .unwrap()
        }
    }

    let experiment = Experiment::builder()
        .model(Arc::new(EchoModel))
        .add_kpi("score", KpiSpec::column("y", ColumnOp::Final))
        .unwrap()
        .objective("score", true)
        .optimizer(OptimizerSettings::grid(3))
        .build()
        .unwrap();

    let results = experiment.run(RunOptions::default()).await.unwrap();
    assert_eq!(results.records.len(), 9);

    let expected = [
        ("a", 1),
        ("a", 2),
        ("a", 3),
        ("b", 1),
        ("b", 2),
        ("b", 3),
        ("c", 1),
        ("c", 2),
        ("c", 3),
    ];
    for (record, (x, y)) in results.records.iter().zip(expected.iter()) {
        assert_eq!(
            record.parameters.get("x"),
            Some(&ParameterValue::Text((*x).into()))
        );
        assert_eq!(record.parameters.get("y"), Some(&ParameterValue::Int(*y)));
    }

    // Monotone steps starting at 1
    for (i, record) in results.records.iter().enumerate() {
        assert_eq!(record.step, i as u64 + 1);
    }
}

// Scenario C: a subprocess that outlives its deadline fails with `timeout`
// after the retry budget, and the run still completes cleanly.
#[tokio::test]
async fn subprocess_timeout_with_retries() {
    let space = ParameterSpace::new()
        .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
        .unwrap();

    let mut experiment = Experiment::builder()
        .parameter_space(space)
        .subprocess(SubprocessConfig::new("sleep 10", OutputFormat::Csv))
        .add_kpi("score", KpiSpec::column("score", ColumnOp::Final))
        .unwrap()
        .objective("score", true)
        .optimizer(OptimizerSettings::random(5, Some(1)))
        .build()
        .unwrap();
    let mut progress = experiment.take_progress().unwrap();

    let options = RunOptions::default()
        .with_max_iterations(1)
        .with_per_call_timeout(Duration::from_millis(150))
        .with_retry_policy(RetryPolicy::new(2, OnError::Raise));
    let results = experiment.run(options).await.unwrap();

    assert_eq!(results.records.len(), 1);
    let record = &results.records[0];
    assert_eq!(record.status, IterationStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("timeout"));
    assert_eq!(record.attempts, 2);
    assert!(results.best_parameters.is_none());

    // The step event reports the failure; complete carries best = none.
    let mut saw_failed_step = false;
    let mut saw_complete = false;
    while let Some(event) = progress.recv().await {
        match event {
            ProgressEvent::Step { step, error, .. } => {
                assert_eq!(step, 1);
                assert_eq!(error.as_deref(), Some("timeout"));
                saw_failed_step = true;
            }
            ProgressEvent::Complete { result } => {
                assert!(result.best_parameters.is_none());
                assert_eq!(result.iterations, 1);
                saw_complete = true;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(saw_failed_step && saw_complete);
}

/// Model that sleeps for its `delay` parameter
struct DelayModel;

impl Model for DelayModel {
    fn run(&self, params: &ParameterVector) -> anyhow::Result<ModelOutput> {
        let delay = params.get("delay").and_then(|v| v.as_f64()).unwrap_or(0.0);
        std::thread::sleep(Duration::from_secs_f64(delay));
        let table = Table::from_rows(vec!["d".into()], vec![vec![CellValue::Num(delay)]])?;
        Ok(ModelOutput::Table(table))
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .with_param(
                "delay",
                ParameterSpec::Continuous {
                    min: 0.001,
                    max: 0.05,
                },
            )
            .unwrap()
    }
}

// Scenario D: with parallel workers, records land in step order while step
// events arrive in completion order; both agree on the step numbers.
#[tokio::test]
async fn parallel_completion_order() {
    let mut experiment = Experiment::builder()
        .model(Arc::new(DelayModel))
        .add_kpi("d", KpiSpec::column("d", ColumnOp::Final))
        .unwrap()
        .objective("d", false)
        .optimizer(OptimizerSettings::random(10, Some(11)))
        .build()
        .unwrap();
    let mut progress = experiment.take_progress().unwrap();

    let options = RunOptions::default().with_parallelism(4);
    let results = experiment.run(options).await.unwrap();
    assert_eq!(results.records.len(), 10);

    // Store order is proposal order
    let steps: Vec<u64> = results.records.iter().map(|r| r.step).collect();
    assert_eq!(steps, (1..=10).collect::<Vec<u64>>());

    // Events cover the same steps exactly once, possibly reordered
    let mut event_steps = Vec::new();
    while let Some(event) = progress.recv().await {
        if let ProgressEvent::Step { step, .. } = event {
            event_steps.push(step);
        }
    }
    let mut sorted = event_steps.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=10).collect::<Vec<u64>>());
}

/// Model that produces an empty trajectory on odd-numbered calls
struct FlakyScoreModel {
    calls: AtomicU64,
}

impl Model for FlakyScoreModel {
    fn run(&self, params: &ParameterVector) -> anyhow::Result<ModelOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call % 2 == 1 {
            // No rows: the objective reduces to NaN downstream
            return Ok(ModelOutput::Table(Table::new(vec!["score".into()])));
        }
        let a = params.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let table = Table::from_rows(
            vec!["score".into()],
            vec![vec![CellValue::Num((a - 0.4).powi(2))]],
        )?;
        Ok(ModelOutput::Table(table))
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
            .unwrap()
    }
}

// Scenario E: the Bayesian optimizer keeps going when every other iteration
// fails to produce the objective.
#[tokio::test]
async fn bayesian_survives_failed_observations() {
    let mut settings = OptimizerSettings::bayesian(10, Some(13));
    settings.initial_points = Some(3);

    let experiment = Experiment::builder()
        .model(Arc::new(FlakyScoreModel {
            calls: AtomicU64::new(0),
        }))
        .add_kpi("score", KpiSpec::column("score", ColumnOp::Final))
        .unwrap()
        .objective("score", false)
        .optimizer(settings)
        .build()
        .unwrap();

    let results = experiment.run(RunOptions::default()).await.unwrap();
    assert_eq!(results.records.len(), 10);

    let failed: Vec<_> = results.records.iter().filter(|r| !r.is_ok()).collect();
    assert_eq!(failed.len(), 5);
    for record in &failed {
        assert_eq!(record.error.as_deref(), Some("kpi-unavailable"));
    }

    // The even-numbered half succeeded and produced a best.
    assert!(results.best_parameters.is_some());
}

// Scenario F: KPI aggregation end to end, applied through a model run.
#[tokio::test]
async fn kpi_aggregation_end_to_end() {
    struct PeakModel;
    impl Model for PeakModel {
        fn run(&self, _params: &ParameterVector) -> anyhow::Result<ModelOutput> {
            let table = Table::from_rows(
                vec!["I".into()],
                vec![
                    vec![CellValue::Num(10.0)],
                    vec![CellValue::Num(50.0)],
                    vec![CellValue::Num(30.0)],
                    vec![CellValue::Num(0.0)],
                ],
            )?;
            Ok(ModelOutput::Table(table))
        }
        fn parameter_space(&self) -> ParameterSpace {
            ParameterSpace::new()
                .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
                .unwrap()
        }
    }

    let experiment = Experiment::builder()
        .model(Arc::new(PeakModel))
        .add_kpi("peak", KpiSpec::column("I", ColumnOp::Max))
        .unwrap()
        .add_kpi("total", KpiSpec::column("I", ColumnOp::Sum))
        .unwrap()
        .objective("peak", true)
        .optimizer(OptimizerSettings::random(2, Some(1)))
        .build()
        .unwrap();

    let results = experiment.run(RunOptions::default()).await.unwrap();
    for record in &results.records {
        assert_eq!(record.kpis["peak"], 50.0);
        assert_eq!(record.kpis["total"], 90.0);
    }
}

/// Runner that fails a fixed number of times before succeeding
struct FlakyRunner {
    failures_left: AtomicU64,
}

#[async_trait]
impl SimulationRunner for FlakyRunner {
    async fn run(
        &self,
        params: &ParameterVector,
        _ctx: &RunContext,
    ) -> Result<SimulationResult, DispatchError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
        {
            return Err(DispatchError::ExitNonZero {
                code: Some(1),
                stderr: "transient".to_string(),
            });
        }
        let table = Table::from_rows(vec!["score".into()], vec![vec![CellValue::Num(1.0)]])
            .map_err(|e| DispatchError::ParseFailed(e.to_string()))?;
        Ok(SimulationResult::new(table, params.clone()))
    }
}

// Retry policy: a transiently failing backend recovers within the attempt
// budget and the record reports how many attempts it took.
#[tokio::test]
async fn retry_recovers_within_attempt_budget() {
    let space = ParameterSpace::new()
        .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
        .unwrap();
    let experiment = Experiment::builder()
        .parameter_space(space)
        .runner(Arc::new(FlakyRunner {
            failures_left: AtomicU64::new(2),
        }))
        .add_kpi("score", KpiSpec::column("score", ColumnOp::Final))
        .unwrap()
        .objective("score", true)
        .optimizer(OptimizerSettings::random(1, Some(1)))
        .build()
        .unwrap();

    let options =
        RunOptions::default().with_retry_policy(RetryPolicy::new(3, OnError::Retry));
    let results = experiment.run(options).await.unwrap();

    assert_eq!(results.records.len(), 1);
    let record = &results.records[0];
    assert_eq!(record.status, IterationStatus::Ok);
    assert_eq!(record.attempts, 3);
    assert!(record.attempts <= 3);
}

// Fallback policy: a dead backend still yields ok iterations through the
// configured fallback result, with KPIs recomputed by the aggregator.
#[tokio::test]
async fn fallback_substitutes_result() {
    let space = ParameterSpace::new()
        .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
        .unwrap();

    let fallback_table = Table::from_rows(
        vec!["score".into()],
        vec![vec![CellValue::Num(-1.0)]],
    )
    .unwrap();
    let fallback = SimulationResult::new(fallback_table, ParameterVector::new());

    let experiment = Experiment::builder()
        .parameter_space(space)
        .subprocess(SubprocessConfig::new("exit 9", OutputFormat::Csv))
        .add_kpi("score", KpiSpec::column("score", ColumnOp::Final))
        .unwrap()
        .objective("score", true)
        .optimizer(OptimizerSettings::random(3, Some(1)))
        .build()
        .unwrap();

    let options = RunOptions::default().with_retry_policy(
        RetryPolicy::new(1, OnError::Fallback).with_fallback(fallback),
    );
    let results = experiment.run(options).await.unwrap();

    assert_eq!(results.records.len(), 3);
    for record in &results.records {
        assert_eq!(record.status, IterationStatus::Ok);
        assert_eq!(record.kpis["score"], -1.0);
    }
}

// Cancellation: recorded iterations plus in-flight cancellations account for
// every proposal; nothing silently disappears.
#[tokio::test]
async fn cancellation_preserves_all_proposals() {
    let mut aggregator = KpiAggregator::new();
    aggregator
        .add_kpi("d", KpiSpec::column("d", ColumnOp::Final))
        .unwrap();
    aggregator.set_objective("d", false).unwrap();

    let model = Arc::new(DelayModel);
    let space = model.parameter_space();
    let objective = Objective::minimize("d");
    let random = RandomOptimizer::new(&space, objective, 50, Some(5)).unwrap();

    let (controller, _progress) = ExperimentController::new(
        space,
        aggregator,
        Arc::new(dispatch::InProcessRunner::new(model)),
        Box::new(random),
    );
    let cancel = controller.cancel_handle();

    let store = controller.store();
    let options = RunOptions::default().with_parallelism(2);
    let run = controller.run(options);
    tokio::pin!(run);

    // Let a few iterations finish, then cancel mid-flight.
    let results = tokio::select! {
        results = &mut run => results.unwrap(),
        _ = tokio::time::sleep(Duration::from_millis(120)) => {
            cancel.cancel();
            run.await.unwrap()
        }
    };

    assert!(results.cancelled);
    let stats = controller.stats();
    let proposed = stats.get("proposed").copied().unwrap_or(0);
    assert_eq!(store.len() as u64, proposed);

    // Already-recorded outcomes survive; nothing beyond the proposals shows up.
    let steps: Vec<u64> = results.records.iter().map(|r| r.step).collect();
    assert_eq!(steps, (1..=proposed).collect::<Vec<u64>>());
}

// Controller-level failure: no objective configured fails before any
// iteration and emits an error event.
#[tokio::test]
async fn controller_failure_emits_error_event() {
    let space = ParameterSpace::new()
        .with_param("a", ParameterSpec::Continuous { min: 0.0, max: 1.0 })
        .unwrap();
    let aggregator = KpiAggregator::new();
    let objective = Objective::maximize("score");
    let random = RandomOptimizer::new(&space, objective, 5, Some(1)).unwrap();

    let (controller, mut progress) = ExperimentController::new(
        space,
        aggregator,
        Arc::new(dispatch::InProcessRunner::new(Arc::new(ScoreModel))),
        Box::new(random),
    );

    let err = controller.run(RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, engine::EngineError::NoObjective));
    assert!(controller.store().is_empty());

    match progress.recv().await.unwrap() {
        ProgressEvent::Error { message } => assert!(message.contains("objective")),
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(progress.recv().await, None);
}

// Result files land next to the configured base path.
#[tokio::test]
async fn result_files_written() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("run");

    let experiment = score_experiment(OptimizerSettings::random(5, Some(2)));
    let options = RunOptions::default().with_save_base_path(&base);
    let results = experiment.run(options).await.unwrap();
    assert_eq!(results.iterations, 5);

    assert!(dir.path().join("run_iterations.csv").exists());
    assert!(dir.path().join("run_best.json").exists());
    assert!(dir.path().join("run_summary.json").exists());

    let best: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("run_best.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(best["iterations"], 5);
    assert_eq!(
        best["bestKPIs"]["score"].as_f64().unwrap(),
        results.best_kpis["score"]
    );
}
