//! Experiment controller
//!
//! Coordinates the full optimization loop: a pool of workers pulls
//! proposals from the optimizer, dispatches simulations with retry and
//! per-call deadlines, and reports completions back to a single
//! coordinator that serializes optimizer feedback, record storage, and
//! progress events. Steps are assigned at proposal time, so the store
//! reflects proposal order even when completions interleave.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use dispatch::{jitter, CancelSource, CancelToken, RunContext, SimulationRunner};
use optimizer::{Observation, Optimizer, Proposal, ProposalHandle};
use sim_optimizer_types::{
    CompletionSummary, DispatchError, IterationRecord, IterationStatus, ParameterSpace,
    ParameterVector, ProgressEvent,
};

use crate::aggregator::KpiAggregator;
use crate::config::{OnError, RetryPolicy};
use crate::errors::{EngineError, Result};
use crate::progress::{ProgressReceiver, ProgressStream};
use crate::store::ResultsStore;

/// Per-run options for `ExperimentController::run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Cap on proposals; None lets the optimizer decide when it is done
    pub max_iterations: Option<u64>,
    /// Concurrent dispatch workers
    pub parallelism: usize,
    /// Deadline per simulation call
    pub per_call_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
    /// Prefix for the result file set written after the run
    pub save_base_path: Option<PathBuf>,
    /// How long to wait for in-flight workers after cancellation
    pub shutdown_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            parallelism: 1,
            per_call_timeout: None,
            retry_policy: RetryPolicy::default(),
            save_base_path: None,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl RunOptions {
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_save_base_path(mut self, base: impl Into<PathBuf>) -> Self {
        self.save_base_path = Some(base.into());
        self
    }
}

/// What a finished run returns to the caller
#[derive(Debug, Clone)]
pub struct FinalResults {
    pub best_parameters: Option<ParameterVector>,
    pub best_kpis: BTreeMap<String, f64>,
    pub iterations: u64,
    pub elapsed_seconds: f64,
    pub records: Vec<IterationRecord>,
    pub cancelled: bool,
}

/// External cancellation handle for a running experiment
#[derive(Clone)]
pub struct CancelHandle {
    source: Arc<CancelSource>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.source.cancel();
    }
}

/// Optimizer façade serializing proposals and stamping steps
///
/// Proposals and observations go through here under one lock, which is the
/// whole thread-safety story the optimizer implementations rely on.
struct ProposalSource {
    inner: Box<dyn Optimizer>,
    issued: u64,
    limit: Option<u64>,
}

impl ProposalSource {
    fn next(&mut self) -> optimizer::Result<Option<(u64, ParameterVector, ProposalHandle)>> {
        if let Some(limit) = self.limit {
            if self.issued >= limit {
                return Ok(None);
            }
        }
        match self.inner.propose()? {
            Proposal::Candidate { params, handle } => {
                self.issued += 1;
                Ok(Some((self.issued, params, handle)))
            }
            Proposal::Done => Ok(None),
        }
    }
}

/// Completion message from a worker to the coordinator
struct IterationOutcome {
    step: u64,
    handle: ProposalHandle,
    parameters: ParameterVector,
    kpis: BTreeMap<String, f64>,
    objective_value: Option<f64>,
    status: IterationStatus,
    error: Option<DispatchError>,
    attempts: u32,
    elapsed_ms: u64,
}

pub struct ExperimentController {
    space: Arc<ParameterSpace>,
    aggregator: Arc<KpiAggregator>,
    runner: Arc<dyn SimulationRunner>,
    source: Arc<Mutex<ProposalSource>>,
    store: Arc<ResultsStore>,
    stream: ProgressStream,
    cancel: Arc<CancelSource>,
    stats: Arc<DashMap<&'static str, u64>>,
    started: AtomicBool,
}

impl ExperimentController {
    /// Wire up a controller; the paired receiver consumes progress events
    pub fn new(
        space: ParameterSpace,
        aggregator: KpiAggregator,
        runner: Arc<dyn SimulationRunner>,
        optimizer_impl: Box<dyn Optimizer>,
    ) -> (Self, ProgressReceiver) {
        let (stream, receiver) = ProgressStream::with_default_capacity();
        let controller = Self {
            space: Arc::new(space),
            aggregator: Arc::new(aggregator),
            runner,
            source: Arc::new(Mutex::new(ProposalSource {
                inner: optimizer_impl,
                issued: 0,
                limit: None,
            })),
            store: Arc::new(ResultsStore::new()),
            stream,
            cancel: Arc::new(CancelSource::new()),
            stats: Arc::new(DashMap::new()),
            started: AtomicBool::new(false),
        };
        (controller, receiver)
    }

    /// The iteration log, shared with readers
    pub fn store(&self) -> Arc<ResultsStore> {
        self.store.clone()
    }

    /// Handle for cancelling the run from outside
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            source: self.cancel.clone(),
        }
    }

    /// Counter snapshot: proposed, completed, failed, retried, cancelled
    pub fn stats(&self) -> BTreeMap<&'static str, u64> {
        self.stats.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    fn bump(&self, key: &'static str) {
        *self.stats.entry(key).or_insert(0) += 1;
    }

    /// Drive the experiment to completion or cancellation
    pub async fn run(&self, options: RunOptions) -> Result<FinalResults> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::InvalidState(
                "controller already ran; build a new experiment per run".to_string(),
            ));
        }
        if let Err(e) = self.preflight(&options) {
            error!("experiment failed before the first iteration: {}", e);
            self.stream.emit(ProgressEvent::Error {
                message: e.to_string(),
            });
            return Err(e);
        }

        let (objective_name, maximize) = match self.aggregator.objective() {
            Some((name, maximize)) => (name.to_string(), maximize),
            None => return Err(EngineError::NoObjective),
        };

        info!(
            objective = %objective_name,
            maximize,
            parallelism = options.parallelism,
            "starting experiment"
        );
        let start = Instant::now();

        self.source.lock().await.limit = options.max_iterations;

        let (tx, mut rx) = mpsc::channel::<IterationOutcome>(options.parallelism.max(2) * 2);
        let mut workers = Vec::with_capacity(options.parallelism);
        for worker_id in 0..options.parallelism {
            workers.push(tokio::spawn(worker_loop(WorkerContext {
                worker_id,
                source: self.source.clone(),
                runner: self.runner.clone(),
                space: self.space.clone(),
                aggregator: self.aggregator.clone(),
                retry: options.retry_policy.clone(),
                per_call_timeout: options.per_call_timeout,
                cancel: self.cancel.token(),
                tx: tx.clone(),
                stats: self.stats.clone(),
            })));
        }
        drop(tx);

        // Single-writer coordination: observe, record, emit, in completion
        // order. After cancellation the drain is bounded by the grace period.
        loop {
            let next = if self.cancel.is_cancelled() {
                match tokio::time::timeout(options.shutdown_grace, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!("shutdown grace expired, aborting in-flight workers");
                        for worker in &workers {
                            worker.abort();
                        }
                        break;
                    }
                }
            } else {
                rx.recv().await
            };

            match next {
                Some(outcome) => self.handle_outcome(outcome).await,
                None => break,
            }
        }

        for worker in workers {
            // Abort errors after a hard shutdown are expected
            let _ = worker.await;
        }

        let elapsed_seconds = start.elapsed().as_secs_f64();
        let cancelled = self.cancel.is_cancelled();
        let best = self.store.best(&objective_name, maximize);
        let results = FinalResults {
            best_parameters: best.as_ref().map(|r| r.parameters.clone()),
            best_kpis: best.as_ref().map(|r| r.kpis.clone()).unwrap_or_default(),
            iterations: self.store.len() as u64,
            elapsed_seconds,
            records: self.store.all(),
            cancelled,
        };

        if let Some(base) = &options.save_base_path {
            if let Err(e) =
                self.store
                    .write_result_files(base, &objective_name, maximize, elapsed_seconds)
            {
                warn!("failed to write result files: {}", e);
            }
        }

        self.stream.emit(ProgressEvent::Complete {
            result: CompletionSummary {
                best_parameters: results.best_parameters.clone(),
                best_kpis: results.best_kpis.clone(),
                iterations: results.iterations,
                elapsed_time: elapsed_seconds,
            },
        });

        info!(
            iterations = results.iterations,
            cancelled,
            elapsed_seconds,
            "experiment finished"
        );
        Ok(results)
    }

    /// Controller-level checks that must hold before any iteration runs
    fn preflight(&self, options: &RunOptions) -> Result<()> {
        if self.space.is_empty() {
            return Err(EngineError::InvalidConfig(
                "parameter space is empty".to_string(),
            ));
        }
        if self.aggregator.objective().is_none() {
            return Err(EngineError::NoObjective);
        }
        if options.parallelism == 0 {
            return Err(EngineError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if options.max_iterations == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        options.retry_policy.validate()?;
        Ok(())
    }

    /// Serialize observe, append, and emit for one completed iteration
    async fn handle_outcome(&self, outcome: IterationOutcome) {
        let observation = match (outcome.status, outcome.objective_value) {
            (IterationStatus::Ok, Some(value)) => Observation::Value(value),
            _ => Observation::Failure,
        };
        if let Err(e) = self
            .source
            .lock()
            .await
            .inner
            .observe(outcome.handle, observation)
        {
            warn!(step = outcome.step, "optimizer rejected observation: {}", e);
        }

        match outcome.status {
            IterationStatus::Ok => self.bump("completed"),
            IterationStatus::Failed => self.bump("failed"),
            IterationStatus::Cancelled => self.bump("cancelled"),
        }

        let error_kind = outcome.error.as_ref().map(|e| e.kind().to_string());
        let record = IterationRecord {
            step: outcome.step,
            parameters: outcome.parameters.clone(),
            kpis: outcome.kpis.clone(),
            objective_value: outcome.objective_value,
            status: outcome.status,
            elapsed_ms: outcome.elapsed_ms,
            error: error_kind.clone(),
            attempts: outcome.attempts,
        };
        if let Err(e) = self.store.append(record) {
            error!(step = outcome.step, "failed to record iteration: {}", e);
        }

        self.stream.emit(ProgressEvent::Step {
            step: outcome.step,
            parameters: outcome.parameters,
            kpis: outcome.kpis,
            objective_value: outcome.objective_value,
            elapsed_ms: outcome.elapsed_ms,
            error: error_kind,
        });
    }
}

/// Everything one worker needs, cloned per task
struct WorkerContext {
    worker_id: usize,
    source: Arc<Mutex<ProposalSource>>,
    runner: Arc<dyn SimulationRunner>,
    space: Arc<ParameterSpace>,
    aggregator: Arc<KpiAggregator>,
    retry: RetryPolicy,
    per_call_timeout: Option<Duration>,
    cancel: CancelToken,
    tx: mpsc::Sender<IterationOutcome>,
    stats: Arc<DashMap<&'static str, u64>>,
}

async fn worker_loop(ctx: WorkerContext) {
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let proposal = ctx.source.lock().await.next();
        let (step, params, handle) = match proposal {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(e) => {
                warn!(worker = ctx.worker_id, "proposal failed: {}", e);
                break;
            }
        };
        *ctx.stats.entry("proposed").or_insert(0) += 1;

        let started = Instant::now();
        let mut outcome = evaluate_iteration(&ctx, step, handle, params).await;
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;

        if ctx.tx.send(outcome).await.is_err() {
            // Coordinator went away; nothing left to report to.
            break;
        }
    }
    debug!(worker = ctx.worker_id, "worker exiting");
}

/// Run one iteration through validation, dispatch, retries, and KPIs
async fn evaluate_iteration(
    ctx: &WorkerContext,
    step: u64,
    handle: ProposalHandle,
    params: ParameterVector,
) -> IterationOutcome {
    let failed = |error: DispatchError, attempts: u32, kpis: BTreeMap<String, f64>| {
        IterationOutcome {
            step,
            handle,
            parameters: params.clone(),
            kpis,
            objective_value: None,
            status: if matches!(error, DispatchError::Cancelled) {
                IterationStatus::Cancelled
            } else {
                IterationStatus::Failed
            },
            error: Some(error),
            attempts,
            elapsed_ms: 0,
        }
    };

    // Validation failures are final: no dispatch, no retries.
    if let Err(issues) = ctx.space.validate(&params) {
        let message = issues
            .iter()
            .map(|i| format!("{}: {}", i.name, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        warn!(step, "proposed vector failed validation: {}", message);
        return failed(DispatchError::ValidationFailed(message), 0, BTreeMap::new());
    }

    let mut attempt: u32 = 1;
    loop {
        // Retry policy jitters re-attempts; raise re-attempts unchanged.
        let attempt_params = if attempt > 1 && ctx.retry.on_error == OnError::Retry {
            jitter(&params, attempt)
        } else {
            params.clone()
        };
        let run_ctx = RunContext::new(ctx.per_call_timeout, ctx.cancel.clone(), attempt);

        match ctx.runner.run(&attempt_params, &run_ctx).await {
            Ok(result) => {
                let kpis = ctx.aggregator.apply(&result);
                match ctx.aggregator.objective_value(&kpis) {
                    Ok(value) => {
                        debug!(step, attempt, objective = value, "iteration ok");
                        return IterationOutcome {
                            step,
                            handle,
                            parameters: params.clone(),
                            kpis,
                            objective_value: Some(value),
                            status: IterationStatus::Ok,
                            error: None,
                            attempts: attempt,
                            elapsed_ms: 0,
                        };
                    }
                    Err(e) => {
                        // Objective missing or NaN; fallback may still recover.
                        if let Some(outcome) = try_fallback(ctx, step, handle, &params, attempt) {
                            return outcome;
                        }
                        return failed(e, attempt, kpis);
                    }
                }
            }
            Err(DispatchError::Cancelled) => {
                return failed(DispatchError::Cancelled, attempt, BTreeMap::new());
            }
            Err(e) => {
                let can_retry = e.is_retryable()
                    && attempt < ctx.retry.max_attempts
                    && ctx.retry.on_error != OnError::Fallback;
                if can_retry {
                    warn!(step, attempt, error = %e, "dispatch attempt failed, retrying");
                    *ctx.stats.entry("retried").or_insert(0) += 1;
                    attempt += 1;
                    continue;
                }
                if let Some(outcome) = try_fallback(ctx, step, handle, &params, attempt) {
                    return outcome;
                }
                return failed(e, attempt, BTreeMap::new());
            }
        }
    }
}

/// Substitute the configured fallback result, KPIs recomputed
fn try_fallback(
    ctx: &WorkerContext,
    step: u64,
    handle: ProposalHandle,
    params: &ParameterVector,
    attempts: u32,
) -> Option<IterationOutcome> {
    if ctx.retry.on_error != OnError::Fallback {
        return None;
    }
    let fallback = ctx.retry.fallback_result.as_ref()?;

    let kpis = ctx.aggregator.apply(fallback);
    let objective_value = ctx.aggregator.objective_value(&kpis).ok();
    warn!(step, "substituting fallback result");
    Some(IterationOutcome {
        step,
        handle,
        parameters: params.clone(),
        kpis,
        objective_value,
        status: if objective_value.is_some() {
            IterationStatus::Ok
        } else {
            IterationStatus::Failed
        },
        error: if objective_value.is_some() {
            None
        } else {
            Some(DispatchError::KpiUnavailable(
                "fallback result has no usable objective".to_string(),
            ))
        },
        attempts,
        elapsed_ms: 0,
    })
}
