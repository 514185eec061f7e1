//! Bayesian optimization over a Gaussian-process surrogate
//!
//! Proposals start with a uniform warm-up phase, then switch to maximizing
//! an acquisition function over the surrogate's posterior. Internally the
//! optimizer always minimizes; a maximize objective is negated on the way
//! in and restored on the way out. Failed iterations enter the training set
//! at a pessimistic sentinel so the surrogate steers away from them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use sim_optimizer_types::{ParameterSpace, ParameterVector};

use crate::errors::{OptimizerError, Result};
use crate::surrogate::{GaussianProcess, Surrogate};
use crate::traits::{BestTracker, Objective, Observation, Optimizer, Proposal, ProposalHandle};

/// Acquisition function over the surrogate posterior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    /// Expected improvement
    Ei,
    /// Lower confidence bound
    Lcb,
    /// Probability of improvement
    Pi,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::Ei
    }
}

/// Bayesian optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesianConfig {
    /// Total proposal budget
    pub num_iterations: u64,
    /// Uniform warm-up proposals before any surrogate fit
    pub n_initial_points: u64,
    /// PRNG seed for warm-up samples and candidate search
    pub seed: Option<u64>,
    pub acquisition: Acquisition,
    /// Candidates evaluated per acquisition maximization
    pub candidate_pool: usize,
}

impl BayesianConfig {
    pub fn new(num_iterations: u64) -> Self {
        Self {
            num_iterations,
            n_initial_points: 5,
            seed: None,
            acquisition: Acquisition::default(),
            candidate_pool: 512,
        }
    }

    pub fn with_initial_points(mut self, n: u64) -> Self {
        self.n_initial_points = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_acquisition(mut self, acquisition: Acquisition) -> Self {
        self.acquisition = acquisition;
        self
    }
}

/// One completed observation in internal (minimizing) units
#[derive(Debug, Clone)]
enum Outcome {
    Value(f64),
    Failure,
}

pub struct BayesianOptimizer<S: Surrogate = GaussianProcess> {
    space: ParameterSpace,
    objective: Objective,
    config: BayesianConfig,
    rng: StdRng,
    proposed: u64,
    pending: HashMap<Uuid, (u64, ParameterVector)>,
    /// Completed observations: unit-box input plus outcome
    observed: Vec<(Vec<f64>, Outcome)>,
    tracker: BestTracker,
    surrogate: S,
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl BayesianOptimizer<GaussianProcess> {
    pub fn new(space: &ParameterSpace, objective: Objective, config: BayesianConfig) -> Result<Self> {
        Self::with_surrogate(space, objective, config, GaussianProcess::default())
    }
}

impl<S: Surrogate> BayesianOptimizer<S> {
    /// Build with a caller-supplied surrogate strategy
    pub fn with_surrogate(
        space: &ParameterSpace,
        objective: Objective,
        config: BayesianConfig,
        surrogate: S,
    ) -> Result<Self> {
        if space.is_empty() {
            return Err(OptimizerError::InvalidConfig(
                "parameter space is empty".to_string(),
            ));
        }
        if config.num_iterations == 0 {
            return Err(OptimizerError::InvalidConfig(
                "num_iterations must be at least 1".to_string(),
            ));
        }
        if config.n_initial_points == 0 {
            return Err(OptimizerError::InvalidConfig(
                "n_initial_points must be at least 1".to_string(),
            ));
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let tracker = BestTracker::new(objective.maximize);
        Ok(Self {
            lower: space.bounds_lower(),
            upper: space.bounds_upper(),
            space: space.clone(),
            objective,
            config,
            rng,
            proposed: 0,
            pending: HashMap::new(),
            observed: Vec::new(),
            tracker,
            surrogate,
        })
    }

    /// Completed observations, including failures
    pub fn observation_count(&self) -> usize {
        self.observed.len()
    }

    /// The internal (minimizing) training targets, sentinels included
    ///
    /// Exposed for tests that verify failed points enter the surrogate at a
    /// pessimistic value.
    pub fn training_targets(&self) -> Vec<f64> {
        self.training_set().map(|(_, y)| y).unwrap_or_default()
    }

    fn successes(&self) -> usize {
        self.observed
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Value(_)))
            .count()
    }

    /// Assemble inputs and targets, substituting the failure sentinel
    fn training_set(&self) -> Option<(Vec<Vec<f64>>, Vec<f64>)> {
        let values: Vec<f64> = self
            .observed
            .iter()
            .filter_map(|(_, o)| match o {
                Outcome::Value(y) => Some(*y),
                Outcome::Failure => None,
            })
            .collect();
        if values.is_empty() {
            return None;
        }

        let worst = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let best = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let sentinel = worst + ((worst - best) * 0.1).max(1.0);

        let mut inputs = Vec::with_capacity(self.observed.len());
        let mut targets = Vec::with_capacity(self.observed.len());
        for (x, outcome) in &self.observed {
            inputs.push(x.clone());
            targets.push(match outcome {
                Outcome::Value(y) => *y,
                Outcome::Failure => sentinel,
            });
        }
        Some((inputs, targets))
    }

    /// Map an encoded point into the unit box
    fn to_unit(&self, encoded: &[f64]) -> Vec<f64> {
        encoded
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&x, (&lo, &hi))| {
                let span = hi - lo;
                if span > 0.0 {
                    (x - lo) / span
                } else {
                    0.5
                }
            })
            .collect()
    }

    /// Map a unit-box point back into encoded coordinates
    fn from_unit(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&u, (&lo, &hi))| lo + u * (hi - lo))
            .collect()
    }

    fn uniform_proposal(&mut self) -> ParameterVector {
        self.space.sample(&mut self.rng)
    }

    /// Maximize the acquisition over a seeded random candidate pool
    fn surrogate_proposal(&mut self) -> Result<ParameterVector> {
        let (inputs, targets) = self
            .training_set()
            .ok_or_else(|| OptimizerError::SurrogateFailed("no observations".to_string()))?;
        self.surrogate.fit(&inputs, &targets)?;

        let best_y = targets.iter().cloned().fold(f64::INFINITY, f64::min);
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| OptimizerError::SurrogateFailed(e.to_string()))?;

        let dim = self.space.dimension();
        let mut best_score = f64::NEG_INFINITY;
        let mut best_unit = vec![0.5; dim];
        for _ in 0..self.config.candidate_pool {
            let candidate: Vec<f64> = (0..dim).map(|_| self.rng.gen::<f64>()).collect();
            let (mean, std) = self.surrogate.predict(&candidate);
            let score = acquisition_score(self.config.acquisition, mean, std, best_y, &normal);
            if score > best_score {
                best_score = score;
                best_unit = candidate;
            }
        }

        debug!(score = best_score, "acquisition maximized");
        let encoded = self.from_unit(&best_unit);
        Ok(self.space.decode(&encoded)?)
    }
}

/// Score a candidate under the chosen acquisition, minimizing convention
fn acquisition_score(
    acquisition: Acquisition,
    mean: f64,
    std: f64,
    best_y: f64,
    normal: &Normal,
) -> f64 {
    match acquisition {
        Acquisition::Ei => {
            let improvement = best_y - mean;
            if std <= 0.0 {
                return improvement.max(0.0);
            }
            let z = improvement / std;
            improvement * normal.cdf(z) + std * normal.pdf(z)
        }
        Acquisition::Pi => {
            if std <= 0.0 {
                return if mean < best_y { 1.0 } else { 0.0 };
            }
            normal.cdf((best_y - mean) / std)
        }
        // Prefer the lowest confidence bound, so negate it for argmax
        Acquisition::Lcb => -(mean - 1.96 * std),
    }
}

impl<S: Surrogate> Optimizer for BayesianOptimizer<S> {
    fn propose(&mut self) -> Result<Proposal> {
        if self.proposed >= self.config.num_iterations {
            return Ok(Proposal::Done);
        }

        let warm_up = self.proposed < self.config.n_initial_points
            || (self.observed.len() as u64) < self.config.n_initial_points
            || self.successes() == 0;

        let params = if warm_up {
            self.uniform_proposal()
        } else {
            match self.surrogate_proposal() {
                Ok(params) => params,
                Err(e) => {
                    warn!("surrogate proposal failed, falling back to uniform: {}", e);
                    self.uniform_proposal()
                }
            }
        };

        let handle = ProposalHandle::new(self.proposed);
        self.proposed += 1;
        self.pending.insert(handle.id, (handle.index, params.clone()));
        Ok(Proposal::Candidate { params, handle })
    }

    fn observe(&mut self, handle: ProposalHandle, observation: Observation) -> Result<()> {
        let (index, params) = self
            .pending
            .remove(&handle.id)
            .ok_or_else(|| OptimizerError::UnknownHandle(handle.id.to_string()))?;

        let encoded = self.space.encode(&params)?;
        let unit = self.to_unit(&encoded);

        match observation {
            Observation::Value(value) if value.is_finite() => {
                let internal = if self.objective.maximize { -value } else { value };
                self.observed.push((unit, Outcome::Value(internal)));
                self.tracker.observe(index, &params, value);
            }
            // NaN objectives are failures from the surrogate's point of view
            Observation::Value(_) | Observation::Failure => {
                self.observed.push((unit, Outcome::Failure));
            }
        }
        Ok(())
    }

    fn best(&self) -> Option<(ParameterVector, f64)> {
        self.tracker.best()
    }

    fn objective(&self) -> &Objective {
        &self.objective
    }
}
