//! Seeded random search
//!
//! Samples every dimension independently and uniformly. Given the same seed
//! and propose order, the sequence of candidates is identical across runs.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use uuid::Uuid;

use sim_optimizer_types::{ParameterSpace, ParameterVector};

use crate::errors::{OptimizerError, Result};
use crate::traits::{BestTracker, Objective, Observation, Optimizer, Proposal, ProposalHandle};

pub struct RandomOptimizer {
    space: ParameterSpace,
    objective: Objective,
    num_iterations: u64,
    proposed: u64,
    rng: StdRng,
    pending: HashMap<Uuid, (u64, ParameterVector)>,
    tracker: BestTracker,
}

impl RandomOptimizer {
    pub fn new(
        space: &ParameterSpace,
        objective: Objective,
        num_iterations: u64,
        seed: Option<u64>,
    ) -> Result<Self> {
        if space.is_empty() {
            return Err(OptimizerError::InvalidConfig(
                "parameter space is empty".to_string(),
            ));
        }
        if num_iterations == 0 {
            return Err(OptimizerError::InvalidConfig(
                "num_iterations must be at least 1".to_string(),
            ));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let tracker = BestTracker::new(objective.maximize);
        Ok(Self {
            space: space.clone(),
            objective,
            num_iterations,
            proposed: 0,
            rng,
            pending: HashMap::new(),
            tracker,
        })
    }

    /// Proposals not yet issued
    pub fn remaining(&self) -> u64 {
        self.num_iterations - self.proposed
    }
}

impl Optimizer for RandomOptimizer {
    fn propose(&mut self) -> Result<Proposal> {
        if self.proposed >= self.num_iterations {
            return Ok(Proposal::Done);
        }

        let params = self.space.sample(&mut self.rng);
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
        if let Observation::Value(value) = observation {
            self.tracker.observe(index, &params, value);
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
