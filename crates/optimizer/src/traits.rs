//! The ask/tell optimizer contract
//!
//! `propose` hands out the next candidate with an opaque handle, `observe`
//! feeds the scalar objective (or a failure marker) back, possibly out of
//! order when parallel workers complete at different speeds. `best` is
//! always consistent with the observations so far.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sim_optimizer_types::ParameterVector;

use crate::errors::Result;

/// The scalar target an optimizer drives toward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// KPI name the objective value comes from
    pub name: String,
    /// Direction: highest wins when true, lowest otherwise
    pub maximize: bool,
}

impl Objective {
    pub fn maximize(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maximize: true,
        }
    }

    pub fn minimize(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            maximize: false,
        }
    }
}

/// Opaque ticket pairing an observation with its proposal
///
/// `index` is the 0-based proposal ordinal; it breaks best-value ties in
/// favor of the earliest proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalHandle {
    pub id: Uuid,
    pub index: u64,
}

impl ProposalHandle {
    pub fn new(index: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
        }
    }
}

/// What `propose` returns
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// Next candidate to evaluate
    Candidate {
        params: ParameterVector,
        handle: ProposalHandle,
    },
    /// Budget exhausted; no further candidates will be produced
    Done,
}

/// Feedback for one completed proposal
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// The objective value (finite or NaN)
    Value(f64),
    /// The iteration failed and produced no usable objective
    Failure,
}

/// Uniform ask/tell interface over all strategies
///
/// Implementations are single-threaded by contract: the controller
/// serializes `propose` and `observe` behind one lock.
pub trait Optimizer: Send {
    /// Next candidate, or `Done` when the budget is spent
    fn propose(&mut self) -> Result<Proposal>;

    /// Feed back the outcome for a previously proposed handle
    fn observe(&mut self, handle: ProposalHandle, observation: Observation) -> Result<()>;

    /// Best observed so far: vector and objective value
    fn best(&self) -> Option<(ParameterVector, f64)>;

    /// The objective this optimizer is bound to
    fn objective(&self) -> &Objective;
}

/// Shared best-so-far bookkeeping
///
/// Ties on the objective value resolve to the earliest proposal index, which
/// keeps `best` deterministic under out-of-order completion.
#[derive(Debug, Clone)]
pub struct BestTracker {
    maximize: bool,
    best: Option<(u64, ParameterVector, f64)>,
}

impl BestTracker {
    pub fn new(maximize: bool) -> Self {
        Self {
            maximize,
            best: None,
        }
    }

    /// Consider one ok observation
    pub fn observe(&mut self, index: u64, params: &ParameterVector, value: f64) {
        if value.is_nan() {
            return;
        }
        let better = match &self.best {
            None => true,
            Some((best_index, _, best_value)) => {
                if value == *best_value {
                    index < *best_index
                } else if self.maximize {
                    value > *best_value
                } else {
                    value < *best_value
                }
            }
        };
        if better {
            self.best = Some((index, params.clone(), value));
        }
    }

    pub fn best(&self) -> Option<(ParameterVector, f64)> {
        self.best
            .as_ref()
            .map(|(_, params, value)| (params.clone(), *value))
    }
}
