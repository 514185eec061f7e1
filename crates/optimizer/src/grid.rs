//! Exhaustive grid search
//!
//! Discretizes every axis and enumerates the Cartesian product in
//! lexicographic axis order, leftmost axis slowest. Observations only feed
//! best-so-far bookkeeping.

use std::collections::{HashMap, VecDeque};
use tracing::debug;
use uuid::Uuid;

use sim_optimizer_types::{ParameterSpace, ParameterSpec, ParameterValue, ParameterVector};

use crate::errors::{OptimizerError, Result};
use crate::traits::{BestTracker, Objective, Observation, Optimizer, Proposal, ProposalHandle};

/// Default number of points per continuous or integer axis
pub const DEFAULT_NUM_POINTS: usize = 5;

pub struct GridOptimizer {
    objective: Objective,
    queue: VecDeque<ParameterVector>,
    total: usize,
    proposed: u64,
    pending: HashMap<Uuid, (u64, ParameterVector)>,
    tracker: BestTracker,
}

impl GridOptimizer {
    /// Build the full grid up front
    pub fn new(space: &ParameterSpace, objective: Objective, num_points: usize) -> Result<Self> {
        if space.is_empty() {
            return Err(OptimizerError::InvalidConfig(
                "parameter space is empty".to_string(),
            ));
        }
        if num_points == 0 {
            return Err(OptimizerError::InvalidConfig(
                "num_points must be at least 1".to_string(),
            ));
        }

        let axes: Vec<(String, Vec<ParameterValue>)> = space
            .iter()
            .map(|(name, def)| (name.clone(), axis_values(&def.spec, num_points)))
            .collect();

        let queue = cartesian_product(&axes);
        let total = queue.len();
        debug!(points = total, "built search grid");

        let tracker = BestTracker::new(objective.maximize);
        Ok(Self {
            objective,
            queue,
            total,
            proposed: 0,
            pending: HashMap::new(),
            tracker,
        })
    }

    pub fn with_defaults(space: &ParameterSpace, objective: Objective) -> Result<Self> {
        Self::new(space, objective, DEFAULT_NUM_POINTS)
    }

    /// Total number of grid points
    pub fn total_points(&self) -> usize {
        self.total
    }

    /// Points not yet proposed
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Optimizer for GridOptimizer {
    fn propose(&mut self) -> Result<Proposal> {
        match self.queue.pop_front() {
            Some(params) => {
                let handle = ProposalHandle::new(self.proposed);
                self.proposed += 1;
                self.pending.insert(handle.id, (handle.index, params.clone()));
                Ok(Proposal::Candidate { params, handle })
            }
            None => Ok(Proposal::Done),
        }
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

/// Discretize one axis
fn axis_values(spec: &ParameterSpec, num_points: usize) -> Vec<ParameterValue> {
    match spec {
        ParameterSpec::Continuous { min, max } => linspace(*min, *max, num_points)
            .into_iter()
            .map(ParameterValue::Float)
            .collect(),
        ParameterSpec::Integer { min, max } => {
            let width = (max - min + 1) as usize;
            if width <= num_points {
                (*min..=*max).map(ParameterValue::Int).collect()
            } else {
                let mut values: Vec<i64> = linspace(*min as f64, *max as f64, num_points)
                    .into_iter()
                    .map(|x| x.round() as i64)
                    .collect();
                values.dedup();
                values.into_iter().map(ParameterValue::Int).collect()
            }
        }
        ParameterSpec::Categorical { values } => values.clone(),
    }
}

/// Evenly spaced values over `[start, end]`, endpoints inclusive
fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    if num == 0 {
        return vec![];
    }
    if num == 1 {
        return vec![start];
    }
    let step = (end - start) / (num - 1) as f64;
    (0..num).map(|i| start + i as f64 * step).collect()
}

/// Enumerate all axis combinations, leftmost axis slowest
fn cartesian_product(axes: &[(String, Vec<ParameterValue>)]) -> VecDeque<ParameterVector> {
    let mut points = VecDeque::new();
    let mut indices = vec![0usize; axes.len()];

    loop {
        let point: ParameterVector = axes
            .iter()
            .zip(indices.iter())
            .map(|((name, values), &i)| (name.clone(), values[i].clone()))
            .collect();
        points.push_back(point);

        // Advance the odometer from the rightmost axis
        let mut axis = axes.len();
        loop {
            if axis == 0 {
                return points;
            }
            axis -= 1;
            indices[axis] += 1;
            if indices[axis] < axes[axis].1.len() {
                break;
            }
            indices[axis] = 0;
        }
    }
}
