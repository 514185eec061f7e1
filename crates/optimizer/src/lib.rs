//! Optimization strategies behind a uniform ask/tell interface
//!
//! This crate provides the proposal side of the optimization loop: grid
//! enumeration, seeded random search, and Bayesian optimization over a
//! Gaussian-process surrogate. All three implement the same `Optimizer`
//! contract, so the experiment controller never cares which strategy is
//! driving.

pub mod bayesian;
pub mod errors;
pub mod grid;
pub mod random;
pub mod surrogate;
pub mod traits;

pub use bayesian::{Acquisition, BayesianConfig, BayesianOptimizer};
pub use errors::{OptimizerError, Result};
pub use grid::GridOptimizer;
pub use random::RandomOptimizer;
pub use surrogate::{GaussianProcess, Surrogate};
pub use traits::{BestTracker, Objective, Observation, Optimizer, Proposal, ProposalHandle};
