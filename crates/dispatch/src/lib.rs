//! Simulation dispatch layer
//!
//! One contract, two interchangeable backends: in-process models invoked
//! directly, and external simulations spawned as subprocesses with
//! command-line parameters and CSV/JSON output. Both honor per-call
//! deadlines and cooperative cancellation and produce the standard
//! `SimulationResult` container.

pub mod context;
pub mod jitter;
pub mod model;
pub mod parse;
pub mod runner;
pub mod subprocess;

pub use context::{CancelSource, CancelToken, RunContext};
pub use jitter::jitter;
pub use model::{InProcessRunner, Model, ModelOutput};
pub use runner::SimulationRunner;
pub use subprocess::{OutputFormat, SubprocessConfig, SubprocessRunner};
