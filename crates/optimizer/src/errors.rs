//! Error types for the optimizer crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Invalid optimizer configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown proposal handle: {0}")]
    UnknownHandle(String),

    #[error("Surrogate fit failed: {0}")]
    SurrogateFailed(String),

    #[error(transparent)]
    Space(#[from] sim_optimizer_types::SpaceError),
}
