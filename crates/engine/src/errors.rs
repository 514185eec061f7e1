//! Error types for the experiment engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid experiment configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate KPI name: {0}")]
    DuplicateKpi(String),

    #[error("Unknown KPI: {0}")]
    UnknownKpi(String),

    #[error("Objective already set to '{0}'")]
    ObjectiveAlreadySet(String),

    #[error("No objective KPI configured")]
    NoObjective,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Results export failed: {0}")]
    ExportFailed(String),

    #[error(transparent)]
    Optimizer(#[from] optimizer::OptimizerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
